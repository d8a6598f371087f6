use std::path::Path;

use anyhow::{Context, Result};

use crate::commands::{open_findings_db, print_json};

/// List recorded build runs.
pub fn list_runs_command(db_path: &str, json: bool) -> Result<()> {
    let db = open_findings_db(Path::new(db_path))?;
    let runs = db.list_build_runs().context("Failed to list build runs")?;

    if json {
        return print_json(&runs);
    }
    println!("Build runs ({}):", runs.len());
    if runs.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for run in runs {
        let status = if run.complete { "complete".to_string() } else { format!("{} gap(s)", run.gaps.len()) };
        println!(
            "  - #{} {} [{}] blob={} config={}",
            run.id.unwrap_or_default(),
            run.created_at,
            status,
            run.blob_path,
            run.config_hash
        );
    }
    Ok(())
}

/// List recorded findings, optionally for one function.
pub fn list_findings_command(db_path: &str, function: Option<&str>, json: bool) -> Result<()> {
    let db = open_findings_db(Path::new(db_path))?;
    let findings = db.list_findings(function).context("Failed to list findings")?;

    if json {
        return print_json(&findings);
    }
    println!("Findings ({}):", findings.len());
    if findings.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for finding in findings {
        let clusters = finding
            .clusters
            .iter()
            .map(|c| format!("[{}]", c.members.join(",")))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "  - #{} {} {} ({}) {} {}",
            finding.id.unwrap_or_default(),
            finding.function,
            finding.verdict.as_str(),
            finding.predicate,
            clusters,
            finding.run_label
        );
        for faulted in &finding.faulted {
            println!("      fault {}: {}", faulted.library, faulted.fault.kind);
        }
    }
    Ok(())
}
