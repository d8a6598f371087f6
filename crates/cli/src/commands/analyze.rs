use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use diffharness_core::analysis::{analyze, parse_verifier_message, ClusterReport, Predicate, ResultVector};
use diffharness_core::db::FindingRecord;

use crate::commands::{open_findings_db, print_json};

#[derive(Debug, Clone, Default)]
pub struct AnalyzeArgs {
    /// Result vector JSON file.
    pub results: Option<String>,
    /// Driver abort message (`<lib>:<representative>` lines); needs `libs`.
    pub message: Option<String>,
    pub libs: Vec<String>,
    pub predicate: String,
    /// Overrides the function named in the results file.
    pub function: Option<String>,
    pub label: Option<String>,
    pub db: Option<String>,
    pub json: bool,
}

/// Cluster one run's results and report agreement or divergence.
pub fn analyze_command(args: &AnalyzeArgs) -> Result<()> {
    let predicate: Predicate = args.predicate.parse()?;

    let (report, function, label) = match (&args.results, &args.message) {
        (Some(path), None) => {
            let results = ResultVector::load(Path::new(path))?;
            let function = args.function.clone().or(results.function.clone());
            (analyze(&results, &predicate), function, path.clone())
        }
        (None, Some(path)) => {
            if args.libs.is_empty() {
                bail!("--message needs --libs in driver order");
            }
            let text = fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
            let assignment = parse_verifier_message(&text, &args.libs)?;
            (ClusterReport::from_assignment(&assignment, &args.libs), args.function.clone(), path.clone())
        }
        _ => bail!("Pass exactly one of --results or --message"),
    };
    let label = args.label.clone().unwrap_or(label);

    let finding_id = match &args.db {
        Some(db_path) => {
            let db = open_findings_db(Path::new(db_path))?;
            let function = function.clone().unwrap_or_else(|| "unknown".to_string());
            let record = FindingRecord::new(function, label, &predicate, &report);
            Some(db.insert_finding(&record).context("Failed to record finding")?)
        }
        None => None,
    };

    if args.json {
        print_json(&report)?;
    } else {
        if let Some(function) = &function {
            println!("Function: {function}");
        }
        print!("{report}");
        if let Some(id) = finding_id {
            println!("Recorded finding: {id}");
        }
    }
    Ok(())
}
