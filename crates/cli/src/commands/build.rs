use std::path::Path;

use anyhow::{bail, Context, Result};
use diffharness_core::build::{BlobBuilder, BlobManifest, BuildOptions};
use diffharness_core::config::BuilderConfig;
use diffharness_core::db::BuildRunRecord;
use diffharness_core::model::{CombinedBlob, IncompletenessReport};
use diffharness_core::toolchain::LlvmToolchain;
use serde::Serialize;

use crate::commands::{open_findings_db, print_json, signature_source};
use crate::{canonicalize_or_current, sha256_file};

#[derive(Debug, Serialize)]
pub struct BuildSummary {
    pub blob: CombinedBlob,
    pub report: IncompletenessReport,
    pub header: String,
    pub manifest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub config: String,
    pub rebuild: bool,
    /// Fail when the blob is incomplete.
    pub strict: bool,
    pub db: Option<String>,
    pub man_pages: bool,
    pub json: bool,
}

/// Build every configured library and link the combined blob.
pub fn build_command(args: &BuildArgs) -> Result<()> {
    let config_path = canonicalize_or_current(&args.config)?;
    let loaded = BuilderConfig::load(&config_path)
        .with_context(|| format!("Failed to load builder config {}", args.config))?;
    let catalog = loaded.catalog().context("Failed to load function catalog")?;
    let libraries = loaded.libraries().context("Failed to load library configs")?;
    let toolchain = LlvmToolchain::from_config(&loaded.config.toolchain);
    let signatures = signature_source(args.man_pages);

    let options = BuildOptions {
        rebuild: args.rebuild,
        inject: loaded.wrappers_path().filter(|p| p.exists()),
        output: loaded.output_path(),
    };
    let outcome = BlobBuilder::new(&catalog, &libraries, &toolchain, signatures.as_ref())
        .run(&options)
        .context("Build run failed")?;

    let run_id = match &args.db {
        Some(db_path) => {
            let db = open_findings_db(Path::new(db_path))?;
            let record = BuildRunRecord::new(
                sha256_file(&config_path)?,
                outcome.blob.path.display().to_string(),
                &outcome.report,
            );
            Some(db.insert_build_run(&record).context("Failed to record build run")?)
        }
        None => None,
    };

    if args.json {
        print_json(&BuildSummary {
            blob: outcome.blob.clone(),
            report: outcome.report.clone(),
            header: outcome.header_path.display().to_string(),
            manifest: BlobManifest::path_for(&outcome.blob.path).display().to_string(),
            run_id,
        })?;
    } else {
        println!("Combined blob: {}", outcome.blob.path.display());
        println!("  Libraries: {}", outcome.blob.libraries.join(", "));
        println!("  Wrappers: {}", outcome.blob.wrapper_symbols.len());
        println!("  Header: {}", outcome.header_path.display());
        if let Some(id) = run_id {
            println!("  Recorded build run: {id}");
        }
        print!("{}", outcome.report);
    }

    if args.strict && !outcome.blob.complete {
        bail!("Combined blob is incomplete ({} gap(s)); failing because of --strict", outcome.report.len());
    }
    Ok(())
}
