use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use diffharness_core::build::BlobManifest;
use diffharness_core::catalog::FunctionCatalog;
use diffharness_core::config::CrafterConfig;
use diffharness_core::crafter::{Driver, DriverGenerator, HarnessAssembler};
use diffharness_core::toolchain::LlvmToolchain;

use crate::commands::signature_source;

#[derive(Debug, Clone, Default)]
pub struct DriverArgs {
    /// Crafter config (libs, engine, array width).
    pub config: String,
    /// Function catalog file.
    pub catalog: String,
    pub function: String,
    /// Write the driver here instead of stdout.
    pub out: Option<String>,
    pub man_pages: bool,
}

fn generate_driver(config: &CrafterConfig, catalog_path: &str, function: &str, man_pages: bool) -> Result<Driver> {
    let catalog = FunctionCatalog::load(Path::new(catalog_path))
        .with_context(|| format!("Failed to load function catalog {catalog_path}"))?;
    let entry = catalog.lookup(function)?;
    let signatures = signature_source(man_pages);
    let signature = catalog
        .signature_of(function, signatures.as_ref(), Some(config.general_max_array_width))
        .with_context(|| format!("No usable signature for '{function}'"))?;

    let driver = DriverGenerator::new(&signature, &config.libs, config.engine, config.general_max_array_width)
        .with_headers(entry.headers.iter().cloned())
        .generate()
        .with_context(|| format!("Failed to generate driver for '{function}'"))?;
    Ok(driver)
}

/// Print (or write) the generated driver for one function.
pub fn generate_driver_command(args: &DriverArgs) -> Result<()> {
    let config = CrafterConfig::load(Path::new(&args.config))
        .with_context(|| format!("Failed to load crafter config {}", args.config))?;
    let driver = generate_driver(&config, &args.catalog, &args.function, args.man_pages)?;

    match &args.out {
        Some(out) => {
            fs::write(out, &driver.source).with_context(|| format!("Failed to write driver to {out}"))?;
            println!("Driver for '{}' ({}): {out}", args.function, config.engine.as_str());
            if !driver.testcases.is_empty() {
                println!("  Seed test cases: {}", driver.testcases.len());
            }
        }
        None => println!("{}", driver.source),
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct CraftArgs {
    pub config: String,
    pub function: String,
    /// Hand-written driver source; mutually exclusive with `catalog`.
    pub driver: Option<String>,
    /// Generate the driver from this catalog instead.
    pub catalog: Option<String>,
    pub blob: String,
    /// Target folder.
    pub out: String,
    pub man_pages: bool,
}

/// Assemble an engine-ready harness for one function against a built blob.
pub fn craft_command(args: &CraftArgs) -> Result<()> {
    let config = CrafterConfig::load(Path::new(&args.config))
        .with_context(|| format!("Failed to load crafter config {}", args.config))?;

    let driver = match (&args.driver, &args.catalog) {
        (Some(path), None) => {
            let source =
                fs::read_to_string(path).with_context(|| format!("Failed to read driver {path}"))?;
            Driver { source, testcases: Default::default() }
        }
        (None, Some(catalog)) => generate_driver(&config, catalog, &args.function, args.man_pages)?,
        _ => bail!("Pass exactly one of --driver or --generate <catalog>"),
    };

    let manifest = BlobManifest::load(Path::new(&args.blob))
        .with_context(|| format!("Failed to read manifest of blob {} (run build first)", args.blob))?;

    let toolchain = LlvmToolchain::from_config(&config.toolchain);
    let symex_headers = Some(config.symex.headers.clone());
    let harness = HarnessAssembler::new(&toolchain, config.engine)
        .with_symex_headers(symex_headers)
        .assemble(&manifest.blob, &driver, &config.libs, &args.function, Path::new(&args.out))
        .with_context(|| format!("Failed to assemble harness for '{}'", args.function))?;

    println!("Harness for '{}' ({}):", args.function, harness.engine.as_str());
    println!("  Target: {}", harness.target.display());
    println!("  Driver: {}", harness.driver_path.display());
    println!("  Wrappers: {}", harness.wrappers.len());
    if !manifest.blob.complete {
        println!("  Warning: blob is incomplete ({} gap(s))", manifest.report.len());
    }
    Ok(())
}
