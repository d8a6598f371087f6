use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use diffharness::commands::{
    analyze_command, build_command, craft_command, generate_driver_command, introduce_command,
    list_findings_command, list_runs_command, wrappers_command, AnalyzeArgs, BuildArgs, CraftArgs,
    DriverArgs,
};
use diffharness::init_tracing;

/// Differential-testing harness generator.
///
/// This CLI is a thin wrapper around `diffharness-core` (exposed in code as
/// `diffharness_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "diffharness",
    version,
    about = "Build and analyze differential test harnesses over competing library implementations",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a template `config.json` into a library root.
    Introduce {
        /// Library root directory.
        path: String,

        /// Overwrite an existing config.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Generate the plain `lib_entry_*` call wrappers for the catalog.
    Wrappers {
        /// Builder config (JSON or YAML).
        #[arg(long)]
        config: String,

        /// Look up missing prototypes in section 3 man pages.
        #[arg(long, default_value_t = false)]
        man_pages: bool,
    },

    /// Compile, rename and link every library into the combined blob.
    ///
    /// Always prints the integrity report. Exits nonzero on namespace
    /// collisions and link failures.
    Build {
        /// Builder config (JSON or YAML).
        #[arg(long)]
        config: String,

        /// Ignore `included_files.json` and recompile everything.
        #[arg(long, default_value_t = false)]
        rebuild: bool,

        /// Also fail when the blob is incomplete.
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Record the run in this findings database.
        #[arg(long)]
        db: Option<String>,

        #[arg(long, default_value_t = false)]
        man_pages: bool,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the generated test driver for one function.
    GenerateDriver {
        /// Crafter config (JSON or YAML).
        #[arg(long)]
        config: String,

        /// Function catalog file.
        #[arg(long)]
        catalog: String,

        #[arg(long)]
        function: String,

        /// Write the driver to this file instead of stdout.
        #[arg(long)]
        out: Option<String>,

        #[arg(long, default_value_t = false)]
        man_pages: bool,
    },

    /// Assemble an engine-ready harness for one function.
    Craft {
        /// Crafter config (JSON or YAML).
        #[arg(long)]
        config: String,

        #[arg(long)]
        function: String,

        /// Hand-written driver source.
        #[arg(long, conflicts_with = "generate")]
        driver: Option<String>,

        /// Generate the driver from this function catalog.
        #[arg(long, value_name = "CATALOG")]
        generate: Option<String>,

        /// Combined blob produced by `build`.
        #[arg(long)]
        blob: String,

        /// Target folder.
        #[arg(long)]
        out: String,

        #[arg(long, default_value_t = false)]
        man_pages: bool,
    },

    /// Cluster one run's per-library results.
    Analyze {
        /// Result vector JSON file.
        #[arg(long, conflicts_with = "message")]
        results: Option<String>,

        /// Driver abort message file.
        #[arg(long, requires = "libs")]
        message: Option<String>,

        /// Library ids in driver order (for --message).
        #[arg(long, value_delimiter = ',')]
        libs: Vec<String>,

        /// exact, tol:<eps> or prefix:<n>
        #[arg(long, default_value = "exact")]
        predicate: String,

        #[arg(long)]
        function: Option<String>,

        /// Run label stored with the finding (defaults to the input path).
        #[arg(long)]
        label: Option<String>,

        /// Record the finding in this findings database.
        #[arg(long)]
        db: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded build runs.
    ListRuns {
        #[arg(long)]
        db: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded findings.
    ListFindings {
        #[arg(long)]
        db: String,

        /// Only findings for this function.
        #[arg(long)]
        function: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Introduce { path, force } => introduce_command(&path, force)?,
        Command::Wrappers { config, man_pages } => wrappers_command(&config, man_pages)?,
        Command::Build { config, rebuild, strict, db, man_pages, json } => {
            build_command(&BuildArgs { config, rebuild, strict, db, man_pages, json })?
        }
        Command::GenerateDriver { config, catalog, function, out, man_pages } => {
            generate_driver_command(&DriverArgs { config, catalog, function, out, man_pages })?
        }
        Command::Craft { config, function, driver, generate, blob, out, man_pages } => {
            craft_command(&CraftArgs { config, function, driver, catalog: generate, blob, out, man_pages })?
        }
        Command::Analyze { results, message, libs, predicate, function, label, db, json } => {
            analyze_command(&AnalyzeArgs { results, message, libs, predicate, function, label, db, json })?
        }
        Command::ListRuns { db, json } => list_runs_command(&db, json)?,
        Command::ListFindings { db, function, json } => {
            list_findings_command(&db, function.as_deref(), json)?
        }
    }

    Ok(())
}
