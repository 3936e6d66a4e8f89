//! SD-013: CLI subcommands: init, validate, list, plan, run, install, completions.

use crate::core::error::error_chain;
use crate::core::executor::{RunOptions, Runner, TaskOutcome};
use crate::core::generator::Generator;
use crate::core::installer::{InstallOptions, NpmInstaller};
use crate::core::registrar::EntryKind;
use crate::core::{parser, types};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "soda",
    version,
    about = "Declarative build-task graph generator: units, ranges, recipes"
)]
pub struct Cli {
    /// Log debug output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new soda project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate soda.yaml without running anything
    Validate {
        /// Path to soda.yaml
        #[arg(short, long, default_value = "soda.yaml")]
        file: PathBuf,
    },

    /// List every task the config registers
    List {
        /// Path to soda.yaml
        #[arg(short, long, default_value = "soda.yaml")]
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the execution order for tasks
    Plan {
        /// Path to soda.yaml
        #[arg(short, long, default_value = "soda.yaml")]
        file: PathBuf,

        /// Tasks to plan
        #[arg(default_value = "default")]
        tasks: Vec<String>,
    },

    /// Run tasks and their prerequisites
    Run {
        /// Path to soda.yaml
        #[arg(short, long, default_value = "soda.yaml")]
        file: PathBuf,

        /// Tasks to run
        #[arg(default_value = "default")]
        tasks: Vec<String>,

        /// Show what would run without running it
        #[arg(long)]
        dry_run: bool,

        /// Stop at the first failed task
        #[arg(long)]
        fail_fast: bool,
    },

    /// Install packages declared by recipe manifests
    Install {
        /// Path to soda.yaml
        #[arg(short, long, default_value = "soda.yaml")]
        file: PathBuf,

        /// Report missing packages without installing
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::List { file, json } => cmd_list(&file, json),
        Commands::Plan { file, tasks } => cmd_plan(&file, &tasks),
        Commands::Run {
            file,
            tasks,
            dry_run,
            fail_fast,
        } => cmd_run(&file, &tasks, RunOptions { dry_run, fail_fast }),
        Commands::Install { file, dry_run } => cmd_install(&file, dry_run),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "soda", &mut std::io::stdout());
            Ok(())
        }
    }
}

const CONFIG_TEMPLATE: &str = r#"# Source and destination roots
src: lib
dest: dist

# Unit name -> target(s): "<range>[: <dest override>]"
inputs:
  app: web

# Range -> ordered recipe invocations: "<recipe>[: <dep>...]", "[<recipe>]" for dependency-only
targets:
  web:
    - copy

options:
  "*":
    src: ""

aliases: {}
"#;

const RECIPE_TEMPLATE: &str = r#"recipe:
  description: copy unit sources to the destination
  dependencies: []
script: |
  mkdir -p "{{dest}}"
  cp -r "{{src}}/." "{{dest}}"
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("soda.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let recipe_dir = path.join(types::DEFAULT_RECIPE_DIR);
    std::fs::create_dir_all(&recipe_dir)
        .map_err(|e| format!("cannot create recipe dir: {}", e))?;
    let recipe_path = recipe_dir.join("copy.yaml");
    if !recipe_path.exists() {
        std::fs::write(&recipe_path, RECIPE_TEMPLATE)
            .map_err(|e| format!("cannot write {}: {}", recipe_path.display(), e))?;
    }
    std::fs::write(&config_path, CONFIG_TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized soda project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}", recipe_path.display());
    Ok(())
}

/// Parse, validate and resolve a config file.
fn load_generator(file: &Path) -> Result<Generator, String> {
    let config = parser::parse_config_file(file).map_err(|e| error_chain(&e))?;
    let errors = parser::validate_config(&config);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err(format!("{} validation error(s)", errors.len()));
    }
    let root = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Generator::new(&root, config).map_err(|e| error_chain(&e))
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let gen = load_generator(file)?;
    let graph = gen.graph();
    println!(
        "OK: {} ({} units, {} tasks, {} groups)",
        file.display(),
        graph.defaults.len(),
        graph.tasks.len(),
        graph.groups.len()
    );
    Ok(())
}

fn cmd_list(file: &Path, json: bool) -> Result<(), String> {
    let gen = load_generator(file)?;
    let entries = gen.registrations();

    if json {
        let out = serde_json::to_string_pretty(&entries)
            .map_err(|e| format!("JSON serialization error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    for entry in entries {
        let deps = if entry.deps.is_empty() {
            String::new()
        } else {
            format!(" -> {}", entry.deps.join(", "))
        };
        println!("  {} [{}]{}", entry.name, entry.kind, deps);
    }
    let runnable = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Recipe)
        .count();
    println!();
    println!("{} tasks ({} run recipes)", entries.len(), runnable);
    Ok(())
}

fn registered(file: &Path) -> Result<Runner, String> {
    let gen = load_generator(file)?;
    let mut runner = Runner::new();
    gen.register(&mut runner);
    Ok(runner)
}

fn cmd_plan(file: &Path, tasks: &[String]) -> Result<(), String> {
    let runner = registered(file)?;
    let order = runner.plan(tasks).map_err(|e| e.to_string())?;
    println!("Planning: {} ({} tasks)", tasks.join(", "), order.len());
    println!();
    for (i, id) in order.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, id);
    }
    Ok(())
}

fn cmd_run(file: &Path, tasks: &[String], opts: RunOptions) -> Result<(), String> {
    let runner = registered(file)?;
    let report = runner.run(tasks, opts).map_err(|e| e.to_string())?;

    if opts.dry_run {
        println!("Dry run, nothing executed:");
        for (id, outcome) in &report.outcomes {
            if *outcome == TaskOutcome::Planned {
                println!("  {}", id);
            }
        }
        return Ok(());
    }

    for (id, outcome) in &report.outcomes {
        if *outcome != TaskOutcome::Aggregated {
            println!("  {}: {}", id, outcome);
        }
    }
    println!();
    let failed = report.failed().len();
    let completed = report.completed();
    let secs = report.duration.as_secs_f64();
    report.into_result().map_err(|e| {
        println!("Run completed with errors: {} ok, {} FAILED", completed, failed);
        e.to_string()
    })?;
    println!("Run complete: {} ok ({:.1}s).", completed, secs);
    Ok(())
}

fn cmd_install(file: &Path, dry_run: bool) -> Result<(), String> {
    let gen = load_generator(file)?;
    let installer = NpmInstaller::new(gen.root());
    let report = gen
        .install(
            &installer,
            InstallOptions {
                save_dev: true,
                dry_run,
            },
        )
        .map_err(|e| error_chain(&e))?;

    if report.all_met() {
        println!("All recipe dependencies met.");
        return Ok(());
    }
    if !report.installed.is_empty() {
        let verb = if dry_run { "Would install" } else { "Installed" };
        println!("{}: {}", verb, report.installed.join(", "));
    }
    for m in &report.mismatches {
        println!(
            "  MISMATCH: {} v{} does not satisfy {} ({})",
            m.package,
            m.installed,
            m.required,
            m.sources.join(", ")
        );
    }
    for spec in &report.unparsable {
        println!("  UNPARSABLE: {}", spec);
    }
    Ok(())
}
