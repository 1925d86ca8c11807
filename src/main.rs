//! Binary entry point for neuroprompt.
//!
//! This binary provides the CLI interface for the prompt pipeline.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use neuroprompt::agents::classify_request;
use neuroprompt::cli::{read_request, save_prompt};
use neuroprompt::feedback::{FeedbackQuery, open_store};
use neuroprompt::observability::{self, InitOptions};
use neuroprompt::{CancellationToken, FrameworkRepository, NeuropromptConfig, Orchestrator};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// NeuroPrompt - multi-role prompt generation pipeline.
#[derive(Parser)]
#[command(name = "neuroprompt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "NEUROPROMPT_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Generate an optimized prompt for a request.
    Run {
        /// The request to build a prompt for; read from stdin when omitted.
        request: Option<String>,

        /// Also write the final prompt to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the Prometheus exposition to stderr after the run.
        #[arg(long)]
        print_metrics: bool,
    },

    /// List the framework catalog.
    Frameworks {
        /// Show one framework in full.
        #[arg(short, long)]
        show: Option<String>,
    },

    /// Show past runs related to a request.
    History {
        /// The request to look up.
        request: String,

        /// Maximum number of runs.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the model fallback chain.
    Models,
}

/// Main entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: false,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, config: &NeuropromptConfig) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            request,
            output,
            print_metrics,
        } => {
            let stdin = std::io::stdin();
            let interactive = stdin.is_terminal();
            let request = read_request(request, stdin.lock(), interactive, std::io::stderr())?;
            cmd_run(config, &request, output.as_deref(), cli.json, print_metrics)
        },

        Commands::Frameworks { show } => cmd_frameworks(config, show, cli.json),

        Commands::History { request, limit } => cmd_history(config, &request, limit, cli.json),

        Commands::Models => cmd_models(config, cli.json),
    }
}

/// Loads configuration.
fn load_config(path: Option<&Path>) -> Result<NeuropromptConfig> {
    if let Some(config_path) = path {
        return NeuropromptConfig::load_from_file(config_path)
            .with_context(|| format!("reading {}", config_path.display()));
    }
    Ok(NeuropromptConfig::load_default())
}

fn cmd_run(
    config: &NeuropromptConfig,
    request: &str,
    output: Option<&Path>,
    json: bool,
    print_metrics: bool,
) -> Result<ExitCode> {
    let orchestrator = Orchestrator::from_config(config)?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| anyhow!("failed to install interrupt handler: {e}"))?;

    let outcome = orchestrator.run_with_cancellation(request, &token);

    if print_metrics && let Some(rendered) = observability::render_metrics() {
        eprintln!("{rendered}");
    }

    match outcome {
        Ok(result) => {
            if let Some(path) = output {
                save_prompt(path, &result.prompt)?;
                eprintln!("Prompt saved to {}", path.display());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.prompt);
                eprintln!(
                    "framework={} score={:.1} iterations={} outcome={}",
                    result.framework, result.final_score, result.iterations, result.outcome
                );
                for annotation in &result.annotations {
                    eprintln!("note: {annotation}");
                }
            }
            Ok(ExitCode::SUCCESS)
        },
        Err(failure) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&failure)?);
            } else {
                eprintln!("Run {} failed: {failure}", failure.run_id);
            }
            Ok(ExitCode::from(2))
        },
    }
}

fn load_repository(config: &NeuropromptConfig) -> FrameworkRepository {
    config
        .frameworks_dir
        .as_deref()
        .map_or_else(FrameworkRepository::embedded, FrameworkRepository::load)
}

fn cmd_frameworks(
    config: &NeuropromptConfig,
    show: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let repository = load_repository(config);
    if repository.is_degraded() {
        eprintln!("warning: framework directory unusable, showing embedded catalog");
    }

    if let Some(name) = show {
        let framework = repository
            .get(&name)
            .ok_or_else(|| anyhow!("unknown framework '{name}'"))?;
        if json {
            println!("{}", serde_json::to_string_pretty(framework)?);
            return Ok(ExitCode::SUCCESS);
        }
        println!("{}", framework.name());
        if !framework.description().is_empty() {
            println!("{}", framework.description());
        }
        println!();
        for section in framework.sections() {
            println!("  {}: {}", section.name, section.guidance);
        }
        if !framework.example().is_empty() {
            println!();
            println!("Example:");
            println!("{}", framework.example());
        }
        return Ok(ExitCode::SUCCESS);
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(repository.list_frameworks())?
        );
        return Ok(ExitCode::SUCCESS);
    }
    for framework in repository.list_frameworks() {
        let sections: Vec<&str> = framework.section_names().collect();
        println!("{:<10} {}", framework.name(), sections.join(" / "));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_history(
    config: &NeuropromptConfig,
    request: &str,
    limit: usize,
    json: bool,
) -> Result<ExitCode> {
    let Some(store) = open_store(&config.feedback)? else {
        eprintln!("Feedback store is disabled");
        return Ok(ExitCode::SUCCESS);
    };

    let query = FeedbackQuery::for_request(request, classify_request(request)).with_limit(limit);
    let records = store.query(&query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(ExitCode::SUCCESS);
    }
    if records.is_empty() {
        println!("No related runs");
        return Ok(ExitCode::SUCCESS);
    }
    for record in &records {
        let score = record
            .final_score
            .map_or_else(|| "-".to_string(), |s| format!("{s:.1}"));
        println!(
            "{}  {}  {:<8} score={:<5} {}",
            record.completed_at.format("%Y-%m-%d %H:%M"),
            record.outcome,
            record.framework.as_deref().unwrap_or("-"),
            score,
            record.request
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_models(config: &NeuropromptConfig, json: bool) -> Result<ExitCode> {
    let mut specs: Vec<_> = config.models.iter().map(|m| &m.spec).collect();
    specs.sort_by(|a, b| b.tier.cmp(&a.tier));

    if json {
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(ExitCode::SUCCESS);
    }
    for spec in specs {
        println!(
            "tier {:<3} {:<10} {}",
            spec.tier,
            spec.provider.as_str(),
            spec.id
        );
    }
    Ok(ExitCode::SUCCESS)
}
