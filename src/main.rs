use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use quizpilot::{
    commands::{inspect_learner, learner_overview, run_simulation, SimulationOptions, Workspace},
    config::{ConfigLoader, QuizConfig},
    logging::init_logging,
    sql::format_table,
};

#[derive(Debug, Parser)]
#[command(name = "quizpilot", version, about = "Adaptive quiz difficulty with Q-learning")]
struct Cli {
    /// Configuration file (json, yaml or toml); defaults to $QUIZPILOT_CONFIG or the user config dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database; overrides the configured path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run simulated learners against the database
    Simulate {
        #[arg(long, default_value_t = 4)]
        learners: usize,
        #[arg(long, default_value_t = 30)]
        questions: usize,
        /// Probability of answering a medium question correctly
        #[arg(long, default_value_t = 0.7)]
        skill: f64,
        #[arg(long, default_value_t = 0.15)]
        skill_spread: f64,
        #[arg(long, default_value_t = 25)]
        question_pool: usize,
        #[arg(long, default_value = "learner")]
        prefix: String,
        /// Seed both exploration and learner behavior
        #[arg(long)]
        seed: Option<u64>,
        /// Write every decision and learning event as JSON lines
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Show learned values and progress
    Inspect {
        /// Learner to inspect; lists every learner when omitted
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Write the effective configuration to a file
    InitConfig {
        /// Target file; defaults to the config path in use
        path: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<(ConfigLoader, QuizConfig)> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path.clone()),
        None => ConfigLoader::new(),
    };
    let config = loader
        .load()
        .with_context(|| format!("Failed to load config from {}", loader.path().display()))?;
    Ok((loader, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (loader, config) = load_config(&cli)?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Command::Simulate {
            learners,
            questions,
            skill,
            skill_spread,
            question_pool,
            prefix,
            seed,
            events,
            json,
        } => {
            let workspace = Workspace::open(&config, cli.db.as_deref(), seed, events.is_some())?;
            let options = SimulationOptions {
                learners,
                questions,
                skill,
                skill_spread,
                question_pool,
                user_prefix: prefix,
                seed,
            };
            let report = run_simulation(&workspace, &options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", format_table(&report.to_table()));
            }
            if let Some(path) = events {
                let written = workspace.export_events(&path)?;
                info!("Wrote {} events to {}", written, path.display());
            }
        }
        Command::Inspect { user, limit, json } => {
            let workspace = Workspace::open(&config, cli.db.as_deref(), None, false)?;
            match user {
                Some(user) => {
                    let report = inspect_learner(&workspace, &user, limit)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!("{}", report.render());
                    }
                }
                None => {
                    let view = learner_overview(&workspace)?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&view)?);
                    } else {
                        println!("{}", format_table(&view));
                    }
                }
            }
        }
        Command::InitConfig { path } => {
            let loader = match path {
                Some(path) => ConfigLoader::with_path(path),
                None => loader,
            };
            loader
                .save(&config)
                .with_context(|| format!("Failed to write {}", loader.path().display()))?;
            println!("Configuration written to {}", loader.path().display());
        }
    }

    Ok(())
}
