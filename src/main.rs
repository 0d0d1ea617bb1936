// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Leafscan: Apple Leaf Disease Diagnosis
//!
//! Command-line entry point: serve the HTTP API, diagnose a single image,
//! inspect the ledger, or manage configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use leafscan::classifier::{Classifier, OnnxClassifier};
use leafscan::config::AppConfig;
use leafscan::history::{History, PredictionRecord};
use leafscan::knowledge::advisory_for_name;
use leafscan::preprocess::UploadedImage;
use leafscan::{DiagnosisService, LeafscanError};

/// Leafscan CLI - Apple Leaf Disease Diagnosis
#[derive(Parser, Debug)]
#[command(name = "leafscan")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Diagnose apple leaf diseases from photos", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Classifier model (overrides config)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Diagnose a single image and print the result as JSON
    Diagnose {
        /// Leaf photo to diagnose
        image: PathBuf,

        /// Classifier model (overrides config)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Show recorded diagnoses
    History {
        /// Show only the N most recent entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Include current treatment and prevention advice
        #[arg(short, long)]
        advice: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = AppConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve { host: None, port: None, model: None }) {
        Commands::Serve { host, port, model } => {
            if let Some(host) = host {
                config.web.host = host;
            }
            if let Some(port) = port {
                config.web.port = port;
            }
            if let Some(model) = model {
                config.model.path = model;
            }
            run_serve(config).await
        }
        Commands::Diagnose { image, model } => {
            if let Some(model) = model {
                config.model.path = model;
            }
            run_diagnose(config, &image).await
        }
        Commands::History { limit, advice } => run_history(&config, limit, advice),
        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommands::Init { force } => run_config_init(&cli.config, force),
        },
    }
}

/// Load the classifier and wire the pipeline. Failure here stops the process.
fn build_service(config: &AppConfig) -> anyhow::Result<DiagnosisService> {
    config.validate()?;
    let classifier: Arc<dyn Classifier> = match OnnxClassifier::load(&config.model) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            error!("Cannot start without a classifier: {}", e);
            return Err(e.into());
        }
    };
    Ok(DiagnosisService::from_config(classifier, config)?)
}

async fn run_serve(config: AppConfig) -> anyhow::Result<()> {
    info!("Leafscan v{}", env!("CARGO_PKG_VERSION"));
    let service = build_service(&config)?;
    info!("Images: {:?}", config.storage.images_dir);
    info!("Reports: {:?}", config.storage.reports_dir);
    info!("History: {:?}", config.storage.history_path);

    leafscan::web::start_server(service, &config.web).await?;
    Ok(())
}

async fn run_diagnose(config: AppConfig, image: &Path) -> anyhow::Result<()> {
    let service = build_service(&config)?;
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {:?}", image))?;

    let response = service.predict(UploadedImage::new(bytes, None)).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_history(config: &AppConfig, limit: Option<usize>, advice: bool) -> anyhow::Result<()> {
    let history = History::new(config.storage.history_path.clone());
    let entries = match limit {
        Some(count) => history.get_recent(count)?,
        None => history.read_all()?,
    };

    if entries.is_empty() {
        println!("No diagnoses recorded in {:?}", history.path());
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry, advice));
    }
    Ok(())
}

/// One ledger line; with `advice`, the record is re-resolved against the current table
fn format_entry(entry: &PredictionRecord, advice: bool) -> String {
    let mut line = format!(
        "{}  {:<18} {:>5.1}%  {:<8} {:<8} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.prediction,
        entry.confidence * 100.0,
        entry.severity.to_string(),
        format!("{:?}", entry.status).to_lowercase(),
        entry.report_filename,
    );
    if advice {
        let advisory = advisory_for_name(&entry.prediction);
        line.push_str(&format!(
            "\n    treatment:  {}\n    prevention: {}",
            advisory.treatment, advisory.prevention
        ));
    }
    line
}

fn run_config_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        return Err(LeafscanError::Config(format!(
            "{:?} already exists. Use --force to overwrite",
            path
        ))
        .into());
    }
    AppConfig::default().save(path)?;
    println!("Wrote default configuration to {:?}", path);
    Ok(())
}
