use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ttswatch::watcher::WatchSessionBuilder;
use ttswatch::{Batch, IncludeScanner, Settings};

#[derive(Parser)]
#[command(name = "ttswatch")]
#[command(about = "Watch script and include trees and report affected scripts")]
struct Cli {
    /// Configuration file (defaults to ./ttswatch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Config,

    /// Watch for changes and print each batch of affected scripts
    Watch {
        /// Include tree root (overrides config)
        #[arg(long)]
        include: Option<PathBuf>,

        /// Script tree root (overrides config)
        #[arg(long)]
        scripts: Option<PathBuf>,

        /// Quiet period in milliseconds (overrides config)
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Emit one JSON object per batch
        #[arg(long)]
        json: bool,
    },
}

fn print_batch(batch: &Batch, json: bool) {
    if json {
        let line = serde_json::json!({ "event": "batch", "ids": batch });
        println!("{line}");
    } else {
        let ids: Vec<&str> = batch.iter().map(String::as_str).collect();
        println!("{}", ids.join(" "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = loaded.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    ttswatch::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("Created configuration file at: {}", path.display());
        }

        Commands::Config => {
            let rendered = toml::to_string_pretty(&settings)?;
            println!("{rendered}");
        }

        Commands::Watch {
            include,
            scripts,
            delay_ms,
            json,
        } => {
            // Override config with CLI args
            if let Some(dir) = include {
                settings.watch.include_dir = dir;
            }
            if let Some(dir) = scripts {
                settings.watch.script_dir = dir;
            }
            if let Some(ms) = delay_ms {
                settings.watch.debounce_ms = ms;
            }
            let watch = &settings.watch;

            let scanner = Arc::new(IncludeScanner::new(
                &watch.script_dir,
                &watch.include_dir,
                &watch.extension,
            ));
            let seeded = scanner.scan_all();
            eprintln!(
                "Tracking {seeded} scripts in {}, includes in {}",
                watch.script_dir.display(),
                watch.include_dir.display()
            );

            let mut session = WatchSessionBuilder::from_config(watch)
                .scanner(scanner)
                .on_batch(move |batch| print_batch(&batch, json))
                .start()
                .context("failed to start watching")?;

            tokio::select! {
                result = session.join() => {
                    result.context("watch session ended")?;
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Stopping...");
                    session.stop().await;
                }
            }
        }
    }

    Ok(())
}
