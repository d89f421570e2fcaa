//! synthgate - parallel multi-model answer synthesis gateway
//!
//! Fans each chat request out to several backend models and streams back
//! one synthesized answer from a summary model.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synthgate::config::Config;
use synthgate::router::Registry;

#[derive(Parser)]
#[command(name = "synthgate")]
#[command(about = "Parallel multi-model answer synthesis gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured combinations and their models
    Combinations {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let default_directive = format!("synthgate={level},tower_http={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut loaded = Config::from_file(&config)?;
            init_tracing(&loaded.logging.level);
            tracing::info!(config = %config, "Loaded configuration");

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            synthgate::proxy::run_server(loaded).await
        }

        Commands::Check { config } => {
            let loaded = Config::from_file(&config)?;
            let registry = Registry::from_config(&loaded)?;

            println!("Configuration OK: {}", config);
            println!("  listen: {}", loaded.server.listen);
            println!("  default combination: {}", registry.default_combination().name);
            println!("  combinations: {}", registry.combinations().len());
            Ok(())
        }

        Commands::Combinations { config } => {
            let loaded = Config::from_file(&config)?;
            let registry = Registry::from_config(&loaded)?;
            let default_name = &registry.default_combination().name;

            for combination in registry.combinations() {
                let mode = if combination.flags.use_parallel_analysis {
                    "parallel"
                } else {
                    "direct"
                };
                let marker = if &combination.name == default_name {
                    " (default)"
                } else {
                    ""
                };
                println!("{}{} [{}]", combination.name, marker, mode);
                println!(
                    "  text:   {} -> {}",
                    model_names(&combination.text_models),
                    combination.text_summary_model.model_name
                );
                println!(
                    "  vision: {} -> {}",
                    model_names(&combination.vision_models),
                    combination.vision_summary_model.model_name
                );
            }
            Ok(())
        }
    }
}

fn model_names(models: &[synthgate::config::ModelConfig]) -> String {
    if models.is_empty() {
        return "-".to_string();
    }
    models
        .iter()
        .map(|m| m.model_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
