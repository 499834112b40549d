use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;

use subgraph_resilience::config::{load_config, TrafficTable};
use subgraph_resilience::observability::logging::init_logging;
use subgraph_resilience::warmup;

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Management CLI for the subgraph resilience layer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the resolved traffic table
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the operations of the configured warmup corpus
    WarmupItems {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            let table = TrafficTable::build(&config.traffic_shaping)?;
            let report = json!({
                "traffic_shaping": table.describe(),
                "feature_flags": config.feature_flags,
                "cache_warmup": config.cache_warmup.enabled,
                "error_propagation": config.error_propagation.mode,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::WarmupItems { config } => {
            let config = load_config(&config)?;
            init_logging(&config.observability);
            let source = warmup::from_config(&config.cache_warmup.source)?;
            let corpus = source.load().await?;
            for item in &corpus.items {
                let name = item.request.operation_name.as_deref().unwrap_or("-");
                let scope = item.feature_flag.as_deref().unwrap_or("base");
                let client = if item.client.name.is_empty() { "-" } else { &item.client.name };
                println!("{}\t{}\t{}\t{}", item.kind(), scope, client, name);
            }
            for rejected in &corpus.rejected {
                eprintln!("rejected\t{rejected}");
            }
            eprintln!(
                "{} items, {} rejected files from {}",
                corpus.items.len(),
                corpus.rejected.len(),
                source.describe()
            );
        }
    }
    Ok(())
}
