use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dynamis_core::{build_registry, ActionOutput, Settings};

#[derive(Parser)]
#[command(name = "dynamis", about = "Invoke dispatch actions against cloud connectors", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connectors and the actions they serve
    Actions {
        /// Only show actions of this connector
        #[arg(long)]
        connector: Option<String>,
    },
    /// Dispatch a single action with a JSON parameter bag
    Call {
        /// Action key, e.g. sp_list_lists
        action: String,
        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Where to write binary output (downloads, photos, exports)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(Settings::from_env()?);
    let registry = build_registry(settings)?;

    match cli.command {
        Commands::Actions { connector } => {
            for info in registry.list_connectors() {
                if let Some(filter) = &connector {
                    if !info.name.eq_ignore_ascii_case(filter) {
                        continue;
                    }
                }
                println!("{} - {}", info.name, info.description);
                for action in &info.actions {
                    println!("  {}", action);
                }
            }
        }
        Commands::Call {
            action,
            params,
            output,
        } => {
            let params: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&params)
                    .map_err(|e| format!("--params must be a JSON object: {}", e))?;
            match registry.dispatch(&action, &params).await {
                Ok(ActionOutput::Json(envelope)) => {
                    println!("{}", serde_json::to_string_pretty(&envelope)?);
                }
                Ok(ActionOutput::Csv(csv)) => {
                    if let Some(path) = output {
                        std::fs::write(&path, csv)?;
                        println!("csv written to {}", path.display());
                    } else {
                        print!("{}", csv);
                    }
                }
                Ok(ActionOutput::Bytes { data, media_type }) => {
                    let path = output.ok_or(
                        "action returned binary data; pass --output FILE to save it",
                    )?;
                    std::fs::write(&path, &data)?;
                    println!(
                        "{} bytes written to {} ({})",
                        data.len(),
                        path.display(),
                        media_type.unwrap_or_else(|| "application/octet-stream".to_string())
                    );
                }
                Err(err) => {
                    eprintln!(
                        "{}",
                        serde_json::to_string_pretty(&err.to_envelope(&action))?
                    );
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
