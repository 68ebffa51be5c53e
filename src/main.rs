use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use mockup_pilot::config::Config;
use mockup_pilot::face::{self, HostState};
use mockup_pilot::hands::{ChromeInjector, Injector};
use mockup_pilot::payload::{PayloadResolver, file_to_data_url};
use mockup_pilot::sequencer::Sequencer;
use mockup_pilot::types::ActivationRequest;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mockup-pilot", version, about = "Drive the mockup editor in a running Chrome")]
struct Cli {
    /// Chrome DevTools endpoint (http://host:port or a ws:// URL)
    #[arg(long, global = true)]
    chrome: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the activation host (default)
    Serve {
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Activate one tab with images from disk and wait for the run to end
    Run {
        /// DevTools target id of the editor tab
        #[arg(long)]
        target: String,
        #[arg(long)]
        primary: PathBuf,
        #[arg(long)]
        secondary: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mockup_pilot=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(chrome) = cli.chrome {
        config.chrome_url = chrome;
    }

    let client = reqwest::Client::new();
    let injector = Arc::new(ChromeInjector::new(config.chrome_url.clone(), client.clone()));
    let payloads = PayloadResolver::new(client);
    let profile = Arc::new(config.profile.clone());

    match cli.command.unwrap_or(Command::Serve { listen: None }) {
        Command::Serve { listen } => {
            let state = Arc::new(HostState::new(profile, injector, payloads));
            face::serve(state, listen.unwrap_or(config.listen)).await
        }
        Command::Run {
            target,
            primary,
            secondary,
        } => {
            let primary = file_to_data_url(&primary)
                .with_context(|| format!("Failed to read {}", primary.display()))?;
            let secondary = secondary
                .map(|path| {
                    file_to_data_url(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))
                })
                .transpose()?;

            let page = injector.inject(&target).await?;
            info!(target_id = %target, "Attached, starting run");
            let report = Sequencer::new(page, profile, payloads)
                .run(ActivationRequest {
                    target,
                    primary,
                    secondary,
                })
                .await
                .finish()
                .await;

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
