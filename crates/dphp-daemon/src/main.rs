//! dphpd - durable runtime daemon
//!
//! Consumes the project stream, runs each message through the script
//! executor and commits the resulting state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dphp_auth::TokenIssuer;
use dphp_daemon::{inspect, DaemonConfig, Daemon, Inspection};
use dphp_types::{IdKind, Role, User};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dphpd")]
#[command(about = "Durable runtime daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DPHP_CONFIG")]
    config: Option<String>,

    /// Stream namespace
    #[arg(short, long, env = "DPHP_PROJECT")]
    project: Option<String>,

    /// Log level
    #[arg(long, env = "DPHP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DPHP_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume events until interrupted
    Run,

    /// List stored state of a kind, or print one identifier's state
    Inspect {
        kind: IdKind,
        /// Identifier without the kind prefix, e.g. `Counter:1`
        id: Option<String>,
    },

    /// Issue a bearer token for a user
    Token {
        user: String,
        #[arg(short, long)]
        role: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(project) = cli.project {
        config.project = project;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match cli.command {
        Command::Run => {
            let daemon = Daemon::new(config).await?;
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                }
                signal.cancel();
            });
            daemon.run(shutdown).await?;
        }
        Command::Inspect { kind, id } => {
            let daemon = Daemon::new(config).await?;
            match inspect(&daemon.state(), kind, id.as_deref()).await? {
                Inspection::Keys(keys) => {
                    for key in keys {
                        println!("{key}");
                    }
                }
                Inspection::State(id, Some(state)) => {
                    println!("{}", String::from_utf8_lossy(&state));
                    tracing::debug!(state_id = %id, bytes = state.len(), "Read state");
                }
                Inspection::State(id, None) => anyhow::bail!("no state stored for {id}"),
            }
        }
        Command::Token { user, role } => {
            let issuer = TokenIssuer::new(config.authz.secrets.as_slice())?;
            let user = User::new(user, role.iter().map(|r| Role::new(r.as_str())).collect());
            println!("{}", issuer.issue(&user)?);
        }
    }

    Ok(())
}
