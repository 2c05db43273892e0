//! Parley CLI - License client for the Parley chat service
//!
//! Usage:
//!   parley config --email <EMAIL>     Save account settings
//!   parley verify                     Show the current entitlement
//!   parley activate <KEY>             Redeem a license key
//!   parley increment                  Record one sent message
//!   parley status                     Show the cached entitlement
//!   parley captcha <TOKEN>            Check a captcha token
//!   parley device                     Show this machine's device id

mod client;
mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "parley")]
#[command(author = "Parley Team")]
#[command(version)]
#[command(about = "License client for the Parley chat service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// License server URL (overrides the config file)
    #[arg(long, global = true, env = "PARLEY_SERVER_URL")]
    server: Option<String>,

    /// Account email (overrides the config file)
    #[arg(long, global = true, env = "PARLEY_EMAIL")]
    email: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Save the --server and --email values to the config file
    Config,

    /// Show the current entitlement
    Verify {
        /// License key to check against the bound one
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Redeem a license key
    Activate {
        /// License key (any casing, dashes allowed)
        key: String,

        /// Captcha token, when the server requires one
        #[arg(long)]
        captcha_token: Option<String>,
    },

    /// Record one sent message
    Increment,

    /// Show the last entitlement received from the server
    Status,

    /// Check a captcha token against the server
    Captcha {
        /// Token produced by the captcha widget
        token: String,
    },

    /// Show this machine's device id
    Device {
        /// List the signals the id is derived from
        #[arg(short, long)]
        components: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},parley_cli=info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = config::Config::load()?.with_overrides(cli.server.clone(), cli.email.clone());
    let ctx = commands::Context::new(config)?;

    match cli.command {
        Commands::Config => {
            commands::configure(cli.server, cli.email)?;
        }

        Commands::Verify { key } => {
            commands::license::verify(&ctx, key).await?;
        }

        Commands::Activate { key, captcha_token } => {
            commands::license::activate(&ctx, key, captcha_token).await?;
        }

        Commands::Increment => {
            commands::license::increment(&ctx).await?;
        }

        Commands::Status => {
            commands::license::status()?;
        }

        Commands::Captcha { token } => {
            commands::captcha::verify(&ctx, &token).await?;
        }

        Commands::Device { components, json } => {
            commands::device::show(&ctx, components, json)?;
        }
    }

    Ok(())
}
