//! Discord Purge - delete your Discord message history
//!
//! Searches every DM, resolved relationship and guild for messages written by
//! the authenticated account and deletes them one at a time.

mod config;
mod driver;
mod endpoints;
mod enumerator;
mod search;
mod transport;
mod types;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Environment variable holding the account token
const TOKEN_ENV: &str = "DISCORD_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "discord-purge")]
#[command(about = "A tool to delete Discord message history")]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an optional YAML config file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete messages from DMs, relationships and guilds
    Partial {
        /// Perform a dry run without deleting anything
        #[arg(short, long)]
        dry_run: bool,

        /// Skip message deletion for the given channels (comma separated)
        #[arg(short, long, default_value = "")]
        skip: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => {
            info!("Reading config {:?}", path);
            config::Config::from_file(path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        None => config::Config::default(),
    };

    let Command::Partial { dry_run, skip } = args.command;
    config.run.dry_run |= dry_run;
    let extra_skips = utils::parse_channel_list(&skip)
        .map_err(|e| anyhow::anyhow!("Invalid --skip list: {}", e))?;
    let policy = config.policy(extra_skips)?;

    if policy.dry_run {
        warn!("Dry run: nothing will be deleted");
    }
    if !policy.skip_channels.is_empty() {
        let mut ids: Vec<String> = policy
            .skip_channels
            .iter()
            .map(|id| id.to_string())
            .collect();
        ids.sort();
        info!("Skipping channels: {}", ids.join(", "));
    }

    let token = resolve_token(&config)?;
    debug!("Using token {}", utils::redact_token(&token));

    let dispatcher = transport::Dispatcher::new(&config.api.base_url, &token)
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
    let cancel = install_signal_handler();

    let counters = enumerator::TargetEnumerator::new(dispatcher, policy, cancel)
        .run()
        .await?;
    debug!("Final counters: {:?}", counters);

    Ok(())
}

/// Token from the environment, the config file, or an interactive prompt
fn resolve_token(config: &config::Config) -> Result<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV)
        && !token.trim().is_empty()
    {
        return Ok(token.trim().to_string());
    }

    if let Some(token) = config.api.token.as_deref().map(str::trim)
        && !token.is_empty()
    {
        return Ok(token.to_string());
    }

    let token = rpassword::prompt_password(format!(
        "{} is not set. Enter your Discord token: ",
        TOKEN_ENV
    ))?;
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(anyhow::anyhow!(
            "No token given, pass {} as an environment variable instead",
            TOKEN_ENV
        ));
    }
    Ok(token)
}

/// Cancel the returned token on Ctrl+C or SIGTERM
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        warn!("Received shutdown signal, stopping after the current request");
        trigger.cancel();
    });

    token
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    // Keep app logs, suppress verbose HTTP stack logs
    let default_filter = "reqwest=warn,hyper=warn,hyper_util=warn,rustls=warn";
    let filter = if verbose {
        EnvFilter::new(format!("debug,{}", default_filter))
    } else {
        EnvFilter::new(format!("info,{}", default_filter))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
