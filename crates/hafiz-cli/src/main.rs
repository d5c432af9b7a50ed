//! Hafiz - parallel multipart transfers for S3-compatible storage

mod commands;
mod config;
mod progress;
mod s3_client;
mod utils;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hafiz_core::config::LoggingConfig;
use hafiz_transfer::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::cp::CpOptions;
use commands::rm::RmOptions;
use commands::CommandContext;
use config::Config;

#[derive(Parser)]
#[command(name = "hafiz")]
#[command(author = "Hafiz Team")]
#[command(version = hafiz_core::VERSION)]
#[command(about = "Parallel multipart transfers for S3-compatible storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Profile from ~/.hafiz/config.toml
    #[arg(long, global = true, env = "HAFIZ_PROFILE")]
    profile: Option<String>,

    /// Endpoint URL, overriding the profile
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Region, overriding the profile
    #[arg(long, global = true)]
    region: Option<String>,

    /// Transfer settings file (TOML)
    #[arg(long, global = true, env = "HAFIZ_TRANSFER_CONFIG")]
    transfer_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HAFIZ_LOG_LEVEL")]
    log_level: Option<String>,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a file or object: upload, download or server-side copy
    Cp {
        /// Local path or s3://bucket/key
        source: String,

        /// Local path or s3://bucket/key
        destination: String,

        /// Upload every file under a directory
        #[arg(short, long)]
        recursive: bool,

        /// Part size in bytes
        #[arg(long)]
        part_size: Option<u64>,

        /// Parts transferred in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Size above which uploads go multipart
        #[arg(long)]
        multipart_threshold: Option<u64>,

        /// Keep uploaded parts when a multipart transfer fails
        #[arg(long)]
        leave_parts_on_error: bool,

        /// Content type for uploaded objects (guessed from extension otherwise)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Remove an object, or every object under a prefix
    Rm {
        /// s3://bucket/key or s3://bucket/prefix/
        path: String,

        /// Delete every object under the prefix
        #[arg(short, long)]
        recursive: bool,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },
}

fn init_logging(logging: &LoggingConfig, level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(logging.level.as_str())));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfers");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load(cli.profile.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = Some(endpoint);
    }
    if let Some(region) = cli.region {
        config.region = region;
    }
    if let Some(path) = cli.transfer_config {
        config.transfer_config = Some(path);
    }

    if let Commands::Cp {
        part_size,
        concurrency,
        multipart_threshold,
        leave_parts_on_error,
        ..
    } = &cli.command
    {
        if let Some(part_size) = part_size {
            config.multipart_chunksize = *part_size;
        }
        if let Some(concurrency) = concurrency {
            config.max_concurrent_requests = *concurrency;
        }
        if let Some(threshold) = multipart_threshold {
            config.multipart_threshold = *threshold;
        }
        config.leave_parts_on_error |= *leave_parts_on_error;
    }

    let transfer = config.transfer()?;
    init_logging(&transfer.logging, cli.log_level.as_deref());
    info!(
        "Using endpoint {} in {}",
        config.endpoint.as_deref().unwrap_or("(default)"),
        config.region
    );

    let client = s3_client::create_client(&config, transfer.retry.clone()).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let ctx = CommandContext {
        client,
        transfer,
        quiet: cli.quiet,
        cancel,
    };

    match cli.command {
        Commands::Cp {
            source,
            destination,
            recursive,
            content_type,
            ..
        } => {
            let opts = CpOptions {
                recursive,
                content_type,
            };
            commands::cp::execute(&ctx, &source, &destination, opts).await
        }
        Commands::Rm {
            path,
            recursive,
            force,
        } => commands::rm::execute(&ctx, &path, RmOptions { recursive, force }).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_cp_overrides() {
        let cli = Cli::parse_from([
            "hafiz",
            "--profile",
            "bulk",
            "cp",
            "big.iso",
            "s3://bucket/",
            "--part-size",
            "16777216",
            "--concurrency",
            "8",
        ]);
        assert_eq!(cli.profile.as_deref(), Some("bulk"));
        match cli.command {
            Commands::Cp {
                part_size,
                concurrency,
                recursive,
                ..
            } => {
                assert_eq!(part_size, Some(16 * 1024 * 1024));
                assert_eq!(concurrency, Some(8));
                assert!(!recursive);
            }
            _ => panic!("expected cp"),
        }
    }

    #[test]
    fn test_cli_parses_rm() {
        let cli = Cli::parse_from(["hafiz", "rm", "-rf", "s3://bucket/logs/", "-q"]);
        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Commands::Rm {
                recursive: true,
                force: true,
                ..
            }
        ));
    }
}
