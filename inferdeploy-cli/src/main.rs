//! inferdeploy CLI: deploy, delete, inspect and invoke inference endpoints.
//!
//! Endpoint names come from configuration; no verb takes a name argument.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Exit code for unusable command lines.
const USAGE_EXIT_CODE: i32 = 2;

/// inferdeploy: manage managed ML inference endpoints
#[derive(Parser, Debug)]
#[command(name = "inferdeploy", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (searched for inferdeploy.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Exit non-zero when any endpoint operation fails
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Deploy every configured endpoint
    Deploy {
        /// Wait until each endpoint is in service
        #[arg(long)]
        wait: bool,
    },
    /// Delete every configured endpoint and its configurations
    Delete,
    /// Show the state of every configured endpoint
    Status,
    /// Attach the configured scaling policy to every provisioned endpoint
    Autoscale,
    /// Send a prediction request
    Invoke {
        #[command(subcommand)]
        target: InvokeTarget,
    },
}

#[derive(clap::Subcommand, Debug)]
enum InvokeTarget {
    /// Embed texts on the text endpoint
    Text {
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Embed audio files on the audio endpoint
    Audio {
        /// Object-storage URIs of the audio files
        #[arg(required = true)]
        file_uris: Vec<String>,
    },
}

fn init_tracing(verbose: u8, quiet: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "inferdeploy", "inferdeploy")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "inferdeploy.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _guard = init_tracing(0, false);
            tracing::error!("{}", e.to_string().trim_end());
            std::process::exit(USAGE_EXIT_CODE);
        }
    };
    let _guard = init_tracing(cli.verbose, cli.quiet);

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let config = inferdeploy_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let failures = commands::handle_command(cli.command, config).await?;
    if failures > 0 && cli.strict {
        anyhow::bail!("{} endpoint operation(s) failed", failures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_with_wait() {
        let cli = Cli::try_parse_from(["inferdeploy", "-v", "--strict", "deploy", "--wait"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(cli.strict);
        assert!(matches!(cli.command, Commands::Deploy { wait: true }));
    }

    #[test]
    fn test_parse_invoke_text() {
        let cli = Cli::try_parse_from(["inferdeploy", "invoke", "text", "hello", "world"]).unwrap();
        match cli.command {
            Commands::Invoke {
                target: InvokeTarget::Text { texts },
            } => assert_eq!(texts, vec!["hello", "world"]),
            other => panic!("Expected invoke text, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_verb_is_usage_error() {
        let err = Cli::try_parse_from(["inferdeploy", "redeploy"]).unwrap_err();
        assert!(err.use_stderr());
        assert_eq!(err.exit_code(), USAGE_EXIT_CODE);
    }

    #[test]
    fn test_missing_verb_is_usage_error() {
        assert!(Cli::try_parse_from(["inferdeploy"]).is_err());
    }

    #[test]
    fn test_invoke_requires_inputs() {
        assert!(Cli::try_parse_from(["inferdeploy", "invoke", "audio"]).is_err());
    }
}
