//! banter CLI — the main entry point.
//!
//! Commands:
//! - `ask`       — Send one message and print the reply
//! - `chat`      — Interactive chat in the terminal
//! - `normalize` — Print the canonical form of some text
//! - `config`    — Show the effective configuration or a template
//! - `doctor`    — Diagnose configuration, storage, and backend health

use std::path::PathBuf;
use std::process::ExitCode;

use banter_config::{AppConfig, LogFormat, LoggingConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "banter",
    about = "banter — a resilient group-chat assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.banter/config.toml)
    #[arg(short, long, global = true, env = "BANTER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message and print the reply
    Ask {
        /// The message text
        #[arg(short, long)]
        message: String,

        /// Chat to read history from and record the exchange in
        #[arg(long, default_value_t = 1)]
        chat: i64,

        /// Speaker id of the sender
        #[arg(long, default_value_t = 2)]
        user: i64,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Chat interactively
    Chat {
        #[arg(long, default_value_t = 1)]
        chat: i64,

        #[arg(long, default_value_t = 2)]
        user: i64,
    },

    /// Normalize text from the argument or stdin
    Normalize {
        text: Option<String>,
    },

    /// Print the effective configuration
    Config {
        /// Print a commented default template instead
        #[arg(long)]
        template: bool,
    },

    /// Diagnose system health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    let loaded = AppConfig::load_with_env(&path);

    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(cli.verbose, &logging);

    let config = loaded.map_err(|e| format!("Failed to load config: {e}"))?;

    let code = match cli.command {
        Commands::Ask {
            message,
            chat,
            user,
            timeout,
        } => commands::ask::run(&config, &message, chat, user, timeout).await?,
        Commands::Chat { chat, user } => commands::chat::run(&config, chat, user).await?,
        Commands::Normalize { text } => commands::normalize::run(text).await?,
        Commands::Config { template } => commands::config_cmd::run(&config, template)?,
        Commands::Doctor => commands::doctor::run(&config, &path).await?,
    };

    Ok(code)
}

/// `RUST_LOG` wins; otherwise `debug` with `--verbose`, else the configured level.
fn init_tracing(verbose: bool, logging: &LoggingConfig) {
    let fallback = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_target(false).init(),
    }
}
