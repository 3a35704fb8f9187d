//! Dirgate - LDAP gateway for SQL user stores
//!
//! Answers LDAP simple binds and equality searches from a relational database.

mod commands;

use clap::{Parser, Subcommand};
use commands::serve::ServeArgs;
use dirgate_core::config::{GatewayConfig, LoggingConfig};
use dirgate_crypto::HashScheme;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dirgate")]
#[command(author = "Dirgate Team")]
#[command(version = dirgate_core::VERSION)]
#[command(about = "LDAP gateway for SQL user stores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DIRGATE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the LDAP server (default)
    Serve(ServeArgs),

    /// Hash a password read from stdin
    Hash {
        /// Hash scheme (argon2, scrypt, ssha, ssha256, ssha512)
        #[arg(short, long, default_value = "argon2")]
        scheme: HashScheme,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    config.apply_env()?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    match cli.command {
        Some(Commands::Hash { scheme }) => commands::hash::execute(scheme),
        Some(Commands::Serve(args)) => commands::serve::execute(config, args).await,
        None => commands::serve::execute(config, ServeArgs::default()).await,
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    // stdout is reserved for command output
    if config.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
