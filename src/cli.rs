//! CLI argument parsing.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "conduit", version, about = "Multi-tenant LLM API reverse proxy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the proxy server (default when no subcommand is given)
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "CONDUIT_CONFIG")]
    pub config: String,

    /// Listen host
    #[arg(long, env = "CONDUIT_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "CONDUIT_PORT")]
    pub port: Option<u16>,

    /// Path to the SQLite database
    #[arg(long, env = "CONDUIT_DB")]
    pub db: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", env = "CONDUIT_LOG_LEVEL")]
    pub log_level: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: "config.yaml".to_string(),
            host: None,
            port: None,
            db: None,
            log_level: "info".to_string(),
        }
    }
}
