use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "lumen-server")]
#[command(about = "Photo and video library indexer")]
pub struct Cli {
    /// Path to lumen.toml (defaults to ./lumen.toml or ./config/lumen.toml)
    #[arg(long, global = true, env = "LUMEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before reading the environment
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scanner until interrupted (default)
    Serve(ServeArgs),
    /// Discover and scan the library once, then exit
    Scan(ScanArgs),
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Skip the full scan normally queued at startup
    #[arg(long, default_value_t = false)]
    pub no_initial_scan: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ScanArgs {
    /// Only scan this user's roots
    #[arg(long)]
    pub user: Option<i64>,
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Create a user, or replace an existing user's library roots
    Add {
        username: String,
        /// Library root; repeat for several
        #[arg(long = "root", required = true)]
        roots: Vec<PathBuf>,
    },
    /// List users and their roots
    List,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the persisted scanner settings
    Show,
    /// Persist new scanner settings; a running server picks them up on restart
    Set {
        /// Number of concurrent album scans; 0 pauses scanning
        #[arg(long)]
        workers: Option<u32>,
        /// Time between periodic full scans, e.g. "30m"; "0s" disables
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
}

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}
