use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "prism")]
#[command(about = "Property-management report intake and analysis", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file; falls back to $PRISM_CONFIG, then the user config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = crate::logging::DEFAULT_FILTER)]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch intake folders and run both queue lanes until Ctrl-C
    Run,
    /// Analyse one file now and print the result
    Process { file: PathBuf },
    /// Queue every eligible top-level file of a directory and drain the queues
    Batch {
        dir: PathBuf,
        /// Give up waiting after this many seconds.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Feed an inbound-email JSON payload through webhook intake
    Webhook { payload: PathBuf },
    /// Queue statistics and usage summary
    Stats {
        #[arg(long, default_value_t = 30)]
        days: i64,
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Build and send the role digest
    Digest {
        /// Window length; defaults to notifications.digest_window_days.
        #[arg(long)]
        days: Option<i64>,
    },
}
