use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Multi-provider LLM gateway.
#[derive(Debug, Parser)]
#[command(name = "tingly", version, about)]
pub(crate) struct Args {
    /// Path to the configuration file. Falls back to
    /// `$TINGLY_CONFIG_DIR/tingly.json`, then `./tingly.json`.
    #[arg(short, long, env = "TINGLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on; overrides the configuration file.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. `info` or `gateway=debug,server=debug`.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

impl Args {
    /// Resolve the configuration file path.
    pub fn config_path(&self) -> PathBuf {
        if let Some(path) = &self.config {
            return path.clone();
        }

        if let Ok(dir) = std::env::var("TINGLY_CONFIG_DIR")
            && !dir.is_empty()
        {
            return PathBuf::from(dir).join("tingly.json");
        }

        PathBuf::from("tingly.json")
    }
}
