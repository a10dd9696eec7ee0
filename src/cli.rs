//! Configuration (C6): CLI flags plus a validated, ready-to-use [`Config`].

use crate::server::BindAddr;
use clap::Parser;
use eyre::Result;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "scoopd",
    version,
    about = "Long-running TCP daemon maintaining an in-memory package dependency index"
)]
pub struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Per-connection idle timeout, in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,

    /// Location of scoop's data directory.
    #[arg(long, default_value = "./scoop-data")]
    pub dir: PathBuf,

    /// Which interfaces to bind: `loopback` (default, safe) or `all`.
    #[arg(long, value_enum, default_value = "loopback")]
    pub bind: BindAddr,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub idle_timeout: Duration,
    pub dir: PathBuf,
    pub bind: BindAddr,
    pub verbose: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        if args.timeout == 0 {
            tracing::warn!("--timeout is 0; idle connections will be dropped almost immediately");
        }

        Ok(Config {
            port: args.port,
            idle_timeout: Duration::from_secs(args.timeout.max(1)),
            dir: args.dir,
            bind: args.bind,
            verbose: args.verbose,
        })
    }
}
