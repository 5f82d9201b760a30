//! CLI surface
//!
//! Two or three positionals, matching the classic invocation:
//! `scanpilot URL OUTNAME [COOKIE]`. Everything else is a flag with a
//! `SCANPILOT_*` environment fallback.

use std::path::PathBuf;

use clap::Parser;

/// Automated crawl-and-scan driver for a security-testing platform
#[derive(Parser, Debug)]
#[command(name = "scanpilot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Seed URL to start crawling from
    pub url: String,

    /// Filename without extension for the session, issues, URL list and
    /// traffic files
    pub outname: String,

    /// Cookie string appended to all in-scope requests (for targets that
    /// require authentication)
    pub cookie: Option<String>,

    /// Base delay in seconds driving idle detection and job polling
    #[arg(long, env = "SCANPILOT_DELAY", hide_env = true)]
    pub delay: Option<u64>,

    /// Platform REST endpoint
    #[arg(long, env = "SCANPILOT_PLATFORM", hide_env = true)]
    pub platform: Option<String>,

    /// Platform API key
    #[arg(long, env = "SCANPILOT_API_KEY", hide_env = true)]
    pub api_key: Option<String>,

    /// Session snapshot to restore before scanning starts
    #[arg(long, env = "SCANPILOT_BASELINE", hide_env = true)]
    pub baseline: Option<PathBuf>,

    /// Ask for confirmation before shutting the platform down
    #[arg(long, env = "SCANPILOT_CONFIRM_EXIT", hide_env = true)]
    pub confirm_exit: bool,

    /// Override config file location
    #[arg(long, env = "SCANPILOT_CONFIG", hide_env = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "SCANPILOT_DEBUG", hide_env = true)]
    pub debug: bool,
}
