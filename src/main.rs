//! scanpilot - automated crawl-and-scan driver for a security-testing platform
//!
//! Given a seed URL, an output name, and an optional authentication cookie,
//! scanpilot brings the target's origin into the platform's scope, crawls
//! from the seed, feeds discovered endpoints to the passive and active
//! scanners, tracks every scan job to completion, and persists the results
//! (traffic log, issue log, URL list, session snapshot) before shutting the
//! platform down.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

mod cli;
mod config;
mod cookie;
mod error;
mod monitor;
mod orchestrator;
mod platform;
mod recorder;
mod shutdown;
mod summary;
mod target;

use cli::Cli;
use config::Config;
use cookie::CookieHeader;
use error::Result;
use orchestrator::{Orchestrator, Timing};
use platform::{HttpPlatform, ScanPlatform, http::DEFAULT_BASE_URL};
use recorder::{OutputPaths, Recorder};
use target::Target;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .init();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let delay = cli
        .delay
        .or(config.delay_secs)
        .unwrap_or(config::DEFAULT_DELAY_SECS);
    let platform_url = cli
        .platform
        .or(config.platform_url)
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let api_key = cli.api_key.or(config.api_key);
    let baseline = cli.baseline.or(config.baseline_session);

    let (target, seed) = Target::resolve(&cli.url)?;
    let cookie = cli.cookie.as_deref().map(CookieHeader::new);

    // Output files come first: if they cannot be opened there is nothing
    // worth starting.
    let paths = OutputPaths::for_outname(&cli.outname);
    let recorder = Recorder::create(&paths)?;

    let platform = Arc::new(HttpPlatform::new(platform_url, api_key)?);
    let (tx, rx) = mpsc::channel(256);
    let pump = Arc::clone(&platform).spawn_event_pump(tx);

    let orch = Arc::new(Orchestrator::new(
        Arc::clone(&platform) as Arc<dyn ScanPlatform>,
        target,
        seed.to_string(),
        cookie,
        recorder,
        baseline,
        paths.session.clone(),
        Timing::from_base_delay(Duration::from_secs(delay)),
        cli.confirm_exit,
    ));

    orch.initialize().await?;
    let monitor = monitor::spawn(Arc::clone(&orch));

    // The event loop runs until the platform closes or the event stream is
    // lost; the monitor drives the run to finalization in the background.
    orch.run_events(rx).await;
    let _ = monitor.await;
    pump.abort();

    println!("{}", orch.tally().render());
    Ok(())
}
