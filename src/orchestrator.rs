//! Orchestration context and platform event handling
//!
//! One `Orchestrator` is built per run and shared (behind `Arc`) between the
//! event loop and the background monitor. It owns the job collection, the
//! idle clock, and every per-event decision: cookie injection, traffic
//! recording, scan submission, and issue handling.
//!
//! Per-event failures are recoverable by design: they are logged and the
//! event is dropped, never allowed to take down the run.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::cookie::{self, CookieHeader};
use crate::error::Result;
use crate::platform::{
    Direction, HttpExchange, IssueRecord, JobId, MessageMeta, PlatformEvent, ScanPlatform,
    Severity, STATUS_NOT_FOUND,
};
use crate::recorder::Recorder;
use crate::shutdown::ShutdownController;
use crate::summary::{IssueTally, colorize};
use crate::target::Target;

/// Timestamp of the last observed outgoing crawl request.
///
/// A lone atomic holding milliseconds since construction: stored by the
/// event path, loaded by the monitor. Nothing else touches it, so no lock
/// is needed.
#[derive(Debug)]
pub struct IdleClock {
    anchor: tokio::time::Instant,
    last: AtomicU64,
}

impl IdleClock {
    pub fn new() -> Self {
        IdleClock {
            anchor: tokio::time::Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Record that a request was just observed.
    pub fn touch(&self) {
        self.last
            .store(self.anchor.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// How long since the last observed request.
    pub fn idle_for(&self) -> Duration {
        let now = self.anchor.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last.load(Ordering::Relaxed)))
    }
}

/// An in-flight active scan registered with the platform.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub id: JobId,
    pub url: String,
    pub submitted_at: DateTime<Utc>,
}

/// The two cadences of the monitor loop, both derived from the single
/// configured base delay.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// No observed request for this long means the crawl has gone idle.
    pub idle_threshold: Duration,
    /// Sleep between monitor polls.
    pub poll_interval: Duration,
}

impl Timing {
    pub fn from_base_delay(delay: Duration) -> Self {
        Timing {
            idle_threshold: delay,
            poll_interval: delay,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a run needs, constructed once. No ambient globals.
pub struct Orchestrator {
    platform: std::sync::Arc<dyn ScanPlatform>,
    target: Target,
    seed: String,
    cookie: Option<CookieHeader>,
    recorder: Recorder,
    baseline: Option<PathBuf>,
    session_path: PathBuf,
    timing: Timing,
    jobs: Mutex<Vec<ScanJob>>,
    idle: IdleClock,
    tally: IssueTally,
    shutdown: ShutdownController,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: std::sync::Arc<dyn ScanPlatform>,
        target: Target,
        seed: String,
        cookie: Option<CookieHeader>,
        recorder: Recorder,
        baseline: Option<PathBuf>,
        session_path: PathBuf,
        timing: Timing,
        confirm_exit: bool,
    ) -> Self {
        let shutdown = ShutdownController::new(session_path.clone(), confirm_exit);
        Self {
            platform,
            target,
            seed,
            cookie,
            recorder,
            baseline,
            session_path,
            timing,
            jobs: Mutex::new(Vec::new()),
            idle: IdleClock::new(),
            tally: IssueTally::new(),
            shutdown,
        }
    }

    pub fn platform(&self) -> &dyn ScanPlatform {
        &*self.platform
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub fn tally(&self) -> &IssueTally {
        &self.tally
    }

    pub fn idle_for(&self) -> Duration {
        self.idle.idle_for()
    }

    /// One-time startup against the platform: restore the baseline session
    /// if one is configured, bring the target origin into scope, and start
    /// the crawl. Any failure here is fatal; nothing has been collected yet.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(baseline) = &self.baseline {
            info!("restoring session from '{}'", baseline.display());
            self.platform.restore_session(baseline).await?;
        }

        info!("adding {} to scope, crawl and scanners", self.target.host);
        if !self.platform.is_in_scope(&self.target.scope_root()).await? {
            self.platform.include_in_scope(&self.target.origin()).await?;
        }

        match &self.cookie {
            Some(cookie) => info!(
                "including '{}' on all in-scope requests",
                cookie.as_str()
            ),
            None => info!("no cookie provided, using cookies set during the crawl"),
        }

        self.idle.touch();
        info!("starting crawl on {}", self.seed);
        self.platform.start_crawl(&self.seed).await?;
        Ok(())
    }

    /// Consume platform events until the channel closes or the platform
    /// announces it is closing. Log writers are flushed on the way out
    /// whichever way the loop ends.
    pub async fn run_events(&self, mut rx: mpsc::Receiver<PlatformEvent>) {
        while let Some(event) = rx.recv().await {
            if matches!(event, PlatformEvent::Closing) {
                info!("platform is closing, flushing logs");
                break;
            }
            self.handle_event(event).await;
        }
        self.recorder.close();
    }

    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::RequestSeen { meta, url, request } => {
                self.on_request(meta, url, request).await
            }
            PlatformEvent::ResponseSeen {
                meta,
                url,
                status,
                request,
                response,
            } => self.on_response(meta, url, status, request, response).await,
            PlatformEvent::IssueFound(issue) => self.on_issue(issue).await,
            PlatformEvent::Closing => {}
        }
    }

    /// Outgoing crawl request: bump the idle clock, log the traffic, and
    /// inject the configured cookie into in-scope requests.
    async fn on_request(&self, meta: MessageMeta, url: String, request: Vec<u8>) {
        self.idle.touch();
        self.recorder.record_traffic(&meta, Direction::Request, &request);

        let Some(cookie) = &self.cookie else {
            return;
        };
        match self.platform.is_in_scope(&url).await {
            Ok(true) => match cookie::inject(&request, cookie) {
                Ok(rewritten) => {
                    if let Err(err) = self.platform.rewrite_request(meta.id, rewritten).await {
                        warn!("could not rewrite request for {url}: {err}");
                    }
                }
                Err(err) => warn!("cookie injection failed for {url}, request unmodified: {err}"),
            },
            Ok(false) => {}
            Err(err) => warn!("scope check failed for {url}: {err}"),
        }
    }

    /// Crawl response: log it, list the URL, and feed the scanners.
    ///
    /// "Not found" responses are dead ends: not listed, not scanned.
    /// Everything else in scope goes to the passive scanner; it also goes
    /// to the active scanner when the request carries at least one
    /// non-cookie parameter, and the returned job joins the collection.
    async fn on_response(
        &self,
        meta: MessageMeta,
        url: String,
        status: u16,
        request: Vec<u8>,
        response: Vec<u8>,
    ) {
        self.recorder.record_traffic(&meta, Direction::Response, &response);

        if status == STATUS_NOT_FOUND {
            debug!("skipping {url} ({status})");
            return;
        }
        self.recorder.record_url(&url);

        match self.platform.is_in_scope(&url).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!("scope check failed for {url}: {err}");
                return;
            }
        }

        let exchange = HttpExchange {
            host: meta.host.clone(),
            port: meta.port,
            secure: meta.secure,
            url: url.clone(),
            request,
            response,
        };

        if let Err(err) = self.platform.passive_scan(&exchange).await {
            warn!("passive scan submission failed for {url}: {err}");
        }

        let params = match self.platform.request_params(&exchange.request).await {
            Ok(params) => params,
            Err(err) => {
                warn!("parameter extraction failed for {url}: {err}");
                return;
            }
        };
        if params.iter().any(|p| !p.is_cookie()) {
            match self.platform.active_scan(&exchange).await {
                Ok(id) => {
                    debug!("active scan {id} queued for {url}");
                    self.register_job(ScanJob {
                        id,
                        url,
                        submitted_at: Utc::now(),
                    });
                }
                Err(err) => warn!("active scan submission failed for {url}: {err}"),
            }
        }
    }

    /// Scanner issue: tally it, announce anything non-informational, save
    /// the session immediately on a high-severity finding, and append the
    /// issue line.
    async fn on_issue(&self, issue: IssueRecord) {
        self.tally.add(issue.severity);

        if !issue.severity.is_informational() {
            println!(
                "scanner: {} {}: {}",
                colorize(issue.severity),
                issue.name,
                issue.url
            );
        }
        if issue.severity == Severity::High {
            if let Err(err) = self.platform.save_session(&self.session_path).await {
                warn!("snapshot save after high-severity issue failed: {err}");
            }
        }

        self.recorder.record_issue(&issue);
    }

    // Job collection access for the monitor. The lock is held only for the
    // structural operation itself, never across an await.

    pub(crate) fn register_job(&self, job: ScanJob) {
        lock(&self.jobs).push(job);
    }

    /// Snapshot of the current job collection, taken under the lock and
    /// polled outside it.
    pub fn pending_jobs(&self) -> Vec<ScanJob> {
        lock(&self.jobs).clone()
    }

    /// Drop the given jobs from the collection. Insertions that happened
    /// since the snapshot was taken are untouched.
    pub fn remove_jobs(&self, settled: &[JobId]) {
        lock(&self.jobs).retain(|job| !settled.contains(&job.id));
    }

    pub fn job_count(&self) -> usize {
        lock(&self.jobs).len()
    }
}
