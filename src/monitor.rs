//! Background monitor: crawl-idle detection and scan-job draining
//!
//! The monitor is the one background task of the run, spawned exactly once
//! from initialization. It walks the run through its phases: wait for the
//! crawl to go idle, drain the scan-job collection, then hand off to the
//! shutdown controller. Any unrecoverable error short-circuits to the same
//! controller through the fault path, so already-collected issues are
//! preserved either way.

use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::Result;
use crate::orchestrator::{Orchestrator, ScanJob};
use crate::platform::JobId;
use crate::shutdown::Outcome;

/// Consecutive failed drain passes tolerated before the run is declared
/// unrecoverable. A single failure is normal (the platform may be busy or a
/// job may vanish mid-poll); a long streak means the platform is gone.
const MAX_CONSECUTIVE_FAILED_PASSES: u32 = 5;

/// Phases of a run. Transitions only ever move rightwards; the fault path
/// can be taken from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Crawling,
    Draining,
    Finalizing,
    Terminated,
}

/// Spawn the monitor task. Called once, from `run()`, right after the
/// crawl starts.
pub fn spawn(orch: Arc<Orchestrator>) -> JoinHandle<()> {
    tokio::spawn(run(orch))
}

pub async fn run(orch: Arc<Orchestrator>) {
    if let Err(err) = drive(&orch).await {
        error!("monitor loop hit an unrecoverable error: {err}");
        orch.shutdown()
            .finalize(orch.platform(), Outcome::Fault)
            .await;
    }
}

async fn drive(orch: &Orchestrator) -> Result<()> {
    let timing = orch.timing();
    let bar = ProgressBar::new_spinner();
    let mut consecutive_failures = 0u32;
    let mut phase = Phase::Crawling;
    info!("monitor started, waiting for the crawl to go idle");

    while phase != Phase::Finalizing {
        match phase {
            Phase::Crawling => {
                sleep(timing.poll_interval).await;
                if orch.idle_for() >= timing.idle_threshold {
                    info!(
                        "no request observed for {:?}, waiting for scan jobs to finish",
                        timing.idle_threshold
                    );
                    bar.enable_steady_tick(Duration::from_millis(120));
                    phase = Phase::Draining;
                }
            }
            Phase::Draining => {
                let pending = orch.pending_jobs();
                if pending.is_empty() {
                    phase = Phase::Finalizing;
                    continue;
                }
                info!("{} remaining jobs in the scan queue", pending.len());
                bar.set_message(format!("{} scan jobs remaining", pending.len()));

                match poll_pass(orch, &pending).await {
                    Ok(settled) => {
                        consecutive_failures = 0;
                        if !settled.is_empty() {
                            orch.remove_jobs(&settled);
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILED_PASSES {
                            bar.finish_and_clear();
                            return Err(err);
                        }
                        warn!("drain pass failed ({err}), retrying on the next poll");
                    }
                }
                sleep(timing.poll_interval).await;
            }
            Phase::Finalizing | Phase::Terminated => break,
        }
    }
    bar.finish_and_clear();

    info!("scanning complete");
    orch.shutdown()
        .finalize(orch.platform(), Outcome::Complete)
        .await;
    phase = Phase::Terminated;
    debug!("monitor finished in {phase:?} phase");
    Ok(())
}

/// Query every job in the snapshot and report the ones that have settled.
/// The first query failure aborts the whole pass; the snapshot is stale by
/// then and the next poll starts fresh.
async fn poll_pass(orch: &Orchestrator, pending: &[ScanJob]) -> Result<Vec<JobId>> {
    let mut settled = Vec::new();
    for job in pending {
        let status = orch.platform().job_status(&job.id).await?;
        if status.is_settled() {
            debug!(
                "scan job {} for {} settled at {}% ({:?})",
                job.id, job.url, status.percent, status.state
            );
            settled.push(job.id.clone());
        }
    }
    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::CookieHeader;
    use crate::orchestrator::Timing;
    use crate::platform::{
        JobState, MessageId, MessageMeta, MockPlatform, Param, ParamKind, PlatformEvent,
    };
    use crate::recorder::{OutputPaths, Recorder};
    use crate::target::Target;

    const DELAY: Duration = Duration::from_secs(30);

    struct Fixture {
        orch: Arc<Orchestrator>,
        platform: Arc<MockPlatform>,
        paths: OutputPaths,
        _dir: tempfile::TempDir,
    }

    fn fixture(platform: MockPlatform, cookie: Option<CookieHeader>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let outname = dir.path().join("run").to_string_lossy().to_string();
        let paths = OutputPaths::for_outname(&outname);
        let recorder = Recorder::create(&paths).unwrap();
        let (target, seed) = Target::resolve("example.com").unwrap();
        let platform = Arc::new(platform);
        let orch = Arc::new(Orchestrator::new(
            Arc::clone(&platform) as Arc<dyn crate::platform::ScanPlatform>,
            target,
            seed.to_string(),
            cookie,
            recorder,
            None,
            paths.session.clone(),
            Timing::from_base_delay(DELAY),
            false,
        ));
        Fixture {
            orch,
            platform,
            paths,
            _dir: dir,
        }
    }

    fn response_event(id: u64, path_q: &str, status: u16) -> PlatformEvent {
        PlatformEvent::ResponseSeen {
            meta: MessageMeta {
                id: MessageId(id),
                host: "example.com".to_string(),
                port: 80,
                secure: false,
            },
            url: format!("http://example.com{path_q}"),
            status,
            request: format!("GET {path_q} HTTP/1.1\r\nHost: example.com\r\n\r\n").into_bytes(),
            response: b"HTTP/1.1 200 OK\r\n\r\n".to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_transition_never_fires_early() {
        let fx = fixture(MockPlatform::new(), None);
        let start = tokio::time::Instant::now();

        // Requests keep arriving every 25s until t=75s.
        let orch = Arc::clone(&fx.orch);
        let toucher = tokio::spawn(async move {
            for _ in 0..3 {
                sleep(Duration::from_secs(25)).await;
                orch.handle_event(PlatformEvent::RequestSeen {
                    meta: MessageMeta {
                        id: MessageId(0),
                        host: "example.com".to_string(),
                        port: 80,
                        secure: false,
                    },
                    url: "http://example.com/".to_string(),
                    request: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
                })
                .await;
            }
        });

        run(Arc::clone(&fx.orch)).await;
        toucher.await.unwrap();

        // The last request landed at t=75s; draining may start no earlier
        // than 75s + the 30s idle threshold.
        assert!(start.elapsed() >= Duration::from_secs(105));
        assert_eq!(fx.platform.call_counts().await.terminate, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_removes_settled_jobs_and_finalizes() {
        let platform = MockPlatform::new()
            .with_scope_prefix("http://example.com")
            .await
            .with_params(
                "/a?x=1",
                vec![Param {
                    name: "x".to_string(),
                    value: "1".to_string(),
                    kind: ParamKind::Url,
                }],
            )
            .await
            .with_job_id("job-1")
            .await
            .with_job_script(
                "job-1",
                vec![(50, JobState::Running), (100, JobState::Finished)],
            )
            .await;
        let fx = fixture(platform, None);

        fx.orch.handle_event(response_event(1, "/a?x=1", 200)).await;
        assert_eq!(fx.orch.job_count(), 1);

        run(Arc::clone(&fx.orch)).await;

        assert_eq!(fx.orch.job_count(), 0);
        let calls = fx.platform.call_counts().await;
        assert!(calls.job_status >= 2, "both scripted polls should happen");
        assert_eq!(calls.save_session, 1);
        assert_eq!(calls.terminate, 1);
        assert_eq!(fx.platform.saved.lock().await[0], fx.paths.session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_jobs_are_dropped_not_waited_for() {
        let platform = MockPlatform::new()
            .with_job_script("job-x", vec![(30, JobState::Abandoned)])
            .await;
        let fx = fixture(platform, None);
        fx.orch.register_job(ScanJob {
            id: JobId("job-x".to_string()),
            url: "http://example.com/x".to_string(),
            submitted_at: chrono::Utc::now(),
        });

        run(Arc::clone(&fx.orch)).await;

        assert_eq!(fx.orch.job_count(), 0);
        assert_eq!(fx.platform.call_counts().await.terminate, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_insertion_is_picked_up_by_a_later_poll() {
        let platform = MockPlatform::new()
            .with_job_script("job-1", vec![(100, JobState::Finished)])
            .await
            .with_job_script("job-2", vec![(100, JobState::Finished)])
            .await;
        let fx = fixture(platform, None);
        fx.orch.register_job(ScanJob {
            id: JobId("job-1".to_string()),
            url: String::new(),
            submitted_at: chrono::Utc::now(),
        });

        // A crawl response still in flight registers another job mid-drain.
        let orch = Arc::clone(&fx.orch);
        let inserter = tokio::spawn(async move {
            sleep(Duration::from_secs(45)).await;
            orch.register_job(ScanJob {
                id: JobId("job-2".to_string()),
                url: String::new(),
                submitted_at: chrono::Utc::now(),
            });
        });

        run(Arc::clone(&fx.orch)).await;
        inserter.await.unwrap();

        assert_eq!(fx.orch.job_count(), 0);
        let calls = fx.platform.call_counts().await;
        assert!(calls.job_status >= 2, "both jobs must have been polled");
        assert_eq!(calls.terminate, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_status_faults_are_retried() {
        let platform = MockPlatform::new()
            .with_job_script("job-1", vec![(100, JobState::Finished)])
            .await
            .with_job_status_faults(2)
            .await;
        let fx = fixture(platform, None);
        fx.orch.register_job(ScanJob {
            id: JobId("job-1".to_string()),
            url: String::new(),
            submitted_at: chrono::Utc::now(),
        });

        run(Arc::clone(&fx.orch)).await;

        let calls = fx.platform.call_counts().await;
        assert_eq!(calls.job_status, 3, "two faults, then the real status");
        assert_eq!(calls.save_session, 1);
        assert_eq!(calls.terminate, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_faults_take_the_error_path() {
        let platform = MockPlatform::new()
            .with_job_script("job-1", vec![(0, JobState::Running)])
            .await
            .with_job_status_faults(MAX_CONSECUTIVE_FAILED_PASSES * 2)
            .await;
        let fx = fixture(platform, None);
        fx.orch.register_job(ScanJob {
            id: JobId("job-1".to_string()),
            url: String::new(),
            submitted_at: chrono::Utc::now(),
        });

        run(Arc::clone(&fx.orch)).await;

        let calls = fx.platform.call_counts().await;
        assert_eq!(calls.job_status, MAX_CONSECUTIVE_FAILED_PASSES as usize);
        // Best-effort save and forced termination still happen.
        assert_eq!(calls.save_session, 1);
        assert_eq!(calls.terminate, 1);
        assert!(fx.orch.shutdown().is_finalized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_scenario() {
        // Seed example.com, no cookie. The crawl finds /a?x=1 (one URL
        // parameter) and /b (not found). Only /a is listed and scanned;
        // after the idle threshold and the single job's completion the
        // session is saved and termination is requested.
        let platform = MockPlatform::new()
            .with_scope_prefix("http://example.com")
            .await
            .with_params(
                "/a?x=1",
                vec![Param {
                    name: "x".to_string(),
                    value: "1".to_string(),
                    kind: ParamKind::Url,
                }],
            )
            .await
            .with_job_id("job-1")
            .await
            .with_job_script(
                "job-1",
                vec![(10, JobState::Running), (100, JobState::Finished)],
            )
            .await;
        let fx = fixture(platform, None);

        fx.orch.initialize().await.unwrap();
        fx.orch.handle_event(response_event(1, "/a?x=1", 200)).await;
        fx.orch.handle_event(response_event(2, "/b", 404)).await;

        run(Arc::clone(&fx.orch)).await;

        let calls = fx.platform.call_counts().await;
        assert_eq!(calls.start_crawl, 1);
        assert_eq!(calls.passive_scan, 1);
        assert_eq!(calls.active_scan, 1);
        assert_eq!(calls.save_session, 1);
        assert_eq!(calls.terminate, 1);
        assert_eq!(
            fx.platform.passive_urls.lock().await.as_slice(),
            ["http://example.com/a?x=1"]
        );
        assert_eq!(fx.platform.terminations.lock().await.as_slice(), [false]);

        let urls = std::fs::read_to_string(&fx.paths.urls).unwrap();
        assert_eq!(urls, "http://example.com/a?x=1\n");
    }
}
