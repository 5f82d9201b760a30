//! Mock platform for testing
//!
//! Scripted implementation of [`ScanPlatform`] for unit tests: canned scope
//! answers, parameter tables, per-job status scripts, injectable transient
//! faults, and full capture of everything submitted.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    HttpExchange, JobId, JobState, JobStatus, MessageId, Param, ScanPlatform,
};
use crate::error::{PlatformError, Result};

/// Mock platform client for testing.
///
/// Configure behavior via builder methods, then assert on the captured
/// submissions and call counts.
///
/// # Example
/// ```ignore
/// let mock = MockPlatform::new()
///     .with_scope_prefix("http://example.com")
///     .with_job_script("job-1", vec![(50, JobState::Running), (100, JobState::Finished)]);
/// ```
pub struct MockPlatform {
    /// Origin prefixes considered in scope
    scope: Arc<Mutex<Vec<String>>>,
    /// Parameter table: first entry whose key appears in the request wins
    params: Arc<Mutex<Vec<(String, Vec<Param>)>>>,
    /// Job ids handed out by active_scan, in order
    job_ids: Arc<Mutex<VecDeque<String>>>,
    /// Status script per job; the last entry repeats once the script runs dry
    job_scripts: Arc<Mutex<HashMap<String, VecDeque<JobStatus>>>>,
    /// Remaining job_status calls that fail before the fault clears
    job_status_faults: Arc<Mutex<u32>>,
    /// Paths passed to restore_session / save_session
    pub restored: Arc<Mutex<Vec<PathBuf>>>,
    pub saved: Arc<Mutex<Vec<PathBuf>>>,
    /// URLs submitted to each scanner
    pub passive_urls: Arc<Mutex<Vec<String>>>,
    pub active_urls: Arc<Mutex<Vec<String>>>,
    /// Crawl seeds received
    pub crawl_seeds: Arc<Mutex<Vec<String>>>,
    /// Request rewrites received
    pub rewrites: Arc<Mutex<Vec<(MessageId, Vec<u8>)>>>,
    /// Prompt flags passed to terminate
    pub terminations: Arc<Mutex<Vec<bool>>>,
    /// Whether save_session should fail
    fail_saves: Arc<Mutex<bool>>,
    /// Call counts for verification
    pub calls: Arc<Mutex<CallCounts>>,
}

/// Tracks platform call counts for test verification
#[derive(Default, Debug, Clone)]
pub struct CallCounts {
    pub restore_session: usize,
    pub save_session: usize,
    pub is_in_scope: usize,
    pub include_in_scope: usize,
    pub start_crawl: usize,
    pub passive_scan: usize,
    pub active_scan: usize,
    pub job_status: usize,
    pub request_params: usize,
    pub rewrite_request: usize,
    pub terminate: usize,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            scope: Arc::new(Mutex::new(Vec::new())),
            params: Arc::new(Mutex::new(Vec::new())),
            job_ids: Arc::new(Mutex::new(VecDeque::new())),
            job_scripts: Arc::new(Mutex::new(HashMap::new())),
            job_status_faults: Arc::new(Mutex::new(0)),
            restored: Arc::new(Mutex::new(Vec::new())),
            saved: Arc::new(Mutex::new(Vec::new())),
            passive_urls: Arc::new(Mutex::new(Vec::new())),
            active_urls: Arc::new(Mutex::new(Vec::new())),
            crawl_seeds: Arc::new(Mutex::new(Vec::new())),
            rewrites: Arc::new(Mutex::new(Vec::new())),
            terminations: Arc::new(Mutex::new(Vec::new())),
            fail_saves: Arc::new(Mutex::new(false)),
            calls: Arc::new(Mutex::new(CallCounts::default())),
        }
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs starting with `prefix` answer in-scope.
    pub async fn with_scope_prefix(self, prefix: impl Into<String>) -> Self {
        self.scope.lock().await.push(prefix.into());
        self
    }

    /// Requests containing `key` report `params`.
    pub async fn with_params(self, key: impl Into<String>, params: Vec<Param>) -> Self {
        self.params.lock().await.push((key.into(), params));
        self
    }

    /// Queue the next job id `active_scan` hands out.
    pub async fn with_job_id(self, id: impl Into<String>) -> Self {
        self.job_ids.lock().await.push_back(id.into());
        self
    }

    /// Script the statuses `job_status` reports for `id`, in order; the
    /// final status repeats on further polls.
    pub async fn with_job_script(self, id: impl Into<String>, script: Vec<(u8, JobState)>) -> Self {
        let statuses = script
            .into_iter()
            .map(|(percent, state)| JobStatus { percent, state })
            .collect();
        self.job_scripts.lock().await.insert(id.into(), statuses);
        self
    }

    /// The next `count` calls to `job_status` fail with a transient error.
    pub async fn with_job_status_faults(self, count: u32) -> Self {
        *self.job_status_faults.lock().await = count;
        self
    }

    /// Every `save_session` call fails.
    pub async fn with_failing_saves(self) -> Self {
        *self.fail_saves.lock().await = true;
        self
    }

    pub async fn call_counts(&self) -> CallCounts {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ScanPlatform for MockPlatform {
    async fn restore_session(&self, path: &Path) -> Result<()> {
        self.calls.lock().await.restore_session += 1;
        self.restored.lock().await.push(path.to_path_buf());
        Ok(())
    }

    async fn save_session(&self, path: &Path) -> Result<()> {
        self.calls.lock().await.save_session += 1;
        if *self.fail_saves.lock().await {
            return Err(PlatformError::SaveFailed {
                path: path.display().to_string(),
                reason: "mock save failure".to_string(),
            }
            .into());
        }
        self.saved.lock().await.push(path.to_path_buf());
        Ok(())
    }

    async fn is_in_scope(&self, url: &str) -> Result<bool> {
        self.calls.lock().await.is_in_scope += 1;
        let scope = self.scope.lock().await;
        Ok(scope.iter().any(|prefix| url.starts_with(prefix.as_str())))
    }

    async fn include_in_scope(&self, origin: &str) -> Result<()> {
        self.calls.lock().await.include_in_scope += 1;
        self.scope.lock().await.push(origin.to_string());
        Ok(())
    }

    async fn start_crawl(&self, seed: &str) -> Result<()> {
        self.calls.lock().await.start_crawl += 1;
        self.crawl_seeds.lock().await.push(seed.to_string());
        Ok(())
    }

    async fn passive_scan(&self, exchange: &HttpExchange) -> Result<()> {
        self.calls.lock().await.passive_scan += 1;
        self.passive_urls.lock().await.push(exchange.url.clone());
        Ok(())
    }

    async fn active_scan(&self, exchange: &HttpExchange) -> Result<JobId> {
        let count = {
            let mut calls = self.calls.lock().await;
            calls.active_scan += 1;
            calls.active_scan
        };
        self.active_urls.lock().await.push(exchange.url.clone());
        let id = self
            .job_ids
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| format!("job-{count}"));
        Ok(JobId(id))
    }

    async fn job_status(&self, job: &JobId) -> Result<JobStatus> {
        self.calls.lock().await.job_status += 1;
        {
            let mut faults = self.job_status_faults.lock().await;
            if *faults > 0 {
                *faults -= 1;
                return Err(PlatformError::ServerError("transient mock fault".to_string()).into());
            }
        }
        let mut scripts = self.job_scripts.lock().await;
        let script = scripts
            .get_mut(&job.0)
            .ok_or_else(|| PlatformError::UnknownJob(job.0.clone()))?;
        let status = if script.len() > 1 {
            script.pop_front().unwrap_or(JobStatus {
                percent: 0,
                state: JobState::Queued,
            })
        } else {
            *script.front().unwrap_or(&JobStatus {
                percent: 0,
                state: JobState::Queued,
            })
        };
        Ok(status)
    }

    async fn request_params(&self, request: &[u8]) -> Result<Vec<Param>> {
        self.calls.lock().await.request_params += 1;
        let table = self.params.lock().await;
        let haystack = String::from_utf8_lossy(request);
        Ok(table
            .iter()
            .find(|(key, _)| haystack.contains(key.as_str()))
            .map(|(_, params)| params.clone())
            .unwrap_or_default())
    }

    async fn rewrite_request(&self, message: MessageId, request: Vec<u8>) -> Result<()> {
        self.calls.lock().await.rewrite_request += 1;
        self.rewrites.lock().await.push((message, request));
        Ok(())
    }

    async fn terminate(&self, prompt: bool) -> Result<()> {
        self.calls.lock().await.terminate += 1;
        self.terminations.lock().await.push(prompt);
        Ok(())
    }
}
