//! Abstract surface of the external security-testing platform
//!
//! The platform owns the crawler, both scanners, scope matching, parameter
//! extraction, and the session-snapshot format. This module defines the
//! operations we consume and the event stream the platform feeds us;
//! everything behind them is the platform's business.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod http;
#[cfg(test)]
pub mod mock;

#[cfg(test)]
#[allow(unused_imports)]
pub use mock::MockPlatform;
pub use http::HttpPlatform;

/// Operations the platform exposes to the driver.
///
/// All methods are request/response; asynchronous happenings (observed
/// traffic, discovered issues, the platform closing) arrive separately as
/// [`PlatformEvent`] values over a channel.
#[async_trait]
pub trait ScanPlatform: Send + Sync {
    /// Restore a previously saved session snapshot.
    async fn restore_session(&self, path: &Path) -> Result<()>;

    /// Save the full session state to `path`, overwriting wholesale.
    async fn save_session(&self, path: &Path) -> Result<()>;

    /// Whether `url` falls inside the configured testing scope.
    async fn is_in_scope(&self, url: &str) -> Result<bool>;

    /// Authorize an origin for automated testing.
    async fn include_in_scope(&self, origin: &str) -> Result<()>;

    /// Start crawling from the seed URL.
    async fn start_crawl(&self, seed: &str) -> Result<()>;

    /// Submit an observed exchange for passive analysis.
    async fn passive_scan(&self, exchange: &HttpExchange) -> Result<()>;

    /// Submit an observed exchange for active scanning; returns the handle
    /// of the scan job the platform queued for it.
    async fn active_scan(&self, exchange: &HttpExchange) -> Result<JobId>;

    /// Current completion state of an active scan job.
    async fn job_status(&self, job: &JobId) -> Result<JobStatus>;

    /// Parameters the platform extracted from a raw request.
    async fn request_params(&self, request: &[u8]) -> Result<Vec<Param>>;

    /// Replace the outgoing bytes of an in-flight request.
    async fn rewrite_request(&self, message: MessageId, request: Vec<u8>) -> Result<()>;

    /// Ask the platform process to exit. With `prompt` the platform may ask
    /// its operator for confirmation instead of exiting unconditionally.
    async fn terminate(&self, prompt: bool) -> Result<()>;
}

/// Opaque handle to an in-progress active scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies an in-flight message for request rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageId(pub u64);

/// Completion state of an active scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// 0..=100
    pub percent: u8,
    pub state: JobState,
}

impl JobStatus {
    /// A job leaves the tracked collection once it is fully complete or the
    /// platform has given up on it.
    pub fn is_settled(&self) -> bool {
        self.percent >= 100 || matches!(self.state, JobState::Abandoned | JobState::Cancelling)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    /// The platform stopped retrying this job (too many errors).
    Abandoned,
    /// The job is waiting to cancel and will never complete.
    Cancelling,
}

/// One parameter the platform extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Url,
    Body,
    Cookie,
    Other,
}

impl Param {
    pub fn is_cookie(&self) -> bool {
        self.kind == ParamKind::Cookie
    }
}

/// Issue severity as reported by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
    Information,
}

impl Severity {
    pub fn is_informational(&self) -> bool {
        matches!(self, Severity::Information)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Information => "Information",
        };
        write!(f, "{s}")
    }
}

/// Scanner confidence in a reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Certain,
    Firm,
    Tentative,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::Certain => "Certain",
            Confidence::Firm => "Firm",
            Confidence::Tentative => "Tentative",
        };
        write!(f, "{s}")
    }
}

/// A discovered vulnerability or observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub remediation: String,
    pub severity: Severity,
    pub confidence: Confidence,
}

/// Where a message is headed relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Request => write!(f, ">> request"),
            Direction::Response => write!(f, "<< response"),
        }
    }
}

/// Transport facts about an observed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMeta {
    pub id: MessageId,
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

/// A complete observed request/response pair, as handed to the scanners.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub url: String,
    pub request: Vec<u8>,
    pub response: Vec<u8>,
}

/// Notifications the platform pushes at the driver.
#[derive(Debug)]
pub enum PlatformEvent {
    /// The crawler is about to send a request.
    RequestSeen {
        meta: MessageMeta,
        url: String,
        request: Vec<u8>,
    },
    /// The crawler received a response.
    ResponseSeen {
        meta: MessageMeta,
        url: String,
        status: u16,
        request: Vec<u8>,
        response: Vec<u8>,
    },
    /// The scanner reported an issue.
    IssueFound(IssueRecord),
    /// The platform is shutting down.
    Closing,
}

/// Responses with this status are neither listed nor scanned.
pub const STATUS_NOT_FOUND: u16 = 404;
