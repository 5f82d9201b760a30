//! REST adapter for a locally running platform daemon
//!
//! The platform exposes its operations as a small JSON API; raw message
//! bytes cross the wire base64-encoded. Events are fetched with a long-poll
//! loop and forwarded into an mpsc channel, which is the only event surface
//! the rest of the crate sees.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    HttpExchange, IssueRecord, JobId, JobStatus, MessageId, MessageMeta, Param, PlatformEvent,
    ScanPlatform,
};
use crate::error::{PlatformError, Result};

/// Default endpoint of the platform daemon.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7090";

/// Rate limit on platform API calls: 20 per second. Status polling and
/// event long-polls stay well under this; it exists to keep a burst of
/// crawl responses from flooding the daemon with scan submissions.
const RATE_LIMIT_PER_SECOND: u32 = 20;

/// Seconds the daemon holds an event long-poll open before returning empty.
const EVENT_POLL_SECS: u64 = 20;

/// Consecutive failed event polls before the stream is declared lost.
const EVENT_POLL_MAX_FAILURES: u32 = 3;

/// HTTP client for the platform's REST API.
pub struct HttpPlatform {
    http: ReqwestClient,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HttpPlatform {
    /// Create a new platform client against `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = ReqwestClient::builder()
            // Longer than the event long-poll window, shorter than forever.
            .timeout(Duration::from_secs(EVENT_POLL_SECS + 10))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        let quota = Quota::per_second(
            std::num::NonZeroU32::new(RATE_LIMIT_PER_SECOND)
                .unwrap_or(std::num::NonZeroU32::MIN),
        );
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            rate_limiter,
        })
    }

    /// Spawn the event pump: long-polls `/events` and forwards every event
    /// into `tx`. Stops after forwarding `Closing`, when the receiver goes
    /// away, or once the stream is unreachable for several polls in a row.
    pub fn spawn_event_pump(self: Arc<Self>, tx: mpsc::Sender<PlatformEvent>) -> JoinHandle<()> {
        let client = self;
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                match client.poll_events().await {
                    Ok(events) => {
                        failures = 0;
                        for event in events {
                            let closing = matches!(event, PlatformEvent::Closing);
                            if tx.send(event).await.is_err() {
                                debug!("event receiver dropped, stopping event pump");
                                return;
                            }
                            if closing {
                                debug!("platform announced closing, stopping event pump");
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        if failures >= EVENT_POLL_MAX_FAILURES {
                            warn!("event stream lost after {failures} failed polls: {err}");
                            return;
                        }
                        warn!("event poll failed ({err}), retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }

    async fn poll_events(&self) -> Result<Vec<PlatformEvent>> {
        let wrapper: EventBatch = self
            .get(&format!("/events?timeout={EVENT_POLL_SECS}"))
            .await?;
        wrapper
            .events
            .into_iter()
            .map(PlatformEvent::try_from)
            .collect()
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        self.request(reqwest::Method::GET, path, None).await
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.request(reqwest::Method::POST, path, Some(body)).await
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, &url);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-ApiKey", key);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(PlatformError::from)?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let data = response.json::<T>().await.map_err(|e| {
                    PlatformError::InvalidResponse(format!("Failed to parse response: {e}"))
                })?;
                Ok(data)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PlatformError::Unauthorized.into())
            }
            StatusCode::NOT_FOUND => {
                let msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "resource not found".to_string());
                Err(PlatformError::UnknownJob(msg).into())
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "bad request".to_string());
                Err(PlatformError::BadRequest(msg).into())
            }
            status if status.is_server_error() => {
                let msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("server error: {status}"));
                Err(PlatformError::ServerError(msg).into())
            }
            _ => Err(PlatformError::InvalidResponse(format!(
                "Unexpected status code: {status}"
            ))
            .into()),
        }
    }
}

#[async_trait]
impl ScanPlatform for HttpPlatform {
    async fn restore_session(&self, path: &Path) -> Result<()> {
        let _: Ack = self
            .post("/session/restore", json!({ "path": path }))
            .await
            .map_err(|e| PlatformError::RestoreFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn save_session(&self, path: &Path) -> Result<()> {
        let _: Ack = self
            .post("/session/save", json!({ "path": path }))
            .await
            .map_err(|e| PlatformError::SaveFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn is_in_scope(&self, url: &str) -> Result<bool> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ScopeCheck {
            in_scope: bool,
        }
        let encoded = urlencode(url);
        let check: ScopeCheck = self.get(&format!("/scope/check?url={encoded}")).await?;
        Ok(check.in_scope)
    }

    async fn include_in_scope(&self, origin: &str) -> Result<()> {
        let _: Ack = self.post("/scope/include", json!({ "origin": origin })).await?;
        Ok(())
    }

    async fn start_crawl(&self, seed: &str) -> Result<()> {
        let _: Ack = self.post("/crawl/start", json!({ "url": seed })).await?;
        Ok(())
    }

    async fn passive_scan(&self, exchange: &HttpExchange) -> Result<()> {
        let _: Ack = self
            .post("/scan/passive", exchange_body(exchange, true))
            .await?;
        Ok(())
    }

    async fn active_scan(&self, exchange: &HttpExchange) -> Result<JobId> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Queued {
            job_id: String,
        }
        let queued: Queued = self
            .post("/scan/active", exchange_body(exchange, false))
            .await?;
        Ok(JobId(queued.job_id))
    }

    async fn job_status(&self, job: &JobId) -> Result<JobStatus> {
        self.get(&format!("/scan/job/{job}")).await
    }

    async fn request_params(&self, request: &[u8]) -> Result<Vec<Param>> {
        #[derive(Deserialize)]
        struct Params {
            params: Vec<Param>,
        }
        let wrapper: Params = self
            .post("/message/params", json!({ "request": BASE64.encode(request) }))
            .await?;
        Ok(wrapper.params)
    }

    async fn rewrite_request(&self, message: MessageId, request: Vec<u8>) -> Result<()> {
        let _: Ack = self
            .post(
                &format!("/message/{}/request", message.0),
                json!({ "request": BASE64.encode(&request) }),
            )
            .await?;
        Ok(())
    }

    async fn terminate(&self, prompt: bool) -> Result<()> {
        let _: Ack = self.post("/shutdown", json!({ "prompt": prompt })).await?;
        Ok(())
    }
}

/// Trivial `{"ok": true}`-style acknowledgement.
#[derive(Deserialize)]
struct Ack {
    #[serde(default)]
    #[allow(dead_code)]
    ok: bool,
}

fn exchange_body(exchange: &HttpExchange, include_response: bool) -> serde_json::Value {
    let mut body = json!({
        "host": exchange.host,
        "port": exchange.port,
        "secure": exchange.secure,
        "request": BASE64.encode(&exchange.request),
    });
    if include_response {
        body["response"] = json!(BASE64.encode(&exchange.response));
    }
    body
}

/// Percent-encode a URL for use as a query value.
fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

// ---------------------------------------------------------------------------
// Wire-level event representation
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct EventBatch {
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Request {
        id: u64,
        host: String,
        port: u16,
        secure: bool,
        url: String,
        request: String,
    },
    Response {
        id: u64,
        host: String,
        port: u16,
        secure: bool,
        url: String,
        status: u16,
        request: String,
        response: String,
    },
    Issue(IssueRecord),
    Closing,
}

impl TryFrom<WireEvent> for PlatformEvent {
    type Error = crate::error::Error;

    fn try_from(wire: WireEvent) -> Result<PlatformEvent> {
        let decode = |field: &str, data: &str| -> Result<Vec<u8>> {
            BASE64.decode(data).map_err(|e| {
                PlatformError::InvalidResponse(format!("bad base64 in event {field}: {e}")).into()
            })
        };
        Ok(match wire {
            WireEvent::Request {
                id,
                host,
                port,
                secure,
                url,
                request,
            } => PlatformEvent::RequestSeen {
                meta: MessageMeta {
                    id: MessageId(id),
                    host,
                    port,
                    secure,
                },
                url,
                request: decode("request", &request)?,
            },
            WireEvent::Response {
                id,
                host,
                port,
                secure,
                url,
                status,
                request,
                response,
            } => PlatformEvent::ResponseSeen {
                meta: MessageMeta {
                    id: MessageId(id),
                    host,
                    port,
                    secure,
                },
                url,
                status,
                request: decode("request", &request)?,
                response: decode("response", &response)?,
            },
            WireEvent::Issue(issue) => PlatformEvent::IssueFound(issue),
            WireEvent::Closing => PlatformEvent::Closing,
        })
    }
}
