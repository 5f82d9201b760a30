//! Append-only run artifacts: traffic log, issue log, URL list
//!
//! Every append is flushed immediately so a run that dies keeps everything
//! collected up to that point. A failed write is reported and skipped; it
//! never aborts processing of later events.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{error, warn};

use crate::platform::{Direction, IssueRecord, MessageMeta};

const TRAFFIC_DELIMITER: &str = "======================================================";

/// Owns the three output writers, one lock per file.
pub struct Recorder {
    traffic: Mutex<BufWriter<File>>,
    issues: Mutex<BufWriter<File>>,
    urls: Mutex<BufWriter<File>>,
}

/// Paths derived from the OUTNAME argument.
pub struct OutputPaths {
    pub session: PathBuf,
    pub traffic: PathBuf,
    pub issues: PathBuf,
    pub urls: PathBuf,
}

impl OutputPaths {
    pub fn for_outname(outname: &str) -> Self {
        Self {
            session: PathBuf::from(format!("{outname}.session")),
            traffic: PathBuf::from(format!("{outname}.traffic")),
            issues: PathBuf::from(format!("{outname}.issues")),
            urls: PathBuf::from(format!("{outname}.urls")),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open_append(path: &PathBuf) -> std::io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl Recorder {
    /// Open (or extend) the three log files. Failure here is fatal: the run
    /// has produced nothing yet and cannot persist anything.
    pub fn create(paths: &OutputPaths) -> std::io::Result<Self> {
        Ok(Self {
            traffic: Mutex::new(open_append(&paths.traffic)?),
            issues: Mutex::new(open_append(&paths.issues)?),
            urls: Mutex::new(open_append(&paths.urls)?),
        })
    }

    /// Append one delimited traffic block.
    pub fn record_traffic(&self, meta: &MessageMeta, direction: Direction, raw: &[u8]) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let scheme = if meta.secure { "https" } else { "http" };
        let mut writer = lock(&self.traffic);
        let result = writeln!(
            writer,
            "{timestamp} {scheme}://{}:{} {direction}\n{TRAFFIC_DELIMITER}\n{}\n{TRAFFIC_DELIMITER}",
            meta.host,
            meta.port,
            String::from_utf8_lossy(raw),
        )
        .and_then(|_| writer.flush());
        if let Err(err) = result {
            warn!("could not append to traffic log: {err}");
        }
    }

    /// Append one tab-delimited issue line.
    pub fn record_issue(&self, issue: &IssueRecord) {
        let mut writer = lock(&self.issues);
        let result = writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{} ({})",
            issue.url,
            issue.name,
            issue.background,
            issue.detail,
            issue.remediation,
            issue.severity,
            issue.confidence,
        )
        .and_then(|_| writer.flush());
        if let Err(err) = result {
            warn!("could not append to issue log: {err}");
        }
    }

    /// Append one discovered URL.
    pub fn record_url(&self, url: &str) {
        let mut writer = lock(&self.urls);
        let result = writeln!(writer, "{url}").and_then(|_| writer.flush());
        if let Err(err) = result {
            warn!("could not append to URL list: {err}");
        }
    }

    /// Flush all writers. Called on the platform's closing notification and
    /// again at the end of the run; safe to call more than once.
    pub fn close(&self) {
        for (name, writer) in [
            ("traffic log", &self.traffic),
            ("issue log", &self.issues),
            ("URL list", &self.urls),
        ] {
            if let Err(err) = lock(writer).flush() {
                error!("could not flush {name}: {err}");
            }
        }
    }
}
