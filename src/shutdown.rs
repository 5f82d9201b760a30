//! Exactly-once finalization
//!
//! Every path out of the run (a clean drain, a monitor fault, a platform
//! error) funnels through [`ShutdownController::finalize`]. The latch
//! guarantees the snapshot save and the termination request happen exactly
//! once no matter how many paths race to get there.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use dialoguer::Confirm;
use log::{debug, error, info, warn};

use crate::platform::ScanPlatform;

/// Why finalization is happening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// All scan jobs drained normally.
    Complete,
    /// The monitor loop hit an unrecoverable error.
    Fault,
}

pub struct ShutdownController {
    finalized: AtomicBool,
    session_path: PathBuf,
    confirm_exit: bool,
}

impl ShutdownController {
    pub fn new(session_path: PathBuf, confirm_exit: bool) -> Self {
        Self {
            finalized: AtomicBool::new(false),
            session_path,
            confirm_exit,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Save the session snapshot and request platform termination.
    ///
    /// Returns `true` if this call performed finalization, `false` if some
    /// earlier call already did. Save and terminate failures are logged and
    /// swallowed: past this point the only useful move is to keep going and
    /// preserve whatever can be preserved.
    pub async fn finalize(&self, platform: &dyn ScanPlatform, outcome: Outcome) -> bool {
        if self.finalized.swap(true, Ordering::SeqCst) {
            debug!("finalize requested again, already done");
            return false;
        }

        match outcome {
            Outcome::Complete => {
                info!("saving session results to {}", self.session_path.display())
            }
            Outcome::Fault => {
                warn!(
                    "finalizing after an unrecoverable error, attempting to save {}",
                    self.session_path.display()
                )
            }
        }
        if let Err(err) = platform.save_session(&self.session_path).await {
            error!("session save failed: {err}");
        }

        if outcome == Outcome::Complete && self.confirm_exit && !self.confirm() {
            info!("leaving the platform running at operator request");
            return true;
        }

        // Any prompting happened driver-side above; the platform itself is
        // always asked for an unconditional exit.
        if let Err(err) = platform.terminate(false).await {
            error!("platform termination request failed: {err}");
        }
        true
    }

    fn confirm(&self) -> bool {
        match Confirm::new()
            .with_prompt("Scanning complete. Shut the platform down?")
            .default(true)
            .interact()
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!("confirmation prompt unavailable ({err}), shutting down");
                true
            }
        }
    }
}
