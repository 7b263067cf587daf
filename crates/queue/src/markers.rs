//! File-based completion protocol.
//!
//! The external job writes three markers into its run directory: a status
//! marker when it starts producing output, an ok marker on success and an
//! exit marker on failure. Presence of the ok or exit marker decides the
//! outcome regardless of what the backend reports.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::pacing::pause;

/// Outcome of one attempt as decided by the markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Marker paths for one run directory.
#[derive(Debug, Clone)]
pub struct CompletionMarkers {
    status: PathBuf,
    ok: PathBuf,
    exit: PathBuf,
}

impl CompletionMarkers {
    pub fn new(run_path: &Path, status_file: &str, ok_file: &str, exit_file: &str) -> Self {
        Self {
            status: run_path.join(status_file),
            ok: run_path.join(ok_file),
            exit: run_path.join(exit_file),
        }
    }

    pub fn ok_path(&self) -> &Path {
        &self.ok
    }

    pub fn exit_path(&self) -> &Path {
        &self.exit
    }

    /// Remove ok/exit markers left by a previous attempt.
    pub fn clear_outcome(&self) -> io::Result<()> {
        for path in [&self.ok, &self.exit] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The job has started producing output.
    pub fn started(&self) -> bool {
        self.status.exists()
    }

    /// Current outcome, if either marker exists. The ok marker wins.
    pub fn outcome(&self) -> Option<Outcome> {
        if self.ok.exists() {
            Some(Outcome::Success)
        } else if self.exit.exists() {
            Some(Outcome::Failure)
        } else {
            None
        }
    }

    /// Wait up to `grace` for a marker to appear, checking every `interval`.
    pub async fn wait_for_outcome(&self, grace: Duration, interval: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(outcome) = self.outcome() {
                return Some(outcome);
            }
            if Instant::now() >= deadline {
                return None;
            }
            pause(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(dir: &Path) -> CompletionMarkers {
        CompletionMarkers::new(dir, "STATUS", "OK", "EXIT")
    }

    #[test]
    fn no_markers_no_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let m = markers(dir.path());
        assert!(!m.started());
        assert_eq!(m.outcome(), None);
    }

    #[test]
    fn ok_marker_wins_over_exit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("EXIT"), "failure").unwrap();
        let m = markers(dir.path());
        assert_eq!(m.outcome(), Some(Outcome::Failure));

        std::fs::write(dir.path().join("OK"), "success").unwrap();
        assert_eq!(m.outcome(), Some(Outcome::Success));
    }

    #[test]
    fn clear_outcome_keeps_status() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["STATUS", "OK", "EXIT"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let m = markers(dir.path());
        m.clear_outcome().unwrap();
        assert!(m.started());
        assert_eq!(m.outcome(), None);
        // Clearing twice is fine.
        m.clear_outcome().unwrap();
    }

    #[tokio::test]
    async fn wait_for_outcome_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let m = markers(dir.path());
        let outcome = m.wait_for_outcome(Duration::ZERO, Duration::ZERO).await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn wait_for_outcome_sees_late_marker() {
        let dir = tempfile::tempdir().unwrap();
        let m = markers(dir.path());
        let ok = m.ok_path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            std::fs::write(ok, "success").unwrap();
        });
        let outcome = m
            .wait_for_outcome(Duration::from_secs(5), Duration::from_millis(5))
            .await;
        writer.await.unwrap();
        assert_eq!(outcome, Some(Outcome::Success));
    }
}
