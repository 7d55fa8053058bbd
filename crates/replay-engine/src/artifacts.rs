use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::ReplayError;

pub const RUN_SUMMARY_FILE: &str = "run-summary.json";
pub const CRASH_REPORT_FILE: &str = "crash-report.json";
pub const ANOMALIES_FILE: &str = "anomalies.json";
pub const NETWORK_ARCHIVE_FILE: &str = "network.har";
pub const FAILURE_TRACE_FILE: &str = "trace-failure.zip";
pub const SUCCESS_TRACE_FILE: &str = "trace-success.zip";

/// File names inside the run's artifact directory.
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory, clearing whatever a previous run left in it.
    pub async fn prepare(&self) -> Result<(), ReplayError> {
        for file in [
            RUN_SUMMARY_FILE,
            CRASH_REPORT_FILE,
            ANOMALIES_FILE,
            NETWORK_ARCHIVE_FILE,
            FAILURE_TRACE_FILE,
            SUCCESS_TRACE_FILE,
        ] {
            remove_if_present(tokio::fs::remove_file(self.root.join(file)).await)?;
        }
        remove_if_present(tokio::fs::remove_dir_all(self.screenshots_dir()).await)?;
        tokio::fs::create_dir_all(self.screenshots_dir()).await?;
        Ok(())
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join("screenshots")
    }

    pub fn failure_screenshot(&self, step: u64, action_type: &str) -> PathBuf {
        self.screenshots_dir()
            .join(format!("step-{step}-{action_type}.png"))
    }

    pub fn run_summary(&self) -> PathBuf {
        self.root.join(RUN_SUMMARY_FILE)
    }

    pub fn crash_report(&self) -> PathBuf {
        self.root.join(CRASH_REPORT_FILE)
    }

    pub fn anomalies(&self) -> PathBuf {
        self.root.join(ANOMALIES_FILE)
    }

    pub fn network_archive(&self) -> PathBuf {
        self.root.join(NETWORK_ARCHIVE_FILE)
    }

    pub fn failure_trace(&self) -> PathBuf {
        self.root.join(FAILURE_TRACE_FILE)
    }

    pub fn success_trace(&self) -> PathBuf {
        self.root.join(SUCCESS_TRACE_FILE)
    }
}

fn remove_if_present(result: std::io::Result<()>) -> std::io::Result<()> {
    match result {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Pretty JSON, replacing any previous file.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReplayError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_clears_previous_run_but_keeps_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.prepare().await.unwrap();
        tokio::fs::write(layout.crash_report(), b"{}").await.unwrap();
        tokio::fs::write(layout.failure_trace(), b"zip").await.unwrap();
        tokio::fs::write(layout.failure_screenshot(3, "click"), b"png")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"mine").await.unwrap();

        layout.prepare().await.unwrap();

        assert!(!layout.crash_report().exists());
        assert!(!layout.failure_trace().exists());
        assert!(!layout.failure_screenshot(3, "click").exists());
        assert!(layout.screenshots_dir().is_dir());
        assert!(dir.path().join("notes.txt").exists());
    }
}
