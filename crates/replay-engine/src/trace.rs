//! Structured execution trace: ordered events plus viewport screenshots and HTML snapshots,
//! packed into a zip when the trace is stopped.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use goldpath_core_types::{Action, StepResult, StepStatus};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::ReplayError;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TraceEvent {
    #[serde(rename_all = "camelCase")]
    Navigation {
        url: String,
        same_document: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepStart {
        step: u64,
        action: String,
        selector: Option<String>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepEnd {
        step: u64,
        status: StepStatus,
        latency: u64,
        degradation: bool,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Console {
        level: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    Screenshot {
        step: u64,
        path: String,
        timestamp: DateTime<Utc>,
    },
    Snapshot {
        step: u64,
        path: String,
        timestamp: DateTime<Utc>,
    },
}

/// Why the trace was stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceOutcome {
    Failure,
    Success,
}

#[derive(Debug)]
pub struct TraceRecorder {
    run_id: String,
    session_id: String,
    started_at: DateTime<Utc>,
    events: Vec<TraceEvent>,
    screenshots: Vec<(String, Vec<u8>)>,
    snapshots: Vec<(String, String)>,
    stopped: bool,
}

impl TraceRecorder {
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            started_at: Utc::now(),
            events: Vec::new(),
            screenshots: Vec::new(),
            snapshots: Vec::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Events after the stop are dropped.
    pub fn push(&mut self, event: TraceEvent) {
        if !self.stopped {
            self.events.push(event);
        }
    }

    pub fn step_started(&mut self, action: &Action) {
        self.push(TraceEvent::StepStart {
            step: action.step,
            action: action.type_name().to_string(),
            selector: action.selector.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn step_finished(&mut self, result: &StepResult) {
        self.push(TraceEvent::StepEnd {
            step: result.step,
            status: result.status,
            latency: result.latency,
            degradation: result.degradation,
            error: result.error.clone(),
            timestamp: Utc::now(),
        });
    }

    pub fn add_screenshot(&mut self, step: u64, jpeg: Vec<u8>) {
        if self.stopped {
            return;
        }
        let path = format!("screenshots/step-{step:03}-{}.jpeg", self.screenshots.len());
        self.push(TraceEvent::Screenshot {
            step,
            path: path.clone(),
            timestamp: Utc::now(),
        });
        self.screenshots.push((path, jpeg));
    }

    pub fn add_snapshot(&mut self, step: u64, html: String) {
        if self.stopped {
            return;
        }
        let path = format!("snapshots/step-{step:03}-{}.html", self.snapshots.len());
        self.push(TraceEvent::Snapshot {
            step,
            path: path.clone(),
            timestamp: Utc::now(),
        });
        self.snapshots.push((path, html));
    }

    /// Freeze the trace. Only the first call yields an archive.
    pub fn stop(&mut self, outcome: TraceOutcome) -> Option<TraceArchive> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        Some(TraceArchive {
            manifest: TraceManifest {
                run_id: self.run_id.clone(),
                golden_session_id: self.session_id.clone(),
                outcome,
                started_at: self.started_at,
                stopped_at: Utc::now(),
                events: std::mem::take(&mut self.events),
            },
            screenshots: std::mem::take(&mut self.screenshots),
            snapshots: std::mem::take(&mut self.snapshots),
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceManifest {
    run_id: String,
    golden_session_id: String,
    outcome: TraceOutcome,
    started_at: DateTime<Utc>,
    stopped_at: DateTime<Utc>,
    events: Vec<TraceEvent>,
}

/// A stopped trace, ready to be written.
#[derive(Debug)]
pub struct TraceArchive {
    manifest: TraceManifest,
    screenshots: Vec<(String, Vec<u8>)>,
    snapshots: Vec<(String, String)>,
}

impl TraceArchive {
    pub fn outcome(&self) -> TraceOutcome {
        self.manifest.outcome
    }

    /// Blocking zip write. Call from a blocking context.
    pub fn write_to(&self, path: &Path) -> Result<PathBuf, ReplayError> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        // Images are already compressed.
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

        zip.start_file("trace.json", deflated)?;
        zip.write_all(&serde_json::to_vec_pretty(&self.manifest)?)?;
        for (name, bytes) in &self.screenshots {
            zip.start_file(name.as_str(), stored)?;
            zip.write_all(bytes)?;
        }
        for (name, html) in &self.snapshots {
            zip.start_file(name.as_str(), deflated)?;
            zip.write_all(html.as_bytes())?;
        }
        zip.finish()?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn stops_once_and_packs_every_capture() {
        let dir = tempfile::tempdir().unwrap();
        let mut trace = TraceRecorder::new("run-1", "session-1");
        trace.push(TraceEvent::Console {
            level: "error".into(),
            text: "boom".into(),
            timestamp: Utc::now(),
        });
        trace.add_screenshot(1, vec![0xff, 0xd8, 0xff]);
        trace.add_snapshot(1, "<html><body>ok</body></html>".into());

        let archive = trace.stop(TraceOutcome::Failure).unwrap();
        assert!(trace.is_stopped());
        assert!(trace.stop(TraceOutcome::Success).is_none());
        trace.add_snapshot(2, "<html></html>".into());

        let path = archive.write_to(&dir.path().join("trace.zip")).unwrap();
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "screenshots/step-001-0.jpeg",
                "snapshots/step-001-0.html",
                "trace.json",
            ]
        );

        let mut manifest = String::new();
        zip.by_name("trace.json").unwrap().read_to_string(&mut manifest).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["outcome"], "failure");
        let kinds: Vec<&str> = manifest["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|event| event["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["console", "screenshot", "snapshot"]);
    }
}
