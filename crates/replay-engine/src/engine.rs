use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_agent::capture_dom;
use cdp_adapter::{metrics, Cdp, PageId, ScreenshotOptions};
use chrono::Utc;
use goldpath_core_types::{
    new_id, Action, Anomaly, CrashReport, FailureKind, GoldenSession, RunSummary,
    RunSummaryBuilder, StepResult,
};
use selector_synth::SelectorSynth;
use tracing::{debug, error, info, warn};

use crate::artifacts::{write_json, ArtifactLayout};
use crate::dispatch::dispatch;
use crate::observer::{Observations, Observer};
use crate::repair;
use crate::trace::{TraceOutcome, TraceRecorder};
use crate::wait::settle;
use crate::{ReplayConfig, ReplayError};

const START_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a finished run left its files.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub artifacts: ArtifactLayout,
    pub summary_path: Option<PathBuf>,
    pub crash_report: Option<PathBuf>,
    pub trace: Option<PathBuf>,
    pub network_archive: Option<PathBuf>,
    pub anomalies: Vec<Anomaly>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.summary.passed()
    }

    /// Single line for CI logs.
    pub fn one_line(&self) -> String {
        let perf = &self.summary.performance_summary;
        let failed = self
            .summary
            .failed_step
            .map(|step| format!(" failedStep={step}"))
            .unwrap_or_default();
        format!(
            "goldpath replay {status}: steps={steps}{failed} degraded={degraded} avgLatency={avg:.0}ms anomalies={anomalies}",
            status = if self.passed() { "PASS" } else { "FAIL" },
            steps = perf.step_count,
            degraded = perf.degradation_count,
            avg = perf.average_latency,
            anomalies = self.anomalies.len(),
        )
    }
}

#[derive(Default)]
struct RunArtifacts {
    trace: Option<PathBuf>,
    crash_report: Option<PathBuf>,
}

/// Drives one browser through a Golden Session.
///
/// The run never stops at a failing step: every remaining action is attempted so that one broken
/// selector does not hide later regressions. Only a browser that cannot be reached aborts the run.
pub struct ReplayEngine {
    cdp: Arc<dyn Cdp>,
    config: ReplayConfig,
    synth: SelectorSynth,
}

impl ReplayEngine {
    pub fn new(cdp: Arc<dyn Cdp>, config: ReplayConfig) -> Self {
        let synth = SelectorSynth::new(config.policy.clone());
        Self { cdp, config, synth }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub async fn run(&self, session: &GoldenSession) -> Result<RunReport, ReplayError> {
        let layout = ArtifactLayout::new(&self.config.artifacts_dir);
        layout.prepare().await?;

        let run_id = new_id();
        let session_id = session.metadata.session_id.clone();
        // Subscribe before the first navigation so the archive covers the whole run.
        let mut observer = Observer::spawn(
            self.cdp.subscribe(),
            Observations::new(
                self.config.console_buffer,
                TraceRecorder::new(run_id.clone(), session_id.clone()),
            ),
        );

        let page = match self.cdp.primary_page().await {
            Ok(page) => page,
            Err(err) => {
                observer.stop().await;
                error!(target: "replay", %err, "browser unavailable");
                return Err(ReplayError::FatalLaunch(err));
            }
        };

        info!(
            target: "replay",
            %run_id,
            %session_id,
            steps = session.actions.len(),
            "replay started"
        );
        self.open_start_page(page, session).await;

        let mut builder = RunSummaryBuilder::new(run_id, session_id);
        let mut artifacts = RunArtifacts::default();
        for action in &session.actions {
            let result = self
                .execute_step(page, action, &observer, &layout, &mut artifacts)
                .await;
            builder.push(result);
        }

        Ok(self
            .finalize(page, builder, observer, layout, artifacts)
            .await)
    }

    async fn open_start_page(&self, page: PageId, session: &GoldenSession) {
        if let Some(viewport) = session.metadata.viewport {
            if let Err(err) = self
                .cdp
                .set_device_metrics(page, viewport.width, viewport.height, 1.0, false)
                .await
            {
                warn!(target: "replay", %err, "failed to apply recorded viewport");
            }
        }
        match session.start_url() {
            Some(url) => {
                if let Err(err) = self.cdp.navigate(page, url, START_NAVIGATION_TIMEOUT).await {
                    warn!(target: "replay", %url, %err, "start navigation failed; steps will run anyway");
                }
            }
            None => warn!(target: "replay", "session has no start url"),
        }
    }

    async fn execute_step(
        &self,
        page: PageId,
        action: &Action,
        observer: &Observer,
        layout: &ArtifactLayout,
        artifacts: &mut RunArtifacts,
    ) -> StepResult {
        let step = action.step;
        observer.with(|o| o.trace.step_started(action));

        let started = Instant::now();
        let outcome = match dispatch(self.cdp.as_ref(), page, action, &self.config).await {
            Ok(()) => {
                if let Some(condition) = &action.wait_condition {
                    if let Err(err) = settle(self.cdp.as_ref(), page, step, condition, &self.config).await {
                        warn!(target: "replay", step, %err, "continuing without confirmed settle");
                    }
                }
                Ok(())
            }
            Err(err) => Err(err),
        };
        let latency = started.elapsed().as_millis() as u64;
        let factor = self.config.degradation_factor;

        let mut result = match outcome {
            Ok(()) => StepResult::pass(action, latency, factor),
            Err(err) => {
                let (kind, message) = match err {
                    ReplayError::Dispatch { kind, message, .. } => (kind, message),
                    other => (FailureKind::DispatchFailed, other.to_string()),
                };
                StepResult::fail(action, latency, factor, message, kind)
            }
        };

        if result.is_failure() {
            warn!(
                target: "replay",
                step,
                action = action.type_name(),
                selector = ?action.selector,
                latency_ms = latency,
                error = ?result.error,
                "step failed"
            );
            observer.with(|o| o.trace.step_finished(&result));
            self.capture_failure(page, action, &mut result, observer, layout, artifacts)
                .await;
        } else {
            if result.degradation {
                warn!(
                    target: "replay",
                    step,
                    latency_ms = latency,
                    baseline_ms = result.golden_baseline,
                    "performance degradation"
                );
            } else {
                info!(target: "replay", step, action = action.type_name(), latency_ms = latency, "step passed");
            }
            observer.with(|o| o.trace.step_finished(&result));
            if self.config.trace_step_captures {
                self.capture_trace_frames(page, step, observer).await;
            }
        }
        result
    }

    async fn capture_trace_frames(&self, page: PageId, step: u64, observer: &Observer) {
        let options = ScreenshotOptions::viewport_jpeg(self.config.trace_jpeg_quality);
        match self.cdp.screenshot(page, options).await {
            Ok(jpeg) => observer.with(|o| o.trace.add_screenshot(step, jpeg)),
            Err(err) => debug!(target: "replay", step, %err, "trace screenshot skipped"),
        }
        match self.cdp.html_snapshot(page).await {
            Ok(html) => observer.with(|o| o.trace.add_snapshot(step, html)),
            Err(err) => debug!(target: "replay", step, %err, "trace snapshot skipped"),
        }
    }

    /// Screenshot, trace stop (first failure only), repair suggestion and crash report. Every
    /// artifact error is logged and swallowed.
    async fn capture_failure(
        &self,
        page: PageId,
        action: &Action,
        result: &mut StepResult,
        observer: &Observer,
        layout: &ArtifactLayout,
        artifacts: &mut RunArtifacts,
    ) {
        let step = action.step;

        let screenshot_path = layout.failure_screenshot(step, action.type_name());
        match self.cdp.screenshot(page, ScreenshotOptions::full_page_png()).await {
            Ok(png) => {
                if let Err(err) = tokio::fs::write(&screenshot_path, png).await {
                    warn!(target: "replay", step, %err, "failed to store failure screenshot");
                }
            }
            Err(err) => warn!(target: "replay", step, %err, "failure screenshot unavailable"),
        }

        if artifacts.trace.is_none() {
            if self.config.trace_step_captures {
                self.capture_trace_frames(page, step, observer).await;
            }
            observer.flush().await;
            match self
                .persist_trace(observer, TraceOutcome::Failure, layout.failure_trace())
                .await
            {
                Ok(Some(path)) => artifacts.trace = Some(path),
                Ok(None) => {}
                Err(err) => warn!(target: "replay", step, %err, "failed to persist failure trace"),
            }
        }

        if let Some(element) = action.kind.element() {
            match capture_dom(self.cdp.as_ref(), page).await {
                Ok(dom) => {
                    if let Some(repair) =
                        repair::suggest(&dom, element, action.selector.as_deref(), &self.synth)
                    {
                        info!(
                            target: "replay",
                            step,
                            selector = %repair.selector,
                            confidence = repair.confidence,
                            "suggested replacement selector"
                        );
                        result.suggested_selector = Some(repair.selector);
                    }
                }
                Err(err) => debug!(target: "replay", step, %err, "no dom snapshot for repair"),
            }
        }

        observer.flush().await;
        let console = observer.with(|o| o.console.tail(self.config.crash_console_tail));
        let url = match self.cdp.current_url(page).await {
            Ok(url) => url,
            Err(_) => action.url.clone(),
        };
        let report = CrashReport {
            failed_step: step,
            action: action.type_name().to_string(),
            selector: action.selector.clone(),
            error: result.error.clone().unwrap_or_default(),
            error_kind: result.error_kind,
            url,
            console,
            timestamp: Utc::now(),
            suggested_selector: result.suggested_selector.clone(),
        };
        let path = layout.crash_report();
        match write_json(&path, &report).await {
            Ok(()) => artifacts.crash_report = Some(path),
            Err(err) => warn!(target: "replay", step, %err, "failed to write crash report"),
        }
    }

    async fn persist_trace(
        &self,
        observer: &Observer,
        outcome: TraceOutcome,
        path: PathBuf,
    ) -> Result<Option<PathBuf>, ReplayError> {
        let Some(archive) = observer.with(|o| o.trace.stop(outcome)) else {
            return Ok(None);
        };
        let written = tokio::task::spawn_blocking(move || archive.write_to(&path))
            .await
            .map_err(ReplayError::transport)??;
        debug!(target: "replay", path = %written.display(), ?outcome, "trace persisted");
        Ok(Some(written))
    }

    async fn finalize(
        &self,
        page: PageId,
        builder: RunSummaryBuilder,
        mut observer: Observer,
        layout: ArtifactLayout,
        mut artifacts: RunArtifacts,
    ) -> RunReport {
        if artifacts.trace.is_none() {
            observer.flush().await;
            match self
                .persist_trace(&observer, TraceOutcome::Success, layout.success_trace())
                .await
            {
                Ok(path) => artifacts.trace = path,
                Err(err) => warn!(target: "replay", %err, "failed to persist success trace"),
            }
        }

        // Closing the browser is what completes the network archive.
        if let Err(err) = self.cdp.close().await {
            warn!(target: "replay", %err, "browser close failed; continuing");
        }
        observer.stop().await;
        let (anomalies, har) = observer.with(|o| (o.anomalies.clone(), o.har.to_har()));

        if let Err(err) = write_json(&layout.anomalies(), &anomalies).await {
            warn!(target: "replay", %err, "failed to write anomalies");
        }
        for (group, count) in Anomaly::group_for_report(&anomalies) {
            info!(target: "replay", count, "anomaly {group}");
        }

        let network_archive = layout.network_archive();
        let network_archive = match write_json(&network_archive, &har).await {
            Ok(()) => Some(network_archive),
            Err(err) => {
                warn!(target: "replay", %err, "failed to write network archive");
                None
            }
        };

        let summary = builder.finish();
        let summary_file = layout.run_summary();
        let summary_path = match write_json(&summary_file, &summary).await {
            Ok(()) => Some(summary_file),
            Err(err) => {
                error!(target: "replay", %err, "failed to write run summary");
                None
            }
        };

        let cdp_metrics = metrics::snapshot();
        info!(
            target: "replay",
            run_id = %summary.run_id,
            status = ?summary.status,
            failed_step = ?summary.failed_step,
            total_latency_ms = summary.performance_summary.total_latency,
            degraded = summary.performance_summary.degradation_count,
            cdp_commands = cdp_metrics.commands,
            cdp_failures = cdp_metrics.command_failures,
            "replay finished"
        );

        RunReport {
            summary,
            artifacts: layout,
            summary_path,
            crash_report: artifacts.crash_report,
            trace: artifacts.trace,
            network_archive,
            anomalies,
        }
    }
}
