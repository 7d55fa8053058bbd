//! Replay outcomes: step results, run summary, anomalies and crash reports.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error_entry::strip_query;

/// Latency multiple above which a step counts as degraded.
pub const DEFAULT_DEGRADATION_FACTOR: f64 = 1.5;

/// `true` iff `baseline > 0` and `latency > baseline * factor`.
pub fn is_degraded(latency_ms: u64, baseline_ms: u64, factor: f64) -> bool {
    baseline_ms > 0 && (latency_ms as f64) > (baseline_ms as f64) * factor
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pass,
    Fail,
}

pub type RunStatus = StepStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepFlag {
    PerformanceDegradation,
    StepFailure,
}

/// Why a step failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The recorded selector no longer resolves to an element.
    SelectorNotFound,
    /// The element resolved but the action could not be performed.
    DispatchFailed,
    /// The browser did not answer within the dispatch bound.
    Timeout,
    /// The step cannot be replayed as recorded.
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: u64,
    #[serde(rename = "type")]
    pub action_type: String,
    pub selector: Option<String>,
    pub status: StepStatus,
    pub latency: u64,
    pub golden_baseline: u64,
    pub degradation: bool,
    pub flags: BTreeSet<StepFlag>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_selector: Option<String>,
}

impl StepResult {
    pub fn pass(action: &Action, latency_ms: u64, factor: f64) -> Self {
        Self::build(action, latency_ms, factor, None)
    }

    pub fn fail(
        action: &Action,
        latency_ms: u64,
        factor: f64,
        error: impl Into<String>,
        kind: FailureKind,
    ) -> Self {
        Self::build(action, latency_ms, factor, Some((error.into(), kind)))
    }

    fn build(
        action: &Action,
        latency_ms: u64,
        factor: f64,
        failure: Option<(String, FailureKind)>,
    ) -> Self {
        let baseline = action.baseline_ms();
        let degradation = is_degraded(latency_ms, baseline, factor);
        let mut flags = BTreeSet::new();
        if degradation {
            flags.insert(StepFlag::PerformanceDegradation);
        }
        let (status, error, error_kind) = match failure {
            Some((message, kind)) => {
                flags.insert(StepFlag::StepFailure);
                (StepStatus::Fail, Some(message), Some(kind))
            }
            None => (StepStatus::Pass, None, None),
        };

        Self {
            step: action.step,
            action_type: action.type_name().to_string(),
            selector: action.selector.clone(),
            status,
            latency: latency_ms,
            golden_baseline: baseline,
            degradation,
            flags,
            error,
            error_kind,
            suggested_selector: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Fail
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub step_count: usize,
    pub total_latency: u64,
    pub average_latency: f64,
    pub degradation_count: usize,
}

impl PerformanceSummary {
    pub fn from_steps(steps: &[StepResult]) -> Self {
        let total: u64 = steps.iter().map(|step| step.latency).sum();
        let average = if steps.is_empty() {
            0.0
        } else {
            total as f64 / steps.len() as f64
        };
        Self {
            step_count: steps.len(),
            total_latency: total,
            average_latency: (average * 100.0).round() / 100.0,
            degradation_count: steps.iter().filter(|step| step.degradation).count(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub golden_session_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    pub failed_step: Option<u64>,
    pub performance_summary: PerformanceSummary,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Pass
    }
}

/// Accumulates step results during a run. Results are never dropped, so a partial run still
/// produces a complete summary of what was attempted.
#[derive(Debug)]
pub struct RunSummaryBuilder {
    run_id: String,
    golden_session_id: String,
    started_at: DateTime<Utc>,
    steps: Vec<StepResult>,
    failed_step: Option<u64>,
}

impl RunSummaryBuilder {
    pub fn new(run_id: impl Into<String>, golden_session_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            golden_session_id: golden_session_id.into(),
            started_at: Utc::now(),
            steps: Vec::new(),
            failed_step: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn push(&mut self, result: StepResult) {
        if result.is_failure() && self.failed_step.is_none() {
            self.failed_step = Some(result.step);
        }
        self.steps.push(result);
    }

    pub fn failed_step(&self) -> Option<u64> {
        self.failed_step
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    pub fn finish(self) -> RunSummary {
        let status = if self.steps.iter().any(StepResult::is_failure) {
            StepStatus::Fail
        } else {
            StepStatus::Pass
        };
        let performance_summary = PerformanceSummary::from_steps(&self.steps);
        RunSummary {
            run_id: self.run_id,
            golden_session_id: self.golden_session_id,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            steps: self.steps,
            failed_step: self.failed_step,
            performance_summary,
        }
    }
}

/// HTTP response with status >= 400 observed during replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub url: String,
    pub method: String,
    pub status: i64,
    pub status_text: String,
    pub resource_type: String,
    pub timestamp: DateTime<Utc>,
}

impl Anomaly {
    /// Grouped view for logs and reports; the underlying list keeps every occurrence.
    pub fn group_for_report(anomalies: &[Anomaly]) -> Vec<(String, usize)> {
        let mut groups: BTreeMap<String, usize> = BTreeMap::new();
        for anomaly in anomalies {
            let key = format!(
                "{} {} {}",
                anomaly.status,
                anomaly.method,
                strip_query(&anomaly.url)
            );
            *groups.entry(key).or_default() += 1;
        }
        let mut grouped: Vec<(String, usize)> = groups.into_iter().collect();
        grouped.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        grouped
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLine {
    pub level: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Detail of the most recent step failure. Each failure overwrites the previous report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    pub failed_step: u64,
    pub action: String,
    pub selector: Option<String>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    pub url: String,
    pub console: Vec<ConsoleLine>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_selector: Option<String>,
}
