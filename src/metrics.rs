//! Process-wide Prometheus registry.
//!
//! The CLI has no long-running server, so the registry is exported as a text file on exit when
//! `--metrics-out` is given.

use std::path::Path;

use anyhow::{Context, Result};
use cdp_adapter::metrics as cdp_metrics;
use goldpath_core_types::RunSummary;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{histogram_opts, Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();
static REPLAY_RUNS: OnceCell<IntCounterVec> = OnceCell::new();
static REPLAY_STEPS: OnceCell<IntCounterVec> = OnceCell::new();
static REPLAY_STEP_LATENCY: OnceCell<HistogramVec> = OnceCell::new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        cdp_metrics::register_metrics(registry);
        register_replay_metrics(registry);
    });
}

fn register_replay_metrics(registry: &Registry) {
    match IntCounterVec::new(
        Opts::new("goldpath_replay_runs_total", "Replay runs by final status"),
        &["status"],
    ) {
        Ok(runs) => {
            if let Err(err) = registry.register(Box::new(runs.clone())) {
                error!(?err, "failed to register replay run counter");
            }
            let _ = REPLAY_RUNS.set(runs);
        }
        Err(err) => error!(?err, "failed to create replay run counter"),
    }

    match IntCounterVec::new(
        Opts::new("goldpath_replay_steps_total", "Replayed steps by action and outcome"),
        &["action", "outcome"],
    ) {
        Ok(steps) => {
            if let Err(err) = registry.register(Box::new(steps.clone())) {
                error!(?err, "failed to register replay step counter");
            }
            let _ = REPLAY_STEPS.set(steps);
        }
        Err(err) => error!(?err, "failed to create replay step counter"),
    }

    match HistogramVec::new(
        histogram_opts!(
            "goldpath_replay_step_latency_ms",
            "Replay step latency (milliseconds)",
            vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0]
        ),
        &["action"],
    ) {
        Ok(latency) => {
            if let Err(err) = registry.register(Box::new(latency.clone())) {
                error!(?err, "failed to register replay latency histogram");
            }
            let _ = REPLAY_STEP_LATENCY.set(latency);
        }
        Err(err) => error!(?err, "failed to create replay latency histogram"),
    }
}

pub fn record_run(summary: &RunSummary) {
    let status = if summary.passed() { "pass" } else { "fail" };
    if let Some(runs) = REPLAY_RUNS.get() {
        runs.with_label_values(&[status]).inc();
    }
    for step in &summary.steps {
        let outcome = if step.is_failure() {
            "fail"
        } else if step.degradation {
            "degraded"
        } else {
            "pass"
        };
        if let Some(steps) = REPLAY_STEPS.get() {
            steps
                .with_label_values(&[step.action_type.as_str(), outcome])
                .inc();
        }
        if let Some(latency) = REPLAY_STEP_LATENCY.get() {
            latency
                .with_label_values(&[step.action_type.as_str()])
                .observe(step.latency as f64);
        }
    }
}

pub fn render_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&global_registry().gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("metrics are not utf-8")
}

pub fn write_text(path: &Path) -> Result<()> {
    let text = render_text()?;
    std::fs::write(path, text).with_context(|| format!("writing metrics to {}", path.display()))
}
