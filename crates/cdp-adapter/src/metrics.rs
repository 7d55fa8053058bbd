//! Protocol traffic counters.
//!
//! Labels use the protocol domain (`Page`, `Runtime`, ...) rather than the full method so the
//! series count stays small. Plain atomics mirror the totals for the replay summary log line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounterVec, Opts, Registry,
};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub events: u64,
    pub binding_calls: u64,
    pub command_time_us: u64,
}

#[derive(Default)]
struct Totals {
    commands: AtomicU64,
    command_failures: AtomicU64,
    events: AtomicU64,
    binding_calls: AtomicU64,
    command_time_us: AtomicU64,
}

struct Collectors {
    commands: IntCounterVec,
    command_seconds: HistogramVec,
    events: IntCounterVec,
    binding_calls: IntCounterVec,
}

impl Collectors {
    fn build() -> prometheus::Result<Self> {
        Ok(Self {
            commands: IntCounterVec::new(
                Opts::new("goldpath_cdp_commands_total", "Protocol commands by domain and outcome"),
                &["domain", "outcome"],
            )?,
            command_seconds: HistogramVec::new(
                histogram_opts!(
                    "goldpath_cdp_command_seconds",
                    "Protocol command round trip",
                    vec![0.005, 0.025, 0.1, 0.25, 1.0, 2.5, 10.0]
                ),
                &["domain"],
            )?,
            events: IntCounterVec::new(
                Opts::new("goldpath_cdp_events_total", "Protocol events received by domain"),
                &["domain"],
            )?,
            binding_calls: IntCounterVec::new(
                Opts::new(
                    "goldpath_cdp_binding_calls_total",
                    "Page-to-host binding calls by binding name",
                ),
                &["binding"],
            )?,
        })
    }
}

lazy_static! {
    static ref TOTALS: Totals = Totals::default();
    static ref COLLECTORS: Collectors =
        Collectors::build().expect("static metric definitions are valid");
}

fn domain(method: &str) -> &str {
    method.split_once('.').map_or(method, |(domain, _)| domain)
}

fn add(counter: &AtomicU64, value: u64) {
    counter.fetch_add(value, Ordering::Relaxed);
}

fn register_one<C>(registry: &Registry, collector: &C)
where
    C: Collector + Clone + 'static,
{
    match registry.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
        Err(err) => error!(?err, "failed to register cdp metric"),
    }
}

pub fn register_metrics(registry: &Registry) {
    register_one(registry, &COLLECTORS.commands);
    register_one(registry, &COLLECTORS.command_seconds);
    register_one(registry, &COLLECTORS.events);
    register_one(registry, &COLLECTORS.binding_calls);
}

/// Measures one command from send to reply.
pub struct CommandTimer<'a> {
    method: &'a str,
    started: Instant,
}

impl<'a> CommandTimer<'a> {
    pub fn start(method: &'a str) -> Self {
        Self {
            method,
            started: Instant::now(),
        }
    }

    pub fn finish(self, ok: bool) {
        let elapsed = self.started.elapsed();
        self.finish_after(ok, elapsed);
    }

    fn finish_after(self, ok: bool, elapsed: Duration) {
        let domain = domain(self.method);
        add(&TOTALS.commands, 1);
        add(
            &TOTALS.command_time_us,
            elapsed.as_micros().min(u64::MAX as u128) as u64,
        );
        let outcome = if ok {
            "ok"
        } else {
            add(&TOTALS.command_failures, 1);
            "error"
        };
        COLLECTORS
            .commands
            .with_label_values(&[domain, outcome])
            .inc();
        COLLECTORS
            .command_seconds
            .with_label_values(&[domain])
            .observe(elapsed.as_secs_f64());
    }
}

pub fn record_event(method: &str) {
    add(&TOTALS.events, 1);
    COLLECTORS.events.with_label_values(&[domain(method)]).inc();
}

pub fn record_binding_call(binding: &str) {
    add(&TOTALS.binding_calls, 1);
    COLLECTORS.binding_calls.with_label_values(&[binding]).inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
    AdapterMetricsSnapshot {
        commands: load(&TOTALS.commands),
        command_failures: load(&TOTALS.command_failures),
        events: load(&TOTALS.events),
        binding_calls: load(&TOTALS.binding_calls),
        command_time_us: load(&TOTALS.command_time_us),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_labelled_by_domain() {
        assert_eq!(domain("Page.navigate"), "Page");
        assert_eq!(domain("Runtime.evaluate"), "Runtime");
        assert_eq!(domain("weird"), "weird");
    }

    // Adapter tests in the same binary issue commands concurrently; compare lower bounds only.
    #[test]
    fn command_outcomes_feed_totals() {
        let before = snapshot();
        CommandTimer::start("Input.dispatchMouseEvent").finish_after(true, Duration::from_micros(250));
        CommandTimer::start("DOM.describeNode").finish_after(false, Duration::from_micros(10));
        record_binding_call("__goldpathEmit");

        let after = snapshot();
        assert!(after.commands >= before.commands + 2);
        assert!(after.command_failures >= before.command_failures + 1);
        assert!(after.binding_calls >= before.binding_calls + 1);
        assert!(after.command_time_us >= before.command_time_us + 260);
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        CommandTimer::start("Target.createTarget").finish(true);

        let families = registry.gather();
        let commands = families
            .iter()
            .find(|family| family.get_name() == "goldpath_cdp_commands_total")
            .expect("command family exported");
        assert!(commands
            .get_metric()
            .iter()
            .any(|metric| metric.get_label().iter().any(|label| label.get_value() == "Target")));
    }
}
