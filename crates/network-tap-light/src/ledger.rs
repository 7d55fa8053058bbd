use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::TapConfig;
use crate::{NetworkSnapshot, TapEvent};

/// Request bookkeeping for one page.
#[derive(Debug, Default)]
pub(crate) struct PageLedger {
    /// Open requests by protocol id, with the time they were first seen.
    open: HashMap<String, Instant>,
    requests: u64,
}

impl PageLedger {
    pub(crate) fn apply(&mut self, event: &TapEvent, now: Instant) {
        match event {
            // Redirects reuse the request id and must not be counted twice.
            TapEvent::RequestWillBeSent { request_id } => {
                if !self.open.contains_key(request_id) {
                    self.open.insert(request_id.clone(), now);
                    self.requests += 1;
                }
            }
            TapEvent::LoadingFinished { request_id } | TapEvent::LoadingFailed { request_id } => {
                self.open.remove(request_id);
            }
        }
    }

    pub(crate) fn open(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn snapshot(&self, now: Instant, config: &TapConfig) -> NetworkSnapshot {
        let stale_after = Duration::from_millis(config.stale_request_ms);
        let stale = self
            .open
            .values()
            .filter(|opened| now.saturating_duration_since(**opened) >= stale_after)
            .count() as u64;
        NetworkSnapshot {
            req: self.requests,
            inflight: self.open.len() as u64 - stale,
            stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_open_requests_turn_stale() {
        let config = TapConfig {
            stale_request_ms: 1_000,
        };
        let start = Instant::now();
        let mut ledger = PageLedger::default();
        ledger.apply(
            &TapEvent::RequestWillBeSent {
                request_id: "poll".into(),
            },
            start,
        );
        ledger.apply(
            &TapEvent::RequestWillBeSent {
                request_id: "img".into(),
            },
            start + Duration::from_millis(1_200),
        );

        let early = ledger.snapshot(start + Duration::from_millis(200), &config);
        assert_eq!((early.inflight, early.stale), (2, 0));

        let late = ledger.snapshot(start + Duration::from_millis(1_500), &config);
        assert_eq!((late.req, late.inflight, late.stale), (2, 1, 1));
    }
}
