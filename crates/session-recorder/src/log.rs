use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use capture_agent::{CaptureError, CapturedAction};
use cdp_adapter::PageId;
use chrono::{DateTime, Utc};
use goldpath_core_types::{Action, WaitCondition};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct LogState {
    actions: Vec<Action>,
    accepted_at: Vec<Instant>,
    /// Actions still inside their settlement window, oldest first per agent token.
    pending: HashMap<(PageId, u64), VecDeque<usize>>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Ordered action list. Step numbers are assigned here, under the lock, in acceptance order.
#[derive(Debug, Default)]
pub struct ActionLog {
    state: Mutex<LogState>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number and append a captured action. Returns a copy of the stored action.
    pub fn accept(&self, page: PageId, captured: CapturedAction) -> Result<Action, CaptureError> {
        let token = captured.token;
        let timestamp = captured.captured_at()?;

        let mut state = self.state.lock();
        let gap = state
            .last_timestamp
            .map(|previous| (timestamp - previous).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        let step = state.actions.len() as u64 + 1;
        let action = captured.into_action(step, gap)?;

        let index = state.actions.len();
        state.actions.push(action.clone());
        state.accepted_at.push(Instant::now());
        state.last_timestamp = Some(timestamp);
        state.pending.entry((page, token)).or_default().push_back(index);
        Ok(action)
    }

    /// Close the oldest open settlement window for `token`. Returns the step that received a
    /// wait condition, if any.
    pub fn settle(
        &self,
        page: PageId,
        token: u64,
        condition: Option<WaitCondition>,
    ) -> Option<u64> {
        let mut state = self.state.lock();
        let index = {
            let queue = state.pending.get_mut(&(page, token))?;
            let index = queue.pop_front();
            if queue.is_empty() {
                state.pending.remove(&(page, token));
            }
            index?
        };
        let action = state.actions.get_mut(index)?;
        let condition = condition?;
        action.offer_wait_condition(condition).then_some(action.step)
    }

    /// Give the most recent action a navigation wait condition after a full document load, unless
    /// it already has one or was accepted longer than `window` ago.
    pub fn backfill_navigation(&self, url: &str, window: Duration) -> Option<u64> {
        let mut state = self.state.lock();
        let accepted_at = *state.accepted_at.last()?;
        if accepted_at.elapsed() >= window {
            return None;
        }
        let action = state.actions.last_mut()?;
        action
            .offer_wait_condition(WaitCondition::Navigation(url.to_string()))
            .then_some(action.step)
    }

    /// Drop open settlement windows of a page whose document was replaced.
    pub fn forget_page(&self, page: PageId) {
        self.state.lock().pending.retain(|(owner, _), _| *owner != page);
    }

    pub fn len(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().actions.is_empty()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().actions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldpath_core_types::ActionType;
    use serde_json::json;
    use std::sync::Arc;

    fn click(token: u64, timestamp: i64) -> CapturedAction {
        CapturedAction {
            token,
            action_type: ActionType::Click,
            selector: Some("#go".into()),
            url: "https://app.test/".into(),
            timestamp,
            since_load_ms: 10_000,
            context: json!({ "tagName": "button" }),
        }
    }

    #[test]
    fn steps_and_gaps_follow_acceptance_order() {
        let log = ActionLog::new();
        let page = PageId::new();
        let first = log.accept(page, click(1, 1_000)).unwrap();
        let second = log.accept(page, click(2, 1_450)).unwrap();
        let third = log.accept(page, click(3, 1_300)).unwrap();
        assert_eq!((first.step, first.baseline_ms()), (1, 0));
        assert_eq!((second.step, second.baseline_ms()), (2, 450));
        assert_eq!((third.step, third.baseline_ms()), (3, 0));
    }

    #[test]
    fn rejected_payload_leaves_no_gap() {
        let log = ActionLog::new();
        let page = PageId::new();
        log.accept(page, click(1, 1_000)).unwrap();
        let mut broken = click(2, 1_100);
        broken.action_type = ActionType::Navigation;
        assert!(log.accept(page, broken).is_err());
        let next = log.accept(page, click(3, 1_200)).unwrap();
        assert_eq!(next.step, 2);
    }

    #[test]
    fn settlement_is_matched_per_token_in_order() {
        let log = ActionLog::new();
        let page = PageId::new();
        log.accept(page, click(5, 1_000)).unwrap();
        log.accept(page, click(5, 1_100)).unwrap();

        assert_eq!(log.settle(page, 5, None), None);
        let step = log.settle(page, 5, Some(WaitCondition::Selector("#toast".into())));
        assert_eq!(step, Some(2));
        assert_eq!(log.settle(page, 5, Some(WaitCondition::Selector("#late".into()))), None);

        let actions = log.actions();
        assert!(actions[0].wait_condition.is_none());
        assert_eq!(
            actions[1].wait_condition,
            Some(WaitCondition::Selector("#toast".into()))
        );
    }

    #[test]
    fn backfill_keeps_existing_condition() {
        let log = ActionLog::new();
        let page = PageId::new();
        log.accept(page, click(1, 1_000)).unwrap();
        log.settle(page, 1, Some(WaitCondition::Selector("#menu".into())));
        assert_eq!(log.backfill_navigation("https://app.test/next", Duration::from_secs(10)), None);

        log.accept(page, click(2, 2_000)).unwrap();
        assert_eq!(
            log.backfill_navigation("https://app.test/next", Duration::from_secs(10)),
            Some(2)
        );
        assert_eq!(log.backfill_navigation("https://app.test/other", Duration::from_secs(10)), None);
    }

    #[test]
    fn stale_actions_are_not_backfilled() {
        let log = ActionLog::new();
        let page = PageId::new();
        log.accept(page, click(1, 1_000)).unwrap();
        assert_eq!(log.backfill_navigation("https://app.test/", Duration::ZERO), None);
    }

    #[test]
    fn forgotten_page_tokens_do_not_settle() {
        let log = ActionLog::new();
        let page = PageId::new();
        log.accept(page, click(1, 1_000)).unwrap();
        log.forget_page(page);
        assert_eq!(log.settle(page, 1, Some(WaitCondition::Selector("#x".into()))), None);
    }

    #[test]
    fn concurrent_acceptance_is_gap_free() {
        let log = Arc::new(ActionLog::new());
        let page = PageId::new();
        let handles: Vec<_> = (0..16u64)
            .map(|token| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for offset in 0..25 {
                        log.accept(page, click(token, 1_000 + offset)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let steps: Vec<u64> = log.actions().iter().map(|action| action.step).collect();
        assert_eq!(steps, (1..=400).collect::<Vec<u64>>());
    }
}
