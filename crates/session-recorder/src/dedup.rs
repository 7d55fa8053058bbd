use std::collections::HashMap;

use chrono::{DateTime, Utc};
use goldpath_core_types::{ErrorEntry, Fingerprint};
use parking_lot::Mutex;

/// Console and network problems keyed by fingerprint. One entry per fingerprint, ever.
#[derive(Debug, Default)]
pub struct ErrorDeduper {
    entries: Mutex<HashMap<Fingerprint, ErrorEntry>>,
}

impl ErrorDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an occurrence and return the fingerprint's running count.
    pub fn record(&self, fingerprint: Fingerprint, message: &str, at: DateTime<Utc>) -> u64 {
        let mut entries = self.entries.lock();
        match entries.get_mut(&fingerprint) {
            Some(entry) => {
                entry.merge(at);
                entry.count
            }
            None => {
                entries.insert(fingerprint.clone(), ErrorEntry::new(fingerprint, message, at));
                1
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every entry, unordered.
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn repeated_console_message_collapses() {
        let dedup = ErrorDeduper::new();
        let now = Utc::now();
        let message = "Uncaught TypeError: x is undefined";
        for _ in 0..7 {
            dedup.record(Fingerprint::console("error", message), message, now);
        }
        let entries = dedup.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 7);
    }

    #[test]
    fn network_repeats_differing_in_query_collapse() {
        let dedup = ErrorDeduper::new();
        let now = Utc::now();
        let fingerprint = |status: &str, url: &str| Fingerprint::network("GET", status, url);
        dedup.record(fingerprint("404", "https://cdn.test/a.png?v=1"), "404", now);
        let count = dedup.record(fingerprint("404", "https://cdn.test/a.png?v=2"), "404", now);
        dedup.record(fingerprint("500", "https://cdn.test/a.png"), "500", now);
        assert_eq!(count, 2);
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn concurrent_writers_keep_a_single_entry() {
        let dedup = Arc::new(ErrorDeduper::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = Arc::clone(&dedup);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let fingerprint = Fingerprint::console("warning", "deprecated API");
                        dedup.record(fingerprint, "deprecated API", Utc::now());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let entries = dedup.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 400);
    }
}
