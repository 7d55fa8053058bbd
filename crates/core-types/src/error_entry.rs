//! Deduplicated console and network problems.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Characters of a console message that participate in its fingerprint.
pub const MESSAGE_PREFIX_CHARS: usize = 100;

/// Identity key of an [`ErrorEntry`]. Volatile detail (query strings, message tails)
/// is stripped so repeats collapse into one entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Fingerprint {
    #[serde(rename_all = "camelCase")]
    Console { level: String, message_prefix: String },
    #[serde(rename_all = "camelCase")]
    Network {
        method: String,
        /// HTTP status code, or the failure text for requests that never completed.
        outcome: String,
        url: String,
    },
}

impl Fingerprint {
    pub fn console(level: &str, message: &str) -> Self {
        Fingerprint::Console {
            level: level.to_ascii_lowercase(),
            message_prefix: message.trim().chars().take(MESSAGE_PREFIX_CHARS).collect(),
        }
    }

    pub fn network(method: &str, outcome: impl Into<String>, url: &str) -> Self {
        Fingerprint::Network {
            method: method.to_ascii_uppercase(),
            outcome: outcome.into(),
            url: strip_query(url),
        }
    }
}

/// Drops query string and fragment from a URL.
pub fn strip_query(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw
            .split(|c| c == '?' || c == '#')
            .next()
            .unwrap_or(raw)
            .to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    #[serde(flatten)]
    pub fingerprint: Fingerprint,
    /// Full text of the first occurrence.
    pub message: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(fingerprint: Fingerprint, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            message: message.into(),
            count: 1,
            first_seen: at,
            last_seen: at,
        }
    }

    /// Fold a repeat occurrence into this entry.
    pub fn merge(&mut self, at: DateTime<Utc>) {
        self.count += 1;
        if at < self.first_seen {
            self.first_seen = at;
        }
        if at > self.last_seen {
            self.last_seen = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn network_fingerprint_ignores_query_and_fragment() {
        let a = Fingerprint::network("get", "500", "https://api.test/items?page=1&ts=99");
        let b = Fingerprint::network("GET", "500", "https://api.test/items?page=2#top");
        assert_eq!(a, b);
        match a {
            Fingerprint::Network { url, method, .. } => {
                assert_eq!(url, "https://api.test/items");
                assert_eq!(method, "GET");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn console_fingerprint_uses_message_prefix() {
        let base = "x".repeat(MESSAGE_PREFIX_CHARS);
        let a = Fingerprint::console("error", &format!("{base} tail one"));
        let b = Fingerprint::console("ERROR", &format!("{base} tail two"));
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::console("warning", &base));
    }

    #[test]
    fn merge_tracks_count_and_window() {
        let t0 = Utc::now();
        let mut entry = ErrorEntry::new(Fingerprint::console("error", "boom"), "boom", t0);
        entry.merge(t0 + Duration::seconds(5));
        entry.merge(t0 + Duration::seconds(2));
        assert_eq!(entry.count, 3);
        assert_eq!(entry.first_seen, t0);
        assert_eq!(entry.last_seen, t0 + Duration::seconds(5));
    }

    #[test]
    fn serializes_flat_with_source_tag() {
        let entry = ErrorEntry::new(
            Fingerprint::network("POST", "net::ERR_FAILED", "https://api.test/x?y=1"),
            "net::ERR_FAILED",
            Utc::now(),
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["source"], "network");
        assert_eq!(value["url"], "https://api.test/x");
        assert_eq!(value["count"], 1);
    }
}
