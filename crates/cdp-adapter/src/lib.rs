//! Chromium DevTools Protocol adapter.
//!
//! Owns the browser connection, tracks page targets as they are created and attached, prepares
//! every page (domains, bindings, init scripts) before it runs, and republishes protocol traffic
//! as [`RawEvent`]s on a broadcast bus. Page-level operations are exposed through the [`Cdp`]
//! trait so the recorder and the replay engine can be exercised against scripted doubles.

use tokio::sync::broadcast;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for a page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    /// Raw events emitted by the adapter before any higher-level aggregation.
    ///
    /// Timestamps are milliseconds since the Unix epoch.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum RawEvent {
        PageLifecycle {
            page: PageId,
            opener: Option<PageId>,
            phase: String,
            ts: u64,
        },
        /// Main-frame URL change. `same_document` is set for history API transitions.
        PageNavigated {
            page: PageId,
            url: String,
            same_document: bool,
            ts: u64,
        },
        DocumentLoaded {
            page: PageId,
            url: Option<String>,
            ts: u64,
        },
        BindingCalled {
            page: PageId,
            name: String,
            payload: String,
            ts: u64,
        },
        Console {
            page: PageId,
            level: String,
            text: String,
            ts: u64,
        },
        NetworkRequest {
            page: PageId,
            request_id: String,
            url: String,
            method: String,
            resource_type: String,
            headers: BTreeMap<String, String>,
            post_data: Option<String>,
            ts: u64,
        },
        NetworkResponse {
            page: PageId,
            request_id: String,
            url: String,
            method: String,
            status: i64,
            status_text: String,
            mime_type: String,
            resource_type: String,
            protocol: Option<String>,
            headers: BTreeMap<String, String>,
            ts: u64,
        },
        NetworkFinished {
            page: PageId,
            request_id: String,
            encoded_data_length: f64,
            ts: u64,
        },
        NetworkFailed {
            page: PageId,
            request_id: String,
            url: String,
            method: String,
            error_text: String,
            canceled: bool,
            ts: u64,
        },
        /// The browser connection ended; no further events will follow.
        Disconnected {
            reason: String,
        },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }

    impl RawEvent {
        pub fn page(&self) -> Option<PageId> {
            match self {
                RawEvent::PageLifecycle { page, .. }
                | RawEvent::PageNavigated { page, .. }
                | RawEvent::DocumentLoaded { page, .. }
                | RawEvent::BindingCalled { page, .. }
                | RawEvent::Console { page, .. }
                | RawEvent::NetworkRequest { page, .. }
                | RawEvent::NetworkResponse { page, .. }
                | RawEvent::NetworkFinished { page, .. }
                | RawEvent::NetworkFailed { page, .. } => Some(*page),
                RawEvent::Error { page, .. } => *page,
                RawEvent::Disconnected { .. } => None,
            }
        }
    }
}

pub mod adapter;
pub mod commands;
pub mod config;
pub mod discover;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod util;

pub use adapter::{Cdp, CdpAdapter, EventBus, PageInstall};
pub use commands::*;
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::RawEvent;
pub use ids::PageId;
pub use metrics::AdapterMetricsSnapshot;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// Helper to create an event bus suitable for hooking into the adapter.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    broadcast::channel(buffer)
}
