//! Per-page in-flight request accounting fed by native `Network.*` protocol events.
//!
//! The recorder asks [`NetworkTapLight::inflight`] whether a freshly loaded page is still
//! fetching before it accepts interactions.

pub mod config;
mod ledger;

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::config::TapConfig;
use crate::ledger::PageLedger;

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

/// Counters for one page at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub req: u64,
    /// Open requests younger than [`TapConfig::stale_request_ms`].
    pub inflight: u64,
    /// Open requests older than that; they are not reported as in flight.
    pub stale: u64,
}

#[derive(Clone, Debug, Error)]
pub enum TapError {
    #[error("page not enabled")]
    PageNotEnabled,
}

#[derive(Clone, Debug)]
pub enum TapEvent {
    RequestWillBeSent { request_id: String },
    LoadingFinished { request_id: String },
    LoadingFailed { request_id: String },
}

#[derive(Default)]
pub struct NetworkTapLight {
    pages: DashMap<PageId, Arc<Mutex<PageLedger>>>,
    config: TapConfig,
}

impl NetworkTapLight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TapConfig) -> Self {
        Self {
            pages: DashMap::new(),
            config,
        }
    }

    /// Start tracking `page`. Existing counters are kept.
    pub fn enable(&self, page: PageId) {
        self.pages
            .entry(page)
            .or_insert_with(|| Arc::new(Mutex::new(PageLedger::default())));
    }

    pub fn disable(&self, page: PageId) -> Result<(), TapError> {
        match self.pages.remove(&page) {
            Some(_) => Ok(()),
            None => Err(TapError::PageNotEnabled),
        }
    }

    pub fn is_enabled(&self, page: PageId) -> bool {
        self.pages.contains_key(&page)
    }

    fn ledger(&self, page: PageId) -> Option<Arc<Mutex<PageLedger>>> {
        self.pages.get(&page).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn current_snapshot(&self, page: PageId) -> Option<NetworkSnapshot> {
        let ledger = self.ledger(page)?;
        let snapshot = ledger.lock().await.snapshot(Instant::now(), &self.config);
        Some(snapshot)
    }

    /// Pending requests for `page`; zero for pages the tap does not know.
    pub async fn inflight(&self, page: PageId) -> u64 {
        match self.current_snapshot(page).await {
            Some(snapshot) => snapshot.inflight,
            None => 0,
        }
    }

    pub async fn ingest(&self, page: PageId, event: TapEvent) -> Result<(), TapError> {
        let ledger = self.ledger(page).ok_or(TapError::PageNotEnabled)?;
        let open = {
            let mut ledger = ledger.lock().await;
            ledger.apply(&event, Instant::now());
            ledger.open()
        };
        trace!(target: "network-tap", ?page, open, ?event, "tap event");
        Ok(())
    }
}
