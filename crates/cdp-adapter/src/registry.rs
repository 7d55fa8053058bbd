//! Page targets the adapter drives, in the order they appeared.
//!
//! The first page seen is the one a recording starts in and a replay drives, so ordering is kept
//! explicitly rather than relying on map iteration.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::PageId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetContext {
    pub target_id: Option<String>,
    pub cdp_session: Option<String>,
    pub recent_url: Option<String>,
    pub seq: u64,
}

#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, TargetContext>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(
        &self,
        page: PageId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        let context = TargetContext {
            target_id,
            cdp_session,
            recent_url: None,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.pages.insert(page, context);
    }

    pub fn remove_page(&self, page: &PageId) {
        self.pages.remove(page);
    }

    /// Snapshot of all pages, oldest first.
    pub fn iter(&self) -> Vec<(PageId, TargetContext)> {
        let mut pages: Vec<_> = self
            .pages
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        pages.sort_unstable_by_key(|(_, context)| context.seq);
        pages
    }

    /// Oldest page satisfying `accept`.
    pub fn oldest(&self, accept: impl Fn(&PageId, &TargetContext) -> bool) -> Option<PageId> {
        self.iter()
            .into_iter()
            .find(|(page, context)| accept(page, context))
            .map(|(page, _)| page)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    fn update(&self, page: &PageId, apply: impl FnOnce(&mut TargetContext)) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            apply(entry.value_mut());
        }
    }

    pub fn set_recent_url(&self, page: &PageId, url: String) {
        self.update(page, |context| context.recent_url = Some(url));
    }

    pub fn recent_url(&self, page: &PageId) -> Option<String> {
        self.pages.get(page)?.recent_url.clone()
    }

    pub fn set_cdp_session(&self, page: &PageId, session: String) {
        self.update(page, |context| context.cdp_session = Some(session));
    }

    pub fn get_cdp_session(&self, page: &PageId) -> Option<String> {
        self.pages.get(page)?.cdp_session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_follows_insertion_order_not_hashing() {
        let registry = Registry::new();
        let pages: Vec<PageId> = (0..4).map(|_| PageId::new()).collect();
        for (idx, page) in pages.iter().enumerate() {
            registry.insert_page(*page, Some(format!("t{idx}")), None);
        }
        registry.set_cdp_session(&pages[2], "s2".into());
        registry.set_cdp_session(&pages[3], "s3".into());

        let attached = |_: &PageId, context: &TargetContext| context.cdp_session.is_some();
        assert_eq!(registry.oldest(attached), Some(pages[2]));

        registry.set_cdp_session(&pages[1], "s1".into());
        assert_eq!(registry.oldest(attached), Some(pages[1]));

        registry.remove_page(&pages[1]);
        assert_eq!(registry.oldest(attached), Some(pages[2]));
        assert_eq!(registry.get_cdp_session(&pages[3]).as_deref(), Some("s3"));
    }

    #[test]
    fn updates_to_unknown_pages_are_ignored() {
        let registry = Registry::new();
        let page = PageId::new();
        registry.set_recent_url(&page, "https://shop.test/".into());
        assert!(registry.recent_url(&page).is_none());
        assert!(registry.is_empty());
    }
}
