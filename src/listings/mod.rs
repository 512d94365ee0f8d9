//! Upstream vehicle-listing API: paginated inventory and per-listing detail.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::UpstreamError;
use crate::models::{Listing, SearchPage};

pub mod client;

pub use client::SearchClient;

/// Snapshot of the dealer's current inventory. Possibly partial.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub listings: Vec<Listing>,
    /// Total reported by the upstream; 0 if it never reported one.
    pub total_count: u64,
    /// Pages skipped after exhausting retries or being rejected.
    pub failed_pages: Vec<u32>,
}

#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Fetch pages `1..=max_pages`. Never fails: unusable pages are skipped.
    async fn fetch_all(&self, max_pages: u32) -> Inventory;
}

#[async_trait]
pub trait ListingDetailSource: Send + Sync {
    /// Full listing, or `None` if the upstream no longer knows the id.
    async fn fetch_detail(&self, listing_id: &str) -> Result<Option<Listing>, UpstreamError>;
}

/// Collects pages into an [`Inventory`], de-duplicating by listing id.
#[derive(Debug)]
pub struct InventoryAccumulator {
    inventory: Inventory,
    seen: HashSet<String>,
    item_cap: Option<usize>,
}

impl InventoryAccumulator {
    pub fn new(item_cap: Option<usize>) -> Self {
        Self {
            inventory: Inventory::default(),
            seen: HashSet::new(),
            item_cap,
        }
    }

    /// Adds page `number`. Returns `false` when pagination should stop: the
    /// upstream sent no items, or the item cap is reached. A page whose items
    /// all failed to parse counts as failed and does not end the walk.
    pub fn push_page(&mut self, number: u32, page: SearchPage) -> bool {
        if let Some(total) = page.total {
            self.inventory.total_count = total;
        }
        if page.received == 0 {
            return false;
        }
        if page.is_unreadable() {
            warn!(page = number, received = page.received, "no usable listing on page");
            self.skip_page(number);
            return true;
        }

        for listing in page.ads {
            if self.seen.insert(listing.id.clone()) {
                self.inventory.listings.push(listing);
            }
        }

        !self.cap_reached()
    }

    pub fn skip_page(&mut self, page: u32) {
        self.inventory.failed_pages.push(page);
    }

    pub fn cap_reached(&self) -> bool {
        self.item_cap
            .is_some_and(|cap| self.inventory.listings.len() >= cap)
    }

    pub fn finish(self) -> Inventory {
        self.inventory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(ids: &[&str], total: Option<u64>) -> SearchPage {
        SearchPage {
            received: ids.len(),
            ads: ids
                .iter()
                .map(|id| Listing {
                    id: id.to_string(),
                    ..Default::default()
                })
                .collect(),
            total,
        }
    }

    fn ids(inventory: &Inventory) -> Vec<&str> {
        inventory.listings.iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn test_overlapping_pages_are_deduplicated() {
        let mut acc = InventoryAccumulator::new(None);
        assert!(acc.push_page(1, page(&["a", "b", "c"], Some(5))));
        assert!(acc.push_page(1, page(&["c", "d", "e"], Some(5))));

        let inventory = acc.finish();
        assert_eq!(ids(&inventory), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(inventory.total_count, 5);
    }

    #[test]
    fn test_empty_page_stops_pagination() {
        let mut acc = InventoryAccumulator::new(None);
        assert!(acc.push_page(1, page(&["a"], None)));
        assert!(!acc.push_page(1, page(&[], None)));
        assert_eq!(acc.finish().total_count, 0);
    }

    #[test]
    fn test_item_cap_stops_pagination() {
        let mut acc = InventoryAccumulator::new(Some(3));
        assert!(acc.push_page(1, page(&["a", "b"], None)));
        assert!(!acc.push_page(1, page(&["c", "d"], None)));
        // The page that crosses the cap is kept whole.
        assert_eq!(ids(&acc.finish()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_unreadable_page_is_reported_and_walk_continues() {
        let mut acc = InventoryAccumulator::new(None);
        let broken = SearchPage {
            ads: Vec::new(),
            received: 2,
            total: Some(4),
        };
        assert!(acc.push_page(1, broken));
        assert!(acc.push_page(2, page(&["x", "y"], Some(4))));

        let inventory = acc.finish();
        assert_eq!(ids(&inventory), vec!["x", "y"]);
        assert_eq!(inventory.failed_pages, vec![1]);
    }

    #[test]
    fn test_skipped_pages_are_reported() {
        let mut acc = InventoryAccumulator::new(None);
        acc.skip_page(2);
        assert_eq!(acc.finish().failed_pages, vec![2]);
    }
}
