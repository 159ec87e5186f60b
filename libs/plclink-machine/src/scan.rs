//! Access-driven scan registry
//!
//! Every read or write of machine data declares interest in the blocks it
//! touches. The poll loop only fetches registered blocks, so traffic tracks
//! what callers actually use. Interest carries a last-touched timestamp and
//! lapses once nothing has touched the block for the expiry window.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::region::Region;

#[derive(Default)]
pub struct ScanRegistry {
    interest: Mutex<HashMap<Region, HashMap<usize, Instant>>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the blocks covering `[address, address+length)` as in use.
    ///
    /// Returns true when at least one block was not registered before, i.e.
    /// the next pass will fetch data the cache has never held.
    pub fn register_interest(
        &self,
        region: Region,
        address: usize,
        length: usize,
        block_size: usize,
    ) -> bool {
        if length == 0 || block_size == 0 {
            return false;
        }
        let first = address / block_size;
        let last = (address + length - 1) / block_size;
        let now = Instant::now();
        let mut interest = self.interest.lock();
        let blocks = interest.entry(region).or_default();
        let mut added = false;
        for block in first..=last {
            if blocks.insert(block, now).is_none() {
                added = true;
            }
        }
        added
    }

    /// Registered block indices for a region, sorted ascending.
    pub fn list_interest(&self, region: Region) -> Vec<usize> {
        let interest = self.interest.lock();
        let mut blocks: Vec<usize> = interest
            .get(&region)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        blocks.sort_unstable();
        blocks
    }

    /// Drop every block that has not been touched within `ttl`.
    pub fn expire_stale(&self, ttl: Duration) {
        let now = Instant::now();
        let mut interest = self.interest.lock();
        for blocks in interest.values_mut() {
            blocks.retain(|_, last| now.duration_since(*last) < ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Registration
    // ========================================================================

    #[test]
    fn test_register_reports_new_blocks_once() {
        let registry = ScanRegistry::new();
        assert!(registry.register_interest(Region::Dt, 10, 6, 250));
        assert!(!registry.register_interest(Region::Dt, 10, 6, 250));
        assert_eq!(registry.list_interest(Region::Dt), vec![0]);
    }

    #[test]
    fn test_register_spans_block_boundary() {
        let registry = ScanRegistry::new();
        assert!(registry.register_interest(Region::Dt, 248, 4, 250));
        assert_eq!(registry.list_interest(Region::Dt), vec![0, 1]);
        // One of the two blocks already known still counts as new coverage.
        assert!(registry.register_interest(Region::Dt, 498, 4, 250));
        assert_eq!(registry.list_interest(Region::Dt), vec![0, 1, 2]);
    }

    #[test]
    fn test_register_zero_length_is_noop() {
        let registry = ScanRegistry::new();
        assert!(!registry.register_interest(Region::Dt, 5, 0, 250));
        assert!(registry.list_interest(Region::Dt).is_empty());
    }

    #[test]
    fn test_regions_are_independent() {
        let registry = ScanRegistry::new();
        registry.register_interest(Region::Dt, 0, 1, 250);
        registry.register_interest(Region::R, 300, 1, 250);
        assert_eq!(registry.list_interest(Region::Dt), vec![0]);
        assert_eq!(registry.list_interest(Region::R), vec![1]);
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    #[test]
    fn test_expire_drops_untouched_blocks() {
        let registry = ScanRegistry::new();
        registry.register_interest(Region::Dt, 0, 1, 250);
        registry.expire_stale(Duration::ZERO);
        assert!(registry.list_interest(Region::Dt).is_empty());
    }

    #[test]
    fn test_touch_refreshes_expiry() {
        let registry = ScanRegistry::new();
        registry.register_interest(Region::Dt, 0, 1, 250);
        // Re-registering refreshes the timestamp, so a generous ttl keeps it.
        registry.register_interest(Region::Dt, 0, 1, 250);
        registry.expire_stale(Duration::from_secs(600));
        assert_eq!(registry.list_interest(Region::Dt), vec![0]);
    }
}
