//! Cached region snapshots
//!
//! Fixed-size arrays behind `RwLock`s, one per region. All access is clipped
//! to the array bounds: out-of-range reads come back shortened (or empty),
//! out-of-range writes are truncated, and a start index past the end is a
//! no-op. Lengths never change after construction; `clear` zeroes in place.

use parking_lot::RwLock;

use crate::region::Region;

pub struct WordStore {
    data: RwLock<Box<[u16]>>,
}

impl WordStore {
    pub fn new(len: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u16; len].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of `[start, start+count)`, clipped to the array.
    pub fn get(&self, start: usize, count: usize) -> Vec<u16> {
        let data = self.data.read();
        if start >= data.len() {
            return Vec::new();
        }
        let end = start.saturating_add(count).min(data.len());
        data[start..end].to_vec()
    }

    /// Overwrite from `start`, truncating whatever does not fit.
    pub fn set(&self, start: usize, values: &[u16]) {
        let mut data = self.data.write();
        if start >= data.len() {
            return;
        }
        let end = start.saturating_add(values.len()).min(data.len());
        data[start..end].copy_from_slice(&values[..end - start]);
    }

    pub fn clear(&self) {
        self.data.write().fill(0);
    }
}

pub struct BitStore {
    data: RwLock<Box<[bool]>>,
}

impl BitStore {
    pub fn new(len: usize) -> Self {
        Self {
            data: RwLock::new(vec![false; len].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, start: usize, count: usize) -> Vec<bool> {
        let data = self.data.read();
        if start >= data.len() {
            return Vec::new();
        }
        let end = start.saturating_add(count).min(data.len());
        data[start..end].to_vec()
    }

    pub fn set(&self, start: usize, values: &[bool]) {
        let mut data = self.data.write();
        if start >= data.len() {
            return;
        }
        let end = start.saturating_add(values.len()).min(data.len());
        data[start..end].copy_from_slice(&values[..end - start]);
    }

    pub fn clear(&self) {
        self.data.write().fill(false);
    }
}

/// The machine's memory image: word and bit stores keyed by region, in a
/// fixed layout decided at construction. Region iteration order follows the
/// builder calls, which fixes the scan order of the poll loop.
#[derive(Default)]
pub struct RegionStore {
    words: Vec<(Region, WordStore)>,
    bits: Vec<(Region, BitStore)>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_words(mut self, region: Region, len: usize) -> Self {
        self.words.push((region, WordStore::new(len)));
        self
    }

    pub fn with_bits(mut self, region: Region, len: usize) -> Self {
        self.bits.push((region, BitStore::new(len)));
        self
    }

    pub fn words(&self, region: Region) -> Option<&WordStore> {
        self.words.iter().find(|(r, _)| *r == region).map(|(_, s)| s)
    }

    pub fn bits(&self, region: Region) -> Option<&BitStore> {
        self.bits.iter().find(|(r, _)| *r == region).map(|(_, s)| s)
    }

    pub fn word_regions(&self) -> Vec<Region> {
        self.words.iter().map(|(r, _)| *r).collect()
    }

    pub fn bit_regions(&self) -> Vec<Region> {
        self.bits.iter().map(|(r, _)| *r).collect()
    }

    /// Zero every store in place; allocation and lengths are untouched.
    pub fn clear_all(&self) {
        for (_, store) in &self.words {
            store.clear();
        }
        for (_, store) in &self.bits {
            store.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Clipping semantics
    // ========================================================================

    #[test]
    fn test_get_clips_to_length() {
        let store = WordStore::new(10);
        store.set(0, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(store.get(8, 5), vec![9, 10]);
        assert_eq!(store.get(10, 2), Vec::<u16>::new());
        assert_eq!(store.get(100, 1), Vec::<u16>::new());
    }

    #[test]
    fn test_set_truncates_past_end() {
        let store = WordStore::new(4);
        store.set(2, &[7, 8, 9, 10]);
        assert_eq!(store.get(0, 4), vec![0, 0, 7, 8]);
        store.set(4, &[1]);
        assert_eq!(store.get(0, 4), vec![0, 0, 7, 8]);
    }

    #[test]
    fn test_bit_store_clips_like_word_store() {
        let store = BitStore::new(8);
        store.set(6, &[true, true, true]);
        assert_eq!(store.get(5, 10), vec![false, true, true]);
        store.set(8, &[true]);
        assert_eq!(store.get(7, 1), vec![true]);
    }

    #[test]
    fn test_clear_keeps_length() {
        let store = WordStore::new(4);
        store.set(0, &[1, 2, 3, 4]);
        store.clear();
        assert_eq!(store.len(), 4);
        assert_eq!(store.get(0, 4), vec![0, 0, 0, 0]);
    }

    // ========================================================================
    // Region layout
    // ========================================================================

    #[test]
    fn test_region_lookup_and_order() {
        let store = RegionStore::new()
            .with_bits(Region::R, 16)
            .with_bits(Region::Y, 16)
            .with_words(Region::Dt, 8);
        assert_eq!(store.bit_regions(), vec![Region::R, Region::Y]);
        assert_eq!(store.word_regions(), vec![Region::Dt]);
        assert!(store.words(Region::Dt).is_some());
        assert!(store.words(Region::Dm).is_none());
        assert!(store.bits(Region::X).is_none());
    }

    #[test]
    fn test_clear_all_zeroes_every_region() {
        let store = RegionStore::new()
            .with_bits(Region::R, 4)
            .with_words(Region::Dt, 4);
        store
            .words(Region::Dt)
            .map(|s| s.set(0, &[5, 5, 5, 5]))
            .unwrap_or(());
        store
            .bits(Region::R)
            .map(|s| s.set(0, &[true, true, true, true]))
            .unwrap_or(());
        store.clear_all();
        assert_eq!(store.words(Region::Dt).map(|s| s.get(0, 4)), Some(vec![0, 0, 0, 0]));
        assert_eq!(
            store.bits(Region::R).map(|s| s.get(0, 4)),
            Some(vec![false, false, false, false])
        );
    }
}
