//! Growable list of entry ids recording the children of one directory.
//!
//! Archives list their members one at a time, so a directory's children are
//! discovered incrementally during a single pass. The buffer grows the way a
//! byte buffer does: reslice into spare capacity when possible, slide the
//! unread region to the front when most of the storage has already been
//! consumed, and otherwise reallocate to `2 * capacity + n`. Appends are
//! amortized O(1) and an n-member archive never costs O(n^2) in copies.

use crate::entry::EntryId;
use crate::error::{Result, VfsError};

/// Minimal capacity of the first allocation.
const SMALL_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct DirIndex {
    buf: Vec<EntryId>,
    off: usize,
}

impl DirIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one id.
    pub fn add(&mut self, id: EntryId) -> Result<()> {
        let at = self.grow(1)?;
        self.buf[at] = id;
        Ok(())
    }

    /// Append a batch of ids in order.
    pub fn extend(&mut self, ids: &[EntryId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let at = self.grow(ids.len())?;
        self.buf[at..at + ids.len()].copy_from_slice(ids);
        Ok(())
    }

    /// Live view of the ids that have not been consumed by `pop_front`.
    pub fn entries(&self) -> &[EntryId] {
        &self.buf[self.off..]
    }

    /// Number of unread ids.
    pub fn len(&self) -> usize {
        self.buf.len() - self.off
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Consume the oldest unread id.
    pub fn pop_front(&mut self) -> Option<EntryId> {
        let id = *self.buf.get(self.off)?;
        self.off += 1;
        Some(id)
    }

    /// Empty the buffer, keeping its storage.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.off = 0;
    }

    /// Fast path: there is room after the logical end.
    fn try_grow_by_reslice(&mut self, n: usize) -> Option<usize> {
        let l = self.buf.len();
        if n <= self.buf.capacity() - l {
            self.buf.resize(l + n, 0);
            return Some(l);
        }
        None
    }

    /// Make room for `n` more ids, returning the position to write them at.
    fn grow(&mut self, n: usize) -> Result<usize> {
        let m = self.len();
        if m == 0 && self.off != 0 {
            self.reset();
        }
        if let Some(at) = self.try_grow_by_reslice(n) {
            return Ok(at);
        }
        if self.buf.capacity() == 0 && n <= SMALL_BUFFER_SIZE {
            self.buf = make_entries(SMALL_BUFFER_SIZE)?;
            self.buf.resize(n, 0);
            return Ok(0);
        }

        let c = self.buf.capacity();
        let needed = m.checked_add(n).ok_or(VfsError::CapacityExceeded)?;
        if needed <= c / 2 {
            // Sliding only needs m + n <= c, but waiting until the storage is
            // half consumed keeps copies from dominating.
            self.buf.copy_within(self.off.., 0);
            self.buf.truncate(m);
        } else {
            let mut index = make_entries(grown_capacity(c, n)?)?;
            index.extend_from_slice(&self.buf[self.off..]);
            self.buf = index;
        }
        self.off = 0;
        self.buf.resize(needed, 0);
        Ok(m)
    }
}

/// `2 * c + n`, or `CapacityExceeded` if that is not representable.
fn grown_capacity(c: usize, n: usize) -> Result<usize> {
    c.checked_mul(2)
        .and_then(|doubled| doubled.checked_add(n))
        .ok_or(VfsError::CapacityExceeded)
}

/// Allocate empty storage for `cap` ids without aborting on failure.
fn make_entries(cap: usize) -> Result<Vec<EntryId>> {
    let mut index = Vec::new();
    index
        .try_reserve_exact(cap)
        .map_err(|_| VfsError::CapacityExceeded)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_insertion_order() {
        let mut index = DirIndex::new();
        for id in [5, 1, 9, 3] {
            index.add(id).unwrap();
        }
        assert_eq!(index.entries(), &[5, 1, 9, 3]);
        assert_eq!(index.len(), 4);
        assert!(index.capacity() >= SMALL_BUFFER_SIZE);
    }

    #[test]
    fn test_single_and_batch_appends_match() {
        for k in [0usize, 1, 63, 64, 65, 200, 1000] {
            let ids: Vec<EntryId> = (0..k).map(|i| i * 7 + 1).collect();

            let mut one_by_one = DirIndex::new();
            for &id in &ids {
                one_by_one.add(id).unwrap();
            }

            let mut batch = DirIndex::new();
            batch.extend(&ids).unwrap();

            assert_eq!(one_by_one.entries(), batch.entries(), "k = {}", k);
            assert_eq!(one_by_one.entries(), ids.as_slice());
        }
    }

    #[test]
    fn test_reallocations_are_logarithmic() {
        let mut index = DirIndex::new();
        let mut reallocations = 0;
        let mut last_capacity = index.capacity();

        for id in 0..100_000 {
            index.add(id).unwrap();
            if index.capacity() != last_capacity {
                reallocations += 1;
                last_capacity = index.capacity();
            }
        }

        assert_eq!(index.len(), 100_000);
        assert!(reallocations <= 20, "{} reallocations", reallocations);
    }

    #[test]
    fn test_slide_reuses_consumed_space() {
        let mut index = DirIndex::new();
        index.extend(&(0..64).collect::<Vec<_>>()).unwrap();
        let capacity = index.capacity();

        for expected in 0..60 {
            assert_eq!(index.pop_front(), Some(expected));
        }
        assert_eq!(index.len(), 4);

        // Full storage but mostly consumed: slide instead of reallocating.
        index.add(1000).unwrap();
        assert_eq!(index.capacity(), capacity);
        assert_eq!(index.entries(), &[60, 61, 62, 63, 1000]);
    }

    #[test]
    fn test_drained_buffer_resets_on_next_add() {
        let mut index = DirIndex::new();
        index.extend(&[1, 2, 3]).unwrap();
        while index.pop_front().is_some() {}
        assert!(index.is_empty());

        index.add(4).unwrap();
        assert_eq!(index.entries(), &[4]);
    }

    #[test]
    fn test_reset() {
        let mut index = DirIndex::new();
        index.extend(&[1, 2, 3]).unwrap();
        index.pop_front();
        index.reset();
        assert!(index.is_empty());
        assert_eq!(index.entries(), &[] as &[EntryId]);
        assert_eq!(index.pop_front(), None);
    }

    #[test]
    fn test_capacity_overflow_is_an_error() {
        assert!(matches!(
            grown_capacity(usize::MAX / 2 + 1, 1),
            Err(VfsError::CapacityExceeded)
        ));
        assert!(matches!(
            make_entries(usize::MAX / 2),
            Err(VfsError::CapacityExceeded)
        ));
        assert_eq!(grown_capacity(64, 1).unwrap(), 129);
    }
}
