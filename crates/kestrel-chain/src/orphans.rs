//! Bounded cache of blocks whose parent is not yet known.

use crate::MAX_ORPHANS;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Orphan {
    pub bytes: Vec<u8>,
    pub hash: [u8; 32],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrphanPool {
    orphans: Vec<Orphan>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.orphans.len() >= MAX_ORPHANS
    }

    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.orphans.iter().any(|o| &o.hash == hash)
    }

    /// Add an orphan. Returns false when the pool is at capacity.
    pub fn add(&mut self, orphan: Orphan) -> bool {
        if self.is_full() {
            return false;
        }
        self.orphans.push(orphan);
        true
    }

    /// Drop the most recently added orphan, undoing an `add` whose persist
    /// step failed.
    pub(crate) fn pop(&mut self) -> Option<Orphan> {
        self.orphans.pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Orphan> {
        self.orphans.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(seed: u8) -> Orphan {
        Orphan {
            bytes: vec![seed; 81],
            hash: [seed; 32],
        }
    }

    #[test]
    fn capacity_is_three() {
        let mut pool = OrphanPool::new();
        for seed in 1..=3u8 {
            assert!(pool.add(orphan(seed)));
        }
        assert!(pool.is_full());
        assert!(!pool.add(orphan(4)));
        assert_eq!(pool.len(), MAX_ORPHANS);
        assert!(pool.contains(&[2u8; 32]));
        assert!(!pool.contains(&[4u8; 32]));
    }
}
