//! Interpolation search over the sorted lookup tables.
//!
//! Both the block-hash table and the unspent-output table keep entries in
//! raw byte order and probe with an 8-byte "mini-key" cut from the tail of
//! the hash. The mini-key only steers the probe position; correctness comes
//! from the full-key comparison, so a disordered or collapsed mini-key
//! window degrades to binary midpoints and the search still terminates.

use std::cmp::Ordering;

/// The last eight hash bytes read back to front, matching the byte order the
/// on-disk tables have always used.
pub(crate) fn mini_key(hash: &[u8; 32]) -> u64 {
    u64::from_le_bytes([
        hash[24], hash[25], hash[26], hash[27], hash[28], hash[29], hash[30], hash[31],
    ])
}

/// Find the position of the entry equal to the target, or the insertion
/// point when absent. `cmp` orders an entry against the target; `mini` maps
/// an entry to its interpolation coordinate.
///
/// Total on any input: every iteration either returns or strictly shrinks
/// the window, and the probe is clamped strictly inside it, so equal
/// mini-keys (the division-by-zero hazard) and one-element windows cannot
/// loop.
pub(crate) fn interpolation_search<T>(
    items: &[T],
    target_mini: u64,
    mini: impl Fn(&T) -> u64,
    cmp: impl Fn(&T) -> Ordering,
) -> (usize, bool) {
    if items.is_empty() {
        return (0, false);
    }
    let mut left = 0usize;
    let mut right = items.len() - 1;
    loop {
        match cmp(&items[left]) {
            Ordering::Greater => return (left, false),
            Ordering::Equal => return (left, true),
            Ordering::Less => {}
        }
        match cmp(&items[right]) {
            Ordering::Less => return (right + 1, false),
            Ordering::Equal => return (right, true),
            Ordering::Greater => {}
        }
        if right - left <= 1 {
            // Strictly between two adjacent entries.
            return (right, false);
        }
        let left_mini = mini(&items[left]);
        let right_mini = mini(&items[right]);
        let mut pos = if right_mini > left_mini
            && (left_mini..=right_mini).contains(&target_mini)
        {
            left + (((right - left) as u128 * (target_mini - left_mini) as u128)
                / (right_mini - left_mini) as u128) as usize
        } else {
            left + (right - left) / 2
        };
        pos = pos.clamp(left + 1, right - 1);
        match cmp(&items[pos]) {
            Ordering::Equal => return (pos, true),
            Ordering::Less => left = pos,
            Ordering::Greater => right = pos,
        }
    }
}
