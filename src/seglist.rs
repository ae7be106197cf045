//! Segregated free lists.
//!
//! The table of sentinels lives at the very start of the heap region. Each
//! sentinel is a two-word node (`next`, `prev`) heading a circular
//! doubly-linked list; an empty list points back at its own sentinel.
//!
//! ```text
//!   class:      0     1     2          8      9
//!   limit:     32    64   128  ...  8192      ∞
//!            ┌─────┬─────┬─────┬───┬──────┬──────┐
//!   table →  │ n p │ n p │ n p │...│ n p  │ n p  │
//!            └──┬──┴─────┴─────┴───┴──────┴──────┘
//!               ▼
//!            free block ⇄ free block ⇄ ... ⇄ (back to sentinel)
//! ```

use crate::block::{self, DSIZE};

/// Number of size classes.
pub const SEGSIZE: usize = 10;

/// Inclusive upper bound (total block size) of classes `0..SEGSIZE - 1`.
/// The last class is unbounded.
pub const CLASS_LIMITS: [usize; SEGSIZE - 1] = [32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

/// Bytes occupied by the sentinel table.
pub const TABLE_SIZE: usize = SEGSIZE * DSIZE;

/// Maps a block size to its size class.
pub fn classify(size: usize) -> usize {
  CLASS_LIMITS
    .iter()
    .position(|&limit| size <= limit)
    .unwrap_or(SEGSIZE - 1)
}

/// Handle on the sentinel table at offset `table` of the heap.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SegList {
  table: usize,
}

impl SegList {
  /// Points every sentinel at itself.
  pub fn init(
    bytes: &mut [u8],
    table: usize,
  ) -> Self {
    let list = Self { table };
    for class in 0..SEGSIZE {
      let sentinel = list.sentinel(class);
      block::set_next_link(bytes, sentinel, sentinel);
      block::set_prev_link(bytes, sentinel, sentinel);
    }
    list
  }

  pub fn sentinel(
    &self,
    class: usize,
  ) -> usize {
    self.table + class * DSIZE
  }

  pub fn is_sentinel(
    &self,
    node: usize,
  ) -> bool {
    node >= self.table && node < self.table + TABLE_SIZE && (node - self.table) % DSIZE == 0
  }

  /// Pushes `bp` at the head of the list for `size`.
  pub fn insert(
    &self,
    bytes: &mut [u8],
    bp: usize,
    size: usize,
  ) {
    let start = self.sentinel(classify(size));
    let after = block::next_link(bytes, start);

    block::set_prev_link(bytes, bp, start);
    block::set_next_link(bytes, bp, after);
    block::set_prev_link(bytes, after, bp);
    block::set_next_link(bytes, start, bp);
  }

  /// Unlinks `bp` from whichever list holds it.
  pub fn remove(
    bytes: &mut [u8],
    bp: usize,
  ) {
    let prev = block::prev_link(bytes, bp);
    let next = block::next_link(bytes, bp);

    block::set_next_link(bytes, prev, next);
    block::set_prev_link(bytes, next, prev);
  }

  /// Walks the list of `class` from head to tail, excluding the sentinel.
  pub fn iter<'a>(
    &self,
    bytes: &'a [u8],
    class: usize,
  ) -> ClassIter<'a> {
    let sentinel = self.sentinel(class);
    ClassIter {
      bytes,
      sentinel,
      current: block::next_link(bytes, sentinel),
    }
  }

  pub fn is_empty(
    &self,
    bytes: &[u8],
    class: usize,
  ) -> bool {
    let sentinel = self.sentinel(class);
    block::next_link(bytes, sentinel) == sentinel
  }
}

/// Iterator over the nodes of one size class.
///
/// It trusts the links; callers walking a possibly corrupt heap must bound it.
pub(crate) struct ClassIter<'a> {
  bytes: &'a [u8],
  sentinel: usize,
  current: usize,
}

impl Iterator for ClassIter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    if self.current == self.sentinel || self.current > self.bytes.len().saturating_sub(DSIZE) {
      return None;
    }
    let node = self.current;
    self.current = block::next_link(self.bytes, node);
    Some(node)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fresh() -> (Vec<u8>, SegList) {
    let mut bytes = vec![0u8; TABLE_SIZE + 16 * DSIZE];
    let list = SegList::init(&mut bytes, 0);
    (bytes, list)
  }

  #[test]
  fn test_classify_thresholds() {
    assert_eq!(classify(0), 0);
    assert_eq!(classify(32), 0);
    assert_eq!(classify(33), 1);
    assert_eq!(classify(64), 1);
    assert_eq!(classify(128), 2);
    assert_eq!(classify(256), 3);
    assert_eq!(classify(512), 4);
    assert_eq!(classify(1024), 5);
    assert_eq!(classify(2048), 6);
    assert_eq!(classify(4096), 7);
    assert_eq!(classify(8192), 8);
    assert_eq!(classify(8193), 9);
    assert_eq!(classify(usize::MAX), 9);
  }

  #[test]
  fn test_classify_monotonic() {
    let mut last = 0;
    for size in (0..20_000).step_by(8) {
      let class = classify(size);
      assert!(class >= last);
      last = class;
    }
  }

  #[test]
  fn test_empty_lists() {
    let (bytes, list) = fresh();
    for class in 0..SEGSIZE {
      assert!(list.is_empty(&bytes, class));
      assert_eq!(list.iter(&bytes, class).count(), 0);
    }
  }

  #[test]
  fn test_insert_is_lifo() {
    let (mut bytes, list) = fresh();
    let a = TABLE_SIZE + 2 * DSIZE;
    let b = TABLE_SIZE + 4 * DSIZE;
    let c = TABLE_SIZE + 6 * DSIZE;

    list.insert(&mut bytes, a, 48);
    list.insert(&mut bytes, b, 64);
    list.insert(&mut bytes, c, 4096);

    assert_eq!(list.iter(&bytes, 1).collect::<Vec<_>>(), vec![b, a]);
    assert_eq!(list.iter(&bytes, 7).collect::<Vec<_>>(), vec![c]);
    assert!(list.is_empty(&bytes, 0));
  }

  #[test]
  fn test_remove_from_middle_and_ends() {
    let (mut bytes, list) = fresh();
    let nodes: Vec<usize> = (1..=3).map(|i| TABLE_SIZE + 2 * i * DSIZE).collect();

    for &node in &nodes {
      list.insert(&mut bytes, node, 100);
    }

    SegList::remove(&mut bytes, nodes[1]);
    assert_eq!(list.iter(&bytes, 2).collect::<Vec<_>>(), vec![nodes[2], nodes[0]]);

    SegList::remove(&mut bytes, nodes[2]);
    SegList::remove(&mut bytes, nodes[0]);
    assert!(list.is_empty(&bytes, 2));

    // The sentinel points back at itself in both directions.
    let sentinel = list.sentinel(2);
    assert_eq!(block::prev_link(&bytes, sentinel), sentinel);
  }

  #[test]
  fn test_is_sentinel() {
    let (_, list) = fresh();
    assert!(list.is_sentinel(0));
    assert!(list.is_sentinel(9 * DSIZE));
    assert!(!list.is_sentinel(TABLE_SIZE));
    assert!(!list.is_sentinel(DSIZE + 1));
  }
}
