//! Physical block layout.
//!
//! Every block is addressed by the offset of its payload (`bp`) from the start
//! of the heap region. The boundary tags sit one word on either side:
//!
//! ```text
//!            bp - WSIZE     bp                      bp + size - DSIZE
//!                 │          │                               │
//!   ──────────────┼──────────┼───────────────────────────────┼──────────┬─────
//!                 │  header  │  payload (or next/prev links) │  footer  │ next
//!                 │ size | a │                               │ size | a │ hdr
//!   ──────────────┴──────────┴───────────────────────────────┴──────────┴─────
//!                 ◄───────────────────── size ──────────────────────────►
//! ```
//!
//! A free block reuses the first two payload words as its free-list links,
//! stored as heap offsets.

use std::mem;

/// Word and header/footer size (bytes).
pub const WSIZE: usize = mem::size_of::<usize>();

/// Double word size (bytes); also the alignment unit.
pub const DSIZE: usize = 2 * WSIZE;

/// Header, footer and two link words.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

const ALLOC_BIT: usize = 0x1;

/// A boundary tag: a block size and its allocated flag packed into one word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  pub const fn new(
    size: usize,
    allocated: bool,
  ) -> Self {
    Self { size, allocated }
  }

  pub const fn pack(self) -> usize {
    self.size | (self.allocated as usize)
  }

  pub const fn unpack(word: usize) -> Self {
    Self {
      size: word & !(DSIZE - 1),
      allocated: word & ALLOC_BIT != 0,
    }
  }
}

/// A decoded view of the block at some payload offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
  Free { size: usize, prev: usize, next: usize },
  Allocated { size: usize },
}

impl Block {
  pub fn size(&self) -> usize {
    match *self {
      Block::Free { size, .. } | Block::Allocated { size } => size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self, Block::Free { .. })
  }
}

/// Reads the word at `offset`.
#[inline]
pub(crate) fn get(
  bytes: &[u8],
  offset: usize,
) -> usize {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&bytes[offset..offset + WSIZE]);
  usize::from_ne_bytes(word)
}

/// Writes `value` as the word at `offset`.
#[inline]
pub(crate) fn put(
  bytes: &mut [u8],
  offset: usize,
  value: usize,
) {
  bytes[offset..offset + WSIZE].copy_from_slice(&value.to_ne_bytes());
}

#[inline]
pub(crate) const fn header_offset(bp: usize) -> usize {
  bp - WSIZE
}

#[inline]
pub(crate) fn header_at(
  bytes: &[u8],
  bp: usize,
) -> Tag {
  Tag::unpack(get(bytes, header_offset(bp)))
}

#[inline]
pub(crate) fn footer_offset(
  bytes: &[u8],
  bp: usize,
) -> usize {
  bp + header_at(bytes, bp).size - DSIZE
}

#[inline]
pub(crate) fn footer_at(
  bytes: &[u8],
  bp: usize,
) -> Tag {
  Tag::unpack(get(bytes, footer_offset(bytes, bp)))
}

/// Payload offset of the block physically after `bp`.
#[inline]
pub(crate) fn next_block_offset(
  bytes: &[u8],
  bp: usize,
) -> usize {
  bp + header_at(bytes, bp).size
}

/// Payload offset of the block physically before `bp`, found through its footer.
#[inline]
pub(crate) fn prev_block_offset(
  bytes: &[u8],
  bp: usize,
) -> usize {
  bp - Tag::unpack(get(bytes, bp - DSIZE)).size
}

/// Writes the header and the matching footer of the block at `bp`.
///
/// The footer position is derived from `tag.size`, not from the old header.
#[inline]
pub(crate) fn write_tags(
  bytes: &mut [u8],
  bp: usize,
  tag: Tag,
) {
  put(bytes, header_offset(bp), tag.pack());
  put(bytes, bp + tag.size - DSIZE, tag.pack());
}

/// Free-list link stored in the first payload word.
#[inline]
pub(crate) fn next_link(
  bytes: &[u8],
  bp: usize,
) -> usize {
  get(bytes, bp)
}

/// Free-list link stored in the second payload word.
#[inline]
pub(crate) fn prev_link(
  bytes: &[u8],
  bp: usize,
) -> usize {
  get(bytes, bp + WSIZE)
}

#[inline]
pub(crate) fn set_next_link(
  bytes: &mut [u8],
  bp: usize,
  next: usize,
) {
  put(bytes, bp, next);
}

#[inline]
pub(crate) fn set_prev_link(
  bytes: &mut [u8],
  bp: usize,
  prev: usize,
) {
  put(bytes, bp + WSIZE, prev);
}

/// Decodes the block at `bp`.
pub(crate) fn block_at(
  bytes: &[u8],
  bp: usize,
) -> Block {
  let tag = header_at(bytes, bp);
  if tag.allocated {
    Block::Allocated { size: tag.size }
  } else {
    Block::Free {
      size: tag.size,
      prev: prev_link(bytes, bp),
      next: next_link(bytes, bp),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tag_pack_layout() {
    assert_eq!(Tag::new(DSIZE, true).pack(), DSIZE | 1);
    assert_eq!(Tag::new(4096, false).pack(), 4096);
    assert_eq!(Tag::new(0, true).pack(), 1);

    let tag = Tag::unpack(Tag::new(48 * DSIZE, true).pack());
    assert_eq!(tag.size, 48 * DSIZE);
    assert!(tag.allocated);
  }

  #[test]
  fn test_neighbours() {
    let mut bytes = vec![0u8; 16 * DSIZE];

    // Two adjacent blocks: one of 2 double words, one of 4.
    let first = DSIZE;
    write_tags(&mut bytes, first, Tag::new(2 * DSIZE, true));
    let second = next_block_offset(&bytes, first);
    assert_eq!(second, first + 2 * DSIZE);

    write_tags(&mut bytes, second, Tag::new(4 * DSIZE, false));
    assert_eq!(prev_block_offset(&bytes, second), first);
    assert_eq!(footer_offset(&bytes, second), second + 3 * DSIZE);
    assert_eq!(header_at(&bytes, second), footer_at(&bytes, second));
  }

  #[test]
  fn test_block_view() {
    let mut bytes = vec![0u8; 8 * DSIZE];
    let bp = DSIZE;

    write_tags(&mut bytes, bp, Tag::new(MIN_BLOCK_SIZE, false));
    set_next_link(&mut bytes, bp, 7 * WSIZE);
    set_prev_link(&mut bytes, bp, 3 * WSIZE);

    let block = block_at(&bytes, bp);
    assert_eq!(
      block,
      Block::Free {
        size: MIN_BLOCK_SIZE,
        prev: 3 * WSIZE,
        next: 7 * WSIZE,
      }
    );
    assert!(block.is_free());

    write_tags(&mut bytes, bp, Tag::new(MIN_BLOCK_SIZE, true));
    assert_eq!(block_at(&bytes, bp), Block::Allocated { size: MIN_BLOCK_SIZE });
  }
}
