//! Heap consistency checker.
//!
//! Walks the physical block chain from the prologue to the epilogue and every
//! size-class list, and reports whatever does not add up. It only reads the
//! heap, and is meant for tests and debugging rather than the allocation path.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt::{self, Write},
};

use tracing::warn;

use crate::{
  allocator::Allocator,
  block::{self, DSIZE, Tag, WSIZE},
  heap::HeapRegion,
  seglist::{SEGSIZE, classify},
};

/// A broken heap invariant. Finding one means an earlier operation (or a
/// caller misusing the allocator) corrupted the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
  NotInitialized,
  BadPrologue { header: Tag, footer: Tag },
  BadEpilogue { offset: usize, tag: Tag },
  Misaligned { offset: usize },
  TagMismatch { offset: usize, header: Tag, footer: Tag },
  OutOfBounds { offset: usize },
  FreeBlockNotListed { offset: usize, size: usize, class: usize },
  WrongClass { offset: usize, expected: usize, found: usize },
  AllocatedBlockListed { offset: usize, class: usize },
  Uncoalesced { first: usize, second: usize },
  BrokenLink { class: usize, offset: usize },
  ListedTwice { class: usize, offset: usize },
  ListedNotABlock { class: usize, offset: usize },
  CountMismatch { listed: usize, walked: usize },
}

impl fmt::Display for Violation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match *self {
      Violation::NotInitialized => f.write_str("heap is not initialized"),
      Violation::BadPrologue { header, footer } => write!(
        f,
        "bad prologue: header [{}] footer [{}]",
        fmt_tag(header),
        fmt_tag(footer)
      ),
      Violation::BadEpilogue { offset, tag } => {
        write!(f, "bad epilogue header [{}] at {offset:#x}", fmt_tag(tag))
      }
      Violation::Misaligned { offset } => {
        write!(f, "{offset:#x} is not double-word aligned")
      }
      Violation::TagMismatch {
        offset,
        header,
        footer,
      } => write!(
        f,
        "header [{}] does not match footer [{}] at {offset:#x}",
        fmt_tag(header),
        fmt_tag(footer)
      ),
      Violation::OutOfBounds { offset } => {
        write!(f, "block at {offset:#x} runs past the end of the heap")
      }
      Violation::FreeBlockNotListed {
        offset,
        size,
        class,
      } => write!(
        f,
        "free block {offset:#x} of size {size} is not in free list {class}"
      ),
      Violation::WrongClass {
        offset,
        expected,
        found,
      } => write!(
        f,
        "free block {offset:#x} is in free list {found} instead of {expected}"
      ),
      Violation::AllocatedBlockListed { offset, class } => {
        write!(f, "allocated block {offset:#x} is in free list {class}")
      }
      Violation::Uncoalesced { first, second } => write!(
        f,
        "adjacent free blocks {first:#x} and {second:#x} escaped coalescing"
      ),
      Violation::BrokenLink { class, offset } => {
        write!(f, "broken link at {offset:#x} in free list {class}")
      }
      Violation::ListedTwice { class, offset } => {
        write!(f, "{offset:#x} appears twice in the free lists (list {class})")
      }
      Violation::ListedNotABlock { class, offset } => {
        write!(f, "free list {class} holds {offset:#x}, which is not a block")
      }
      Violation::CountMismatch { listed, walked } => write!(
        f,
        "free lists hold {listed} blocks but the heap has {walked} free blocks"
      ),
    }
  }
}

fn fmt_tag(tag: Tag) -> String {
  format!("{}:{}", tag.size, if tag.allocated { 'a' } else { 'f' })
}

/// Outcome of a consistency check.
#[derive(Clone, Debug, Default)]
pub struct Report {
  pub violations: Vec<Violation>,
  /// Blocks walked between the prologue and the epilogue, prologue included.
  pub blocks: usize,
  pub free_blocks: usize,
  text: String,
}

impl Report {
  pub fn is_consistent(&self) -> bool {
    self.violations.is_empty()
  }

  /// The human-readable diagnostic text.
  pub fn text(&self) -> &str {
    &self.text
  }

  fn push(
    &mut self,
    violation: Violation,
  ) {
    self.violations.push(violation);
  }
}

impl fmt::Display for Report {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(&self.text)
  }
}

impl<H: HeapRegion> Allocator<H> {
  /// Checks every heap invariant. With `verbose`, the report text also
  /// lists every block and every free list.
  pub fn check_consistency(
    &self,
    verbose: bool,
  ) -> Report {
    let mut report = Report::default();

    let Some(bootstrap) = self.bootstrap else {
      report.push(Violation::NotInitialized);
      return finish(report);
    };

    let bytes = self.heap.bytes();
    let base = self.heap.base() as usize;
    let max_blocks = self.max_blocks();
    let seglist = bootstrap.seglist;

    if verbose {
      let _ = writeln!(report.text, "Heap ({:#x}, {} bytes):", base, bytes.len());
    }

    let prologue = bootstrap.prologue;
    let header = block::header_at(bytes, prologue);
    let footer = Tag::unpack(block::get(bytes, prologue));
    if header != Tag::new(DSIZE, true) || footer != header {
      report.push(Violation::BadPrologue { header, footer });
    }

    // Free lists: node -> class.
    let mut listed = BTreeMap::new();
    for class in 0..SEGSIZE {
      if verbose && seglist.is_empty(bytes, class) {
        let _ = writeln!(report.text, "  list {class}: empty");
      }

      let sentinel = seglist.sentinel(class);
      let mut prev = sentinel;
      let mut node = block::next_link(bytes, sentinel);
      let mut length = 0;

      while node != sentinel {
        if node < WSIZE
          || node > bytes.len().saturating_sub(DSIZE)
          || seglist.is_sentinel(node)
          || length > max_blocks
        {
          report.push(Violation::BrokenLink { class, offset: prev });
          break;
        }
        if block::prev_link(bytes, node) != prev {
          report.push(Violation::BrokenLink { class, offset: node });
        }
        if listed.insert(node, class).is_some() {
          report.push(Violation::ListedTwice { class, offset: node });
          break;
        }
        if verbose {
          let _ = writeln!(
            report.text,
            "  list {class}: {node:#x} [{}]",
            fmt_tag(block::header_at(bytes, node))
          );
        }
        prev = node;
        node = block::next_link(bytes, node);
        length += 1;
      }

      if node == sentinel && block::prev_link(bytes, sentinel) != prev {
        report.push(Violation::BrokenLink {
          class,
          offset: sentinel,
        });
      }
    }

    // Physical chain.
    let mut walked = BTreeSet::new();
    let mut walked_free = 0;
    let mut prev_free: Option<usize> = None;
    let mut bp = prologue;

    loop {
      if bp > bytes.len() || report.blocks > max_blocks {
        report.push(Violation::OutOfBounds { offset: bp });
        break;
      }

      let tag = block::header_at(bytes, bp);
      if tag.size == 0 {
        if !tag.allocated || bp != bytes.len() {
          report.push(Violation::BadEpilogue { offset: bp, tag });
        }
        if verbose {
          let _ = writeln!(report.text, "{bp:#x}: end of heap");
        }
        break;
      }

      if bp.checked_add(tag.size).is_none_or(|end| end - WSIZE > bytes.len()) {
        report.push(Violation::OutOfBounds { offset: bp });
        break;
      }

      let footer = block::footer_at(bytes, bp);
      if verbose {
        let _ = writeln!(
          report.text,
          "{bp:#x}: header: [{}] footer: [{}]",
          fmt_tag(tag),
          fmt_tag(footer)
        );
      }

      report.blocks += 1;
      walked.insert(bp);

      if (base + bp) % DSIZE != 0 {
        report.push(Violation::Misaligned { offset: bp });
      }
      if tag != footer {
        report.push(Violation::TagMismatch {
          offset: bp,
          header: tag,
          footer,
        });
      }

      if bp != prologue {
        if tag.allocated {
          if let Some(&class) = listed.get(&bp) {
            report.push(Violation::AllocatedBlockListed { offset: bp, class });
          }
        } else {
          walked_free += 1;
          let expected = classify(tag.size);
          match listed.get(&bp) {
            None => report.push(Violation::FreeBlockNotListed {
              offset: bp,
              size: tag.size,
              class: expected,
            }),
            Some(&found) if found != expected => report.push(Violation::WrongClass {
              offset: bp,
              expected,
              found,
            }),
            Some(_) => {}
          }
          if let Some(first) = prev_free {
            report.push(Violation::Uncoalesced { first, second: bp });
          }
        }
      }

      prev_free = if tag.allocated { None } else { Some(bp) };
      bp += tag.size;
    }

    for (&node, &class) in &listed {
      if !walked.contains(&node) {
        report.push(Violation::ListedNotABlock { class, offset: node });
      }
    }

    if listed.len() != walked_free {
      report.push(Violation::CountMismatch {
        listed: listed.len(),
        walked: walked_free,
      });
    }

    report.free_blocks = walked_free;
    if verbose && report.is_consistent() {
      let _ = writeln!(
        report.text,
        "{} blocks, {} free: heap is consistent",
        report.blocks, report.free_blocks
      );
    }

    finish(report)
  }
}

fn finish(mut report: Report) -> Report {
  for violation in report.violations.clone() {
    warn!(%violation, "heap consistency violation");
    let _ = writeln!(report.text, "Error: {violation}");
  }
  report
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    allocator::Address,
    block::{MIN_BLOCK_SIZE, put, write_tags},
    heap::MemLib,
    seglist::SegList,
  };

  fn allocator() -> Allocator<MemLib> {
    let mut allocator = Allocator::new(MemLib::new(1 << 20).unwrap());
    allocator.init().unwrap();
    allocator
  }

  fn seglist(allocator: &Allocator<MemLib>) -> SegList {
    allocator.bootstrap.unwrap().seglist
  }

  #[test]
  fn test_fresh_heap_is_consistent() {
    let allocator = allocator();
    let report = allocator.check_consistency(false);

    assert!(report.is_consistent(), "{report}");
    assert_eq!(report.blocks, 2); // prologue and the first chunk
    assert_eq!(report.free_blocks, 1);
    assert!(report.text().is_empty());
  }

  #[test]
  fn test_uninitialized() {
    let allocator = Allocator::new(MemLib::new(4096).unwrap());
    let report = allocator.check_consistency(false);
    assert_eq!(report.violations, vec![Violation::NotInitialized]);
  }

  #[test]
  fn test_verbose_dump() {
    let mut allocator = allocator();
    let _p = allocator.allocate(40).unwrap();

    let report = allocator.check_consistency(true);
    let text = report.text();

    assert!(text.starts_with("Heap ("));
    assert!(text.contains(&format!("header: [{}:a]", DSIZE)));
    assert!(text.contains("end of heap"));
    assert!(text.contains("list 7"));
    assert!(text.contains("heap is consistent"));
  }

  #[test]
  fn test_detects_tag_mismatch() {
    let mut allocator = allocator();
    let p = allocator.allocate(16).unwrap();

    let bytes = allocator.heap.bytes_mut();
    let footer = block::footer_offset(bytes, p.offset());
    put(bytes, footer, Tag::new(MIN_BLOCK_SIZE, false).pack());

    let report = allocator.check_consistency(false);
    assert!(report.violations.contains(&Violation::TagMismatch {
      offset: p.offset(),
      header: Tag::new(MIN_BLOCK_SIZE, true),
      footer: Tag::new(MIN_BLOCK_SIZE, false),
    }));
    assert!(report.text().contains("does not match footer"));
  }

  #[test]
  fn test_detects_unlisted_free_block() {
    let mut allocator = allocator();
    let _a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(16).unwrap();
    let _c = allocator.allocate(16).unwrap();
    allocator.free(Some(b));

    SegList::remove(allocator.heap.bytes_mut(), b.offset());

    let report = allocator.check_consistency(false);
    assert!(report.violations.contains(&Violation::FreeBlockNotListed {
      offset: b.offset(),
      size: MIN_BLOCK_SIZE,
      class: 0,
    }));
    assert!(report.violations.contains(&Violation::CountMismatch {
      listed: 1,
      walked: 2
    }));
  }

  #[test]
  fn test_detects_listed_allocated_block() {
    let mut allocator = allocator();
    let a = allocator.allocate(16).unwrap();
    let _b = allocator.allocate(16).unwrap();
    allocator.free(Some(a));

    write_tags(allocator.heap.bytes_mut(), a.offset(), Tag::new(MIN_BLOCK_SIZE, true));

    let report = allocator.check_consistency(false);
    assert!(report.violations.contains(&Violation::AllocatedBlockListed {
      offset: a.offset(),
      class: 0,
    }));
  }

  #[test]
  fn test_detects_uncoalesced_neighbours() {
    let mut allocator = allocator();
    let a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(16).unwrap();
    let _c = allocator.allocate(16).unwrap();
    allocator.free(Some(a));

    // Mark b free behind the allocator's back, skipping coalescing.
    let list = seglist(&allocator);
    let bytes = allocator.heap.bytes_mut();
    write_tags(bytes, b.offset(), Tag::new(MIN_BLOCK_SIZE, false));
    list.insert(bytes, b.offset(), MIN_BLOCK_SIZE);

    let report = allocator.check_consistency(false);
    assert_eq!(
      report.violations,
      vec![Violation::Uncoalesced {
        first: a.offset(),
        second: b.offset(),
      }]
    );
  }

  #[test]
  fn test_detects_wrong_class() {
    let mut allocator = allocator();
    let a = allocator.allocate(16).unwrap();
    let _b = allocator.allocate(16).unwrap();
    allocator.free(Some(a));

    let list = seglist(&allocator);
    let bytes = allocator.heap.bytes_mut();
    SegList::remove(bytes, a.offset());
    list.insert(bytes, a.offset(), 5000);

    let report = allocator.check_consistency(false);
    assert_eq!(
      report.violations,
      vec![Violation::WrongClass {
        offset: a.offset(),
        expected: 0,
        found: 8,
      }]
    );
  }

  #[test]
  fn test_detects_bad_epilogue() {
    let mut allocator = allocator();
    let end = allocator.heap.size();
    put(allocator.heap.bytes_mut(), end - WSIZE, Tag::new(0, false).pack());

    let report = allocator.check_consistency(false);
    assert_eq!(
      report.violations,
      vec![Violation::BadEpilogue {
        offset: end,
        tag: Tag::new(0, false),
      }]
    );
  }

  #[test]
  fn test_detects_broken_back_link() {
    let mut allocator = allocator();
    let a = allocator.allocate(16).unwrap();
    let _b = allocator.allocate(16).unwrap();
    allocator.free(Some(a));

    block::set_prev_link(allocator.heap.bytes_mut(), a.offset(), a.offset());

    let report = allocator.check_consistency(false);
    assert!(report.violations.contains(&Violation::BrokenLink {
      class: 0,
      offset: a.offset(),
    }));
  }

  #[test]
  fn test_detects_listed_garbage() {
    let mut allocator = allocator();
    let a = allocator.allocate(64).unwrap();

    // An offset in the middle of an allocated payload.
    let bogus = Address(a.offset() + DSIZE);
    let list = seglist(&allocator);
    list.insert(allocator.heap.bytes_mut(), bogus.offset(), 48);

    let report = allocator.check_consistency(false);
    assert!(report.violations.contains(&Violation::ListedNotABlock {
      class: 1,
      offset: bogus.offset(),
    }));
  }

  #[test]
  fn test_consistent_after_churn() {
    let mut allocator = allocator();
    let mut live = Vec::new();

    for i in 1..200 {
      live.push(allocator.allocate(i * 7 % 900 + 1).unwrap());
      if i % 3 == 0 {
        let victim = live.remove(live.len() / 2);
        allocator.free(Some(victim));
      }
    }
    for p in live.drain(..).step_by(2) {
      allocator.free(Some(p));
    }

    let report = allocator.check_consistency(false);
    assert!(report.is_consistent(), "{report}");
  }
}
