//! # segalloc - A Segregated Free List Allocator
//!
//! This crate provides a general-purpose dynamic memory allocator over a
//! single contiguous heap that can only grow, the way a program break grown
//! with `sbrk` does. Memory is never handed back to the operating system;
//! freed blocks are merged with their neighbours and reused.
//!
//! ## Overview
//!
//! ```text
//!   Heap Region:
//!
//!   ┌───────────┬─────┬──────────┬────────┬────────┬────────┬─────┬──────────┐
//!   │ size-class│ pad │ prologue │ block  │ block  │ block  │ ... │ epilogue │
//!   │   table   │     │  [16:a]  │ [48:a] │ [96:f] │ [32:a] │     │  [0:a]   │
//!   └───────────┴─────┴──────────┴────────┴────────┴────────┴─────┴──────────┘
//!         │                                   ▲                             ▲
//!         │         segregated free lists     │                             │
//!         └───────────────────────────────────┘                        heap end
//!                                                                (grows on demand)
//! ```
//!
//! Every block carries a header and a footer (boundary tags) holding its
//! size and an allocated bit, so both physical neighbours of a block are
//! reachable in constant time. Free blocks are additionally threaded onto
//! one of ten circular doubly-linked lists, one per size class:
//!
//! ```text
//!   class   0     1     2     3     4      5      6      7      8      9
//!   size  ≤32   ≤64  ≤128  ≤256  ≤512  ≤1024  ≤2048  ≤4096  ≤8192     ∞
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tags and block navigation
//!   ├── heap       - Grow-only heap regions (MemLib, SbrkHeap)
//!   ├── seglist    - Size classes and free lists
//!   ├── allocator  - allocate / free / resize
//!   ├── checker    - Heap consistency checker
//!   ├── config     - Tuning knobs
//!   └── error      - Error type
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, MemLib};
//!
//! let heap = MemLib::new(1 << 20).unwrap();
//! let mut allocator = Allocator::new(heap);
//! allocator.init().unwrap();
//!
//! let p = allocator.allocate(100).unwrap();
//! allocator.payload_mut(p)[..5].copy_from_slice(b"hello");
//!
//! let p = allocator.resize(Some(p), 4000).unwrap();
//! assert_eq!(&allocator.payload(p)[..5], b"hello");
//!
//! allocator.free(Some(p));
//! assert!(allocator.check_consistency(false).is_consistent());
//! ```
//!
//! ## How It Works
//!
//! An allocation request is rounded up to a block size, then the size
//! classes are scanned upward from the request's own class, first fit
//! within each list:
//!
//! ```text
//!   allocate(n)
//!       │
//!       ├─ n ≤ 16 double words?  round n up to a power of two
//!       ├─ asize = align(n + header + footer)
//!       ├─ find_fit(asize) ── found ──► place: split if the rest ≥ min block
//!       └─ not found ──► extend heap by max(asize, 4096) ──► place
//! ```
//!
//! Freeing clears the allocated bit and coalesces with whichever physical
//! neighbours are free:
//!
//! ```text
//!   prev   this   next          result
//!   [a]    [f]    [a]     →     [a][    f    ][a]
//!   [a]    [f]    [f]     →     [a][      f       ]
//!   [f]    [f]    [a]     →     [      f      ][a]
//!   [f]    [f]    [f]     →     [        f        ]
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **No shrinking**: The heap never returns memory to the system
//! - **Fixed alignment**: Payloads are double-word aligned, nothing stricter
//! - **No misuse detection**: Double frees corrupt the heap silently

pub mod align;
mod allocator;
pub mod block;
mod checker;
mod config;
mod error;
pub mod heap;
pub mod seglist;

pub use allocator::{Address, Allocator, Stats};
pub use checker::{Report, Violation};
pub use config::{CHUNKSIZE, Config};
pub use error::Error;
#[cfg(unix)]
pub use heap::SbrkHeap;
pub use heap::{HeapRegion, MemLib};
