//! Heap regions: the contiguous, grow-only byte range the allocator manages.
//!
//! The allocator never hands memory back; it only asks its region to grow.
//! Two regions ship with the crate:
//!
//! - [`MemLib`], a fixed-capacity region carved out of a single up-front
//!   allocation. Growing past the capacity fails, which makes it the natural
//!   backend for tests and for modelling a constrained environment.
//! - [`SbrkHeap`], the process data segment, grown with `sbrk(2)`.

use std::{alloc, ptr::NonNull, slice};

use crate::{align_to, error::Error};

/// Default [`MemLib`] capacity (20 MiB).
pub const MAX_HEAP: usize = 20 * (1 << 20);

const REGION_ALIGN: usize = 4096;

/// A contiguous byte range that can only be extended at its end.
pub trait HeapRegion {
  /// Extends the region by `incr` bytes and returns the offset of the first
  /// new byte, which is the previous size of the region.
  fn grow_heap(
    &mut self,
    incr: usize,
  ) -> Result<usize, Error>;

  /// The whole region, from its first byte to the current end.
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  /// Address of the first byte of the region.
  fn base(&self) -> *const u8;

  fn size(&self) -> usize {
    self.bytes().len()
  }
}

/// A simulated heap with a hard capacity, zero-initialized.
pub struct MemLib {
  start: NonNull<u8>,
  layout: alloc::Layout,
  brk: usize,
}

impl MemLib {
  /// Reserves `capacity` bytes up front. The region starts empty.
  pub fn new(capacity: usize) -> Result<Self, Error> {
    if capacity == 0 {
      return Err(Error::InvalidConfig("heap capacity is zero"));
    }

    let layout = alloc::Layout::from_size_align(capacity, REGION_ALIGN)
      .map_err(|_| Error::InvalidConfig("heap capacity overflows"))?;

    let start = unsafe { alloc::alloc_zeroed(layout) };
    let start = NonNull::new(start).ok_or(Error::OutOfMemory { requested: capacity })?;

    Ok(Self {
      start,
      layout,
      brk: 0,
    })
  }

  /// A region of [`MAX_HEAP`] bytes.
  pub fn with_default_capacity() -> Result<Self, Error> {
    Self::new(MAX_HEAP)
  }

  pub fn capacity(&self) -> usize {
    self.layout.size()
  }
}

impl HeapRegion for MemLib {
  fn grow_heap(
    &mut self,
    incr: usize,
  ) -> Result<usize, Error> {
    let old_brk = self.brk;
    let new_brk = old_brk
      .checked_add(incr)
      .filter(|&brk| brk <= self.capacity())
      .ok_or(Error::OutOfMemory { requested: incr })?;

    self.brk = new_brk;
    Ok(old_brk)
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `brk` never exceeds the zeroed allocation owned by `self`.
    unsafe { slice::from_raw_parts(self.start.as_ptr(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as above, and `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.start.as_ptr(), self.brk) }
  }

  fn base(&self) -> *const u8 {
    self.start.as_ptr()
  }
}

impl Drop for MemLib {
  fn drop(&mut self) {
    unsafe {
      alloc::dealloc(self.start.as_ptr(), self.layout);
    }
  }
}

/// The program break, extended through `sbrk(2)`.
///
/// Nothing else in the process may move the break while this region is in
/// use; if it does, the next extension fails with [`Error::Discontiguous`].
#[cfg(unix)]
pub struct SbrkHeap {
  base: NonNull<u8>,
  len: usize,
}

#[cfg(unix)]
impl SbrkHeap {
  /// Anchors the region at the current program break, padded up to the
  /// double-word alignment.
  pub fn new() -> Result<Self, Error> {
    let dword = 2 * std::mem::size_of::<usize>();

    unsafe {
      let current = libc::sbrk(0) as usize;
      if current == usize::MAX {
        return Err(Error::OutOfMemory { requested: 0 });
      }

      let pad = align_to!(current, dword) - current;
      if pad > 0 && libc::sbrk(pad as libc::intptr_t) as usize == usize::MAX {
        return Err(Error::OutOfMemory { requested: pad });
      }

      let base = NonNull::new((current + pad) as *mut u8).ok_or(Error::Discontiguous)?;
      Ok(Self { base, len: 0 })
    }
  }
}

#[cfg(unix)]
impl HeapRegion for SbrkHeap {
  fn grow_heap(
    &mut self,
    incr: usize,
  ) -> Result<usize, Error> {
    let increment =
      libc::intptr_t::try_from(incr).map_err(|_| Error::OutOfMemory { requested: incr })?;

    unsafe {
      let address = libc::sbrk(increment) as usize;

      if address == usize::MAX {
        return Err(Error::OutOfMemory { requested: incr });
      }

      if address != self.base.as_ptr() as usize + self.len {
        return Err(Error::Discontiguous);
      }

      std::ptr::write_bytes(address as *mut u8, 0, incr);
    }

    let old_len = self.len;
    self.len += incr;
    Ok(old_len)
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: [base, base + len) was handed to us by sbrk and zeroed.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as above, and `&mut self` guarantees exclusive access.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
  }

  fn base(&self) -> *const u8 {
    self.base.as_ptr()
  }
}
