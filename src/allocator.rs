use std::cmp;

use tracing::{debug, info, trace, warn};

use crate::{
  align,
  block::{self, Block, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  config::Config,
  error::Error,
  heap::HeapRegion,
  seglist::{self, SEGSIZE, SegList, TABLE_SIZE},
};

/// Requests up to this many bytes are rounded up to a power of two.
const SMALL_REQUEST: usize = 16 * DSIZE;

/// A payload handed out by the allocator, identified by its byte offset
/// from the start of the heap region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub(crate) usize);

impl Address {
  pub fn offset(self) -> usize {
    self.0
  }
}

/// Allocator statistics for monitoring and debugging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
  pub heap_size: usize,
  pub extensions: usize,
  pub allocations: usize,
  pub frees: usize,
  /// Sum of the sizes of all blocks on the free lists.
  pub free_bytes: usize,
}

/// Fixed offsets established by `init`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Bootstrap {
  pub seglist: SegList,
  /// Payload offset of the prologue block.
  pub prologue: usize,
}

/// Segregated-fit allocator with boundary-tag coalescing over a grow-only
/// heap region.
pub struct Allocator<H: HeapRegion> {
  pub(crate) heap: H,
  config: Config,
  pub(crate) bootstrap: Option<Bootstrap>,
  extensions: usize,
  allocations: usize,
  frees: usize,
}

impl<H: HeapRegion> Allocator<H> {
  /// Wraps `heap` with the default configuration. Call [`Allocator::init`]
  /// before anything else.
  pub fn new(heap: H) -> Self {
    Self {
      heap,
      config: Config::default(),
      bootstrap: None,
      extensions: 0,
      allocations: 0,
      frees: 0,
    }
  }

  pub fn with_config(
    heap: H,
    config: Config,
  ) -> Result<Self, Error> {
    config.validate()?;
    let mut allocator = Self::new(heap);
    allocator.config = config;
    Ok(allocator)
  }

  /// Lays out the size-class table, the prologue and epilogue, and the
  /// first free chunk.
  ///
  /// If only the first chunk cannot be obtained the error is returned but
  /// the allocator stays initialized; later allocations retry the growth.
  pub fn init(&mut self) -> Result<(), Error> {
    if self.bootstrap.is_some() {
      return Err(Error::AlreadyInitialized);
    }

    let table = self.heap.grow_heap(TABLE_SIZE)?;
    let seglist = SegList::init(self.heap.bytes_mut(), table);

    let start = self.heap.grow_heap(4 * WSIZE)?;
    let bytes = self.heap.bytes_mut();
    block::put(bytes, start, 0); // Alignment padding
    block::put(bytes, start + WSIZE, Tag::new(DSIZE, true).pack()); // Prologue header
    block::put(bytes, start + 2 * WSIZE, Tag::new(DSIZE, true).pack()); // Prologue footer
    block::put(bytes, start + 3 * WSIZE, Tag::new(0, true).pack()); // Epilogue header

    self.bootstrap = Some(Bootstrap {
      seglist,
      prologue: start + 2 * WSIZE,
    });

    self.extend(self.config.chunk_size / WSIZE)?;

    info!(
      heap_size = self.heap.size(),
      chunk_size = self.config.chunk_size,
      "allocator initialized"
    );
    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.bootstrap.is_some()
  }

  /// Allocates a block with at least `size` bytes of payload.
  ///
  /// Returns `None` for a zero-sized request, before `init`, or when the
  /// heap cannot grow any further.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Option<Address> {
    if size == 0 {
      return None;
    }

    if self.bootstrap.is_none() {
      warn!(size, "allocation before init");
      return None;
    }

    let size = if size <= SMALL_REQUEST {
      size.next_power_of_two()
    } else {
      size
    };
    let asize = adjusted_size(size)?;

    let bp = match self.find_fit(asize) {
      Some(bp) => bp,
      None => {
        let extend_size = cmp::max(asize, self.config.chunk_size);
        match self.extend(extend_size / WSIZE) {
          Ok(bp) => bp,
          Err(err) => {
            warn!(size, %err, "allocation failed");
            return None;
          }
        }
      }
    };

    self.place(bp, asize);
    self.allocations += 1;

    trace!(size, asize, offset = bp, "allocated block");
    Some(Address(bp))
  }

  /// Frees a block returned by `allocate` or `resize`. `None` is ignored.
  ///
  /// Freeing a block twice, or an address this allocator never returned,
  /// corrupts the heap.
  pub fn free(
    &mut self,
    addr: Option<Address>,
  ) {
    let Some(Address(bp)) = addr else {
      return;
    };

    if self.bootstrap.is_none() {
      warn!(offset = bp, "free before init");
      return;
    }

    let bytes = self.heap.bytes_mut();
    let size = block::header_at(bytes, bp).size;
    block::write_tags(bytes, bp, Tag::new(size, false));
    self.coalesce(bp);
    self.frees += 1;

    trace!(size, offset = bp, "freed block");
  }

  /// Resizes the block at `addr` to hold at least `size` bytes.
  ///
  /// A zero `size` frees the block and returns `None`; a `None` address
  /// allocates. The block stays where it is when it is already large
  /// enough; otherwise its contents move to a new block. When that new
  /// block cannot be obtained, `None` is returned and the original block
  /// is left untouched.
  pub fn resize(
    &mut self,
    addr: Option<Address>,
    size: usize,
  ) -> Option<Address> {
    if size == 0 {
      self.free(addr);
      return None;
    }

    let Some(Address(bp)) = addr else {
      return self.allocate(size);
    };

    if self.bootstrap.is_none() {
      warn!(offset = bp, size, "resize before init");
      return None;
    }

    let asize = adjusted_size(size)?;
    let block_size = block::header_at(self.heap.bytes(), bp).size;

    if asize <= block_size {
      trace!(offset = bp, size, block_size, "resized in place");
      return Some(Address(bp));
    }

    let copy = cmp::min(block_size - DSIZE, size);
    let request = size.checked_mul(self.config.resize_multiplier)?;
    let new_addr = self.allocate(request)?;

    self.heap.bytes_mut().copy_within(bp..bp + copy, new_addr.0);
    self.free(Some(Address(bp)));

    trace!(from = bp, to = new_addr.0, size, "moved block");
    Some(new_addr)
  }

  /// The usable bytes of an allocated block.
  pub fn payload(
    &self,
    addr: Address,
  ) -> &[u8] {
    let bytes = self.heap.bytes();
    let size = block::header_at(bytes, addr.0).size;
    &bytes[addr.0..addr.0 + size - DSIZE]
  }

  pub fn payload_mut(
    &mut self,
    addr: Address,
  ) -> &mut [u8] {
    let bytes = self.heap.bytes_mut();
    let size = block::header_at(bytes, addr.0).size;
    &mut bytes[addr.0..addr.0 + size - DSIZE]
  }

  /// Number of payload bytes the block at `addr` can hold.
  pub fn usable_size(
    &self,
    addr: Address,
  ) -> usize {
    block::header_at(self.heap.bytes(), addr.0).size - DSIZE
  }

  /// Raw address of the payload. Aligned to the double word.
  pub fn as_ptr(
    &self,
    addr: Address,
  ) -> *mut u8 {
    self.heap.base().wrapping_add(addr.0) as *mut u8
  }

  /// Decodes the block whose payload starts at `addr`.
  pub fn block(
    &self,
    addr: Address,
  ) -> Block {
    block::block_at(self.heap.bytes(), addr.0)
  }

  pub fn heap(&self) -> &H {
    &self.heap
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn stats(&self) -> Stats {
    let free_bytes = match self.bootstrap {
      Some(bootstrap) => {
        let bytes = self.heap.bytes();
        (0..SEGSIZE)
          .flat_map(|class| bootstrap.seglist.iter(bytes, class).take(self.max_blocks()))
          .map(|bp| block::header_at(bytes, bp).size)
          .sum()
      }
      None => 0,
    };

    Stats {
      heap_size: self.heap.size(),
      extensions: self.extensions,
      allocations: self.allocations,
      frees: self.frees,
      free_bytes,
    }
  }

  /// Upper bound on the number of blocks the heap can hold, used to bound
  /// walks over a possibly corrupt heap.
  pub(crate) fn max_blocks(&self) -> usize {
    self.heap.size() / DSIZE + 1
  }

  /// Extends the heap with a free block of `words` words (rounded up to an
  /// even count), coalesces it with a free tail block and files it.
  fn extend(
    &mut self,
    words: usize,
  ) -> Result<usize, Error> {
    let size = if words % 2 == 1 {
      (words + 1) * WSIZE
    } else {
      words * WSIZE
    };
    let bp = self.heap.grow_heap(size)?;

    let bytes = self.heap.bytes_mut();
    block::write_tags(bytes, bp, Tag::new(size, false)); // Free block header and footer
    let epilogue = block::header_offset(block::next_block_offset(bytes, bp));
    block::put(bytes, epilogue, Tag::new(0, true).pack()); // New epilogue header

    self.extensions += 1;
    debug!(size, heap_size = self.heap.size(), "extended heap");

    Ok(self.coalesce(bp))
  }

  /// Merges the free block at `bp` with its free neighbours and files the
  /// result in its size class. Returns the payload offset of the merged block.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let Some(bootstrap) = self.bootstrap else {
      return bp;
    };
    let bytes = self.heap.bytes_mut();

    let mut bp = bp;
    let mut size = block::header_at(bytes, bp).size;
    let prev_alloc = Tag::unpack(block::get(bytes, bp - DSIZE)).allocated;
    let next = block::next_block_offset(bytes, bp);
    let next_alloc = block::header_at(bytes, next).allocated;

    match (prev_alloc, next_alloc) {
      (true, true) => {}
      (true, false) => {
        size += block::header_at(bytes, next).size;
        SegList::remove(bytes, next);
        block::write_tags(bytes, bp, Tag::new(size, false));
      }
      (false, true) => {
        let prev = block::prev_block_offset(bytes, bp);
        size += block::header_at(bytes, prev).size;
        SegList::remove(bytes, prev);
        block::write_tags(bytes, prev, Tag::new(size, false));
        bp = prev;
      }
      (false, false) => {
        let prev = block::prev_block_offset(bytes, bp);
        size += block::header_at(bytes, prev).size + block::header_at(bytes, next).size;
        SegList::remove(bytes, prev);
        SegList::remove(bytes, next);
        block::write_tags(bytes, prev, Tag::new(size, false));
        bp = prev;
      }
    }

    bootstrap.seglist.insert(bytes, bp, size);
    bp
  }

  /// First fit, scanning the size classes upward from the one `asize`
  /// belongs to.
  fn find_fit(
    &self,
    asize: usize,
  ) -> Option<usize> {
    let bootstrap = self.bootstrap?;
    let bytes = self.heap.bytes();

    (seglist::classify(asize)..SEGSIZE).find_map(|class| {
      bootstrap
        .seglist
        .iter(bytes, class)
        .find(|&bp| block::header_at(bytes, bp).size >= asize)
    })
  }

  /// Allocates `asize` bytes at the start of the free block `bp`, splitting
  /// off the remainder when it can stand as a block of its own.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let Some(bootstrap) = self.bootstrap else {
      return;
    };
    let bytes = self.heap.bytes_mut();
    let csize = block::header_at(bytes, bp).size;

    SegList::remove(bytes, bp);

    if csize - asize >= MIN_BLOCK_SIZE {
      block::write_tags(bytes, bp, Tag::new(asize, true));
      let rest = bp + asize;
      block::write_tags(bytes, rest, Tag::new(csize - asize, false));
      bootstrap.seglist.insert(bytes, rest, csize - asize);
      debug!(offset = bp, asize, remainder = csize - asize, "split block");
    } else {
      block::write_tags(bytes, bp, Tag::new(csize, true));
    }
  }
}

/// Block size for a payload of `size` bytes: header and footer added,
/// rounded to the double word, never below the minimum block.
fn adjusted_size(size: usize) -> Option<usize> {
  if size <= DSIZE {
    return Some(MIN_BLOCK_SIZE);
  }
  size.checked_add(2 * DSIZE)?;
  Some(align!(size + DSIZE))
}
