/// Rounds `value` up to the allocator's alignment unit, the double word.
///
/// A double word is two machine words, so blocks end up 16-byte aligned on
/// 64-bit targets and 8-byte aligned on 32-bit targets.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use segalloc::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(17), 32), // 64 bit machine.
///     4 => assert_eq!(align!(9), 16),  // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + 2 * ::std::mem::size_of::<usize>() - 1) & !(2 * ::std::mem::size_of::<usize>() - 1)
  };
}

/// Rounds `value` up to the next multiple of `to`, which must be a power of two.
#[macro_export]
macro_rules! align_to {
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}
