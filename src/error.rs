use std::fmt;

/// Reasons an allocator operation can fail.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
  /// The heap region refused to grow by `requested` bytes.
  OutOfMemory { requested: usize },
  /// The heap end moved underneath the allocator, so a new extension
  /// would not be contiguous with the managed region.
  Discontiguous,
  AlreadyInitialized,
  InvalidConfig(&'static str),
}

impl fmt::Display for Error {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Error::OutOfMemory { requested } => {
        write!(f, "out of memory: heap cannot grow by {requested} bytes")
      }
      Error::Discontiguous => f.write_str("heap extension is not contiguous with the heap"),
      Error::AlreadyInitialized => f.write_str("allocator is already initialized"),
      Error::InvalidConfig(reason) => write!(f, "invalid configuration: {reason}"),
    }
  }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display() {
    assert_eq!(
      Error::OutOfMemory { requested: 4096 }.to_string(),
      "out of memory: heap cannot grow by 4096 bytes"
    );
    assert_eq!(
      Error::InvalidConfig("chunk size is zero").to_string(),
      "invalid configuration: chunk size is zero"
    );
  }
}
