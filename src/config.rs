//! Allocator tuning knobs.

use std::env;

use crate::{block::{DSIZE, MIN_BLOCK_SIZE}, error::Error, seglist::SEGSIZE};

/// Extend the heap by this amount (bytes) when no free block fits.
pub const CHUNKSIZE: usize = 1 << 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
  /// Minimum number of bytes requested from the heap region per extension.
  pub chunk_size: usize,
  /// Factor applied to the requested size when `resize` has to move a block.
  pub resize_multiplier: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      chunk_size: CHUNKSIZE,
      resize_multiplier: 1,
    }
  }
}

impl Config {
  /// Reproduces the historical resize behaviour, which over-allocates
  /// moved blocks by the number of size classes.
  pub fn legacy() -> Self {
    Self {
      resize_multiplier: SEGSIZE,
      ..Self::default()
    }
  }

  /// Reads `SEGALLOC_CHUNK_SIZE` and `SEGALLOC_RESIZE_MULTIPLIER`, falling
  /// back to the defaults for unset or unparsable values.
  pub fn from_env() -> Self {
    let mut config = Self::default();

    if let Some(chunk_size) = read_var("SEGALLOC_CHUNK_SIZE") {
      config.chunk_size = chunk_size;
    }

    if let Some(multiplier) = read_var("SEGALLOC_RESIZE_MULTIPLIER") {
      config.resize_multiplier = multiplier;
    }

    config
  }

  pub fn validate(&self) -> Result<(), Error> {
    if self.chunk_size < MIN_BLOCK_SIZE {
      return Err(Error::InvalidConfig("chunk size is below the minimum block size"));
    }
    if self.chunk_size % DSIZE != 0 {
      return Err(Error::InvalidConfig("chunk size is not a multiple of the double word"));
    }
    if self.resize_multiplier == 0 {
      return Err(Error::InvalidConfig("resize multiplier is zero"));
    }
    Ok(())
  }
}

fn read_var(name: &str) -> Option<usize> {
  let value = env::var(name).ok()?;
  match value.trim().parse() {
    Ok(parsed) => Some(parsed),
    Err(_) => {
      tracing::warn!(name, value = %value, "ignoring unparsable configuration variable");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_is_valid() {
    let config = Config::default();
    assert_eq!(config.chunk_size, 4096);
    assert_eq!(config.resize_multiplier, 1);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_legacy_multiplier() {
    assert_eq!(Config::legacy().resize_multiplier, 10);
  }

  #[test]
  fn test_validate_rejects() {
    let small = Config {
      chunk_size: DSIZE,
      ..Config::default()
    };
    assert!(matches!(small.validate(), Err(Error::InvalidConfig(_))));

    let unaligned = Config {
      chunk_size: 4096 + 1,
      ..Config::default()
    };
    assert!(matches!(unaligned.validate(), Err(Error::InvalidConfig(_))));

    let zero = Config {
      resize_multiplier: 0,
      ..Config::default()
    };
    assert!(matches!(zero.validate(), Err(Error::InvalidConfig(_))));
  }

  #[test]
  fn test_from_env_skips_unparsable_values() {
    // Nothing else in this crate reads these variables.
    unsafe {
      env::set_var("SEGALLOC_CHUNK_SIZE", "bogus");
      env::set_var("SEGALLOC_RESIZE_MULTIPLIER", " 3 ");
    }
    let config = Config::from_env();
    unsafe {
      env::remove_var("SEGALLOC_CHUNK_SIZE");
      env::remove_var("SEGALLOC_RESIZE_MULTIPLIER");
    }

    assert_eq!(
      config,
      Config {
        chunk_size: CHUNKSIZE,
        resize_multiplier: 3,
      }
    );
    assert!(config.validate().is_ok());
  }
}
