use std::io::Read;

use libc::sbrk;
use segalloc::{Allocator, Config, SbrkHeap};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how the program break moves as the heap grows.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("segalloc=debug")),
    )
    .compact()
    .init();

  print_program_break("start");

  let heap = match SbrkHeap::new() {
    Ok(heap) => heap,
    Err(err) => {
      eprintln!("cannot anchor the heap at the program break: {err}");
      return;
    }
  };
  let mut allocator = match Allocator::with_config(heap, Config::from_env()) {
    Ok(allocator) => allocator,
    Err(err) => {
      eprintln!("bad allocator configuration: {err}");
      return;
    }
  };

  if let Err(err) = allocator.init() {
    eprintln!("init failed: {err}");
    return;
  }
  print_program_break("after init");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 4 bytes. Small requests round up to a power of two, and
  //    every block is at least four words.
  // --------------------------------------------------------------------
  let Some(first) = allocator.allocate(4) else {
    eprintln!("out of memory");
    return;
  };
  allocator.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  println!(
    "\n[1] Allocate 4 bytes at {:?} (usable {} bytes)",
    allocator.as_ptr(first),
    allocator.usable_size(first)
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 100 and 200 bytes; both come out of the first chunk.
  // --------------------------------------------------------------------
  let second = allocator.allocate(100);
  let third = allocator.allocate(200);
  println!("\n[2] Allocate 100 and 200 bytes: {:?} {:?}", second, third);
  print!("{}", allocator.check_consistency(true));
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the 100-byte block and ask for 50: first fit hands the freed
  //    block back, split, without touching the program break.
  // --------------------------------------------------------------------
  allocator.free(second);
  let fourth = allocator.allocate(50);
  println!(
    "\n[3] Freed {:?}, allocated 50 bytes at {:?}: {}",
    second,
    fourth,
    if fourth == second { "reused the freed block" } else { "allocated somewhere else" }
  );
  print_program_break("after reuse");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate 64 KiB to force the heap to grow.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let big = allocator.allocate(64 * 1024);
  println!("\n[4] Allocate 64 KiB at {:?}", big);
  print_program_break("after large alloc");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow the first block; its contents move along with it.
  // --------------------------------------------------------------------
  if let Some(moved) = allocator.resize(Some(first), 1000) {
    let mut word = [0u8; 4];
    word.copy_from_slice(&allocator.payload(moved)[..4]);
    println!(
      "\n[5] Resized first block to 1000 bytes: {:?} -> {:?}, value = 0x{:X}",
      first,
      moved,
      u32::from_ne_bytes(word)
    );
  }

  // --------------------------------------------------------------------
  // 6) Free everything. The heap keeps its size: memory is reused, never
  //    returned, and the OS reclaims it when the process exits.
  // --------------------------------------------------------------------
  allocator.free(third);
  allocator.free(fourth);
  allocator.free(big);

  let report = allocator.check_consistency(false);
  println!(
    "\n[6] Stats: {:?}\n    consistent: {}",
    allocator.stats(),
    report.is_consistent()
  );
  print_program_break("end");
}
