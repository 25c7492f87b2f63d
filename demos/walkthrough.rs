use std::{io::Read, ptr::NonNull};

use mapalloc::{AllocError, Heap, Mmap};

/// Waits until the user presses ENTER, unless `--no-wait` was passed.
/// Useful when you want to inspect the mappings with `pmap`, `/proc/<pid>/maps`
/// or `gdb` while the heap grows.
fn block_until_enter_pressed() {
  if std::env::args().any(|arg| arg == "--no-wait") {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints every block the heap has mapped so far.
fn print_blocks(
  label: &str,
  heap: &Heap<Mmap>,
) {
  println!("[{}] PID = {}, blocks = {}", label, std::process::id(), heap.block_count());
  for (index, block) in heap.blocks().enumerate() {
    println!(
      "    block {index}: base = {:#x}, {} bytes, {}/{} chunks used",
      block.base, block.len, block.used_chunks, block.total_chunks
    );
  }
}

fn print_alloc(
  size: usize,
  address: NonNull<u8>,
) {
  println!("Allocated {} bytes, address = {:p}", size, address);
}

fn main() -> Result<(), AllocError> {
  env_logger::init();

  let mut heap = Heap::new(Mmap);

  print_blocks("start", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate space for a u32. The empty heap maps its first block.
  // --------------------------------------------------------------------
  let first = heap.alloc(4)?;
  println!("\n[1] Allocate u32");
  print_alloc(4, first);

  let first_ptr = first.cast::<u32>();
  unsafe { first_ptr.write(0xDEADBEEF) };
  println!("[1] Value written to first = 0x{:X}", unsafe { first_ptr.read() });
  print_blocks("1", &heap);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 40 bytes. This takes three 16-byte chunks.
  // --------------------------------------------------------------------
  let second = heap.alloc(40)?;
  println!("\n[2] Allocate [u8; 40]");
  print_alloc(40, second);
  unsafe { second.as_ptr().write_bytes(0xAB, 40) };
  println!("[2] usable size = {} bytes", heap.usable_size(second.as_ptr())?);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Ask for a 256-byte aligned region.
  // --------------------------------------------------------------------
  let third = heap.aligned_alloc(256, 64)?;
  println!("\n[3] Aligned allocation (256)");
  print_alloc(64, third);
  println!(
    "[3] Address = {:#X}, addr % align = {}",
    third.as_ptr() as usize,
    third.as_ptr() as usize % 256
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Free the first allocation and ask for 2 bytes: first fit hands the
  //    same chunk back.
  // --------------------------------------------------------------------
  unsafe { heap.free(first.as_ptr())? };
  println!("\n[4] Freed first at {:p}", first);

  let fourth = heap.alloc(2)?;
  print_alloc(2, fourth);
  println!(
    "[4] fourth == first? {}",
    if fourth == first {
      "Yes, it reused the freed chunk"
    } else {
      "No, it allocated somewhere else"
    }
  );

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow the 40-byte allocation past what follows it, forcing a move.
  // --------------------------------------------------------------------
  let moved = unsafe { heap.realloc(second.as_ptr(), 1000)? };
  println!("\n[5] realloc 40 -> 1000 bytes: {:p} -> {:p}", second, moved);
  println!("[5] first byte still 0x{:X}", unsafe { moved.as_ptr().read() });

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Allocate 64 KiB, more than the first block holds: a new block is
  //    mapped for it.
  // --------------------------------------------------------------------
  print_blocks("before large alloc", &heap);

  let big = heap.alloc(64 * 1024)?;
  println!("\n[6] Allocate large 64 KiB block");
  print_alloc(64 * 1024, big);

  print_blocks("after large alloc", &heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) calloc with an overflowing element count is refused.
  // --------------------------------------------------------------------
  match heap.calloc(usize::MAX / 2 + 1, 4) {
    Ok(address) => println!("\n[7] calloc unexpectedly returned {:p}", address),
    Err(err) => println!("\n[7] calloc refused: {err}"),
  }

  // --------------------------------------------------------------------
  // 8) End of demo. Dropping the heap unmaps every block.
  // --------------------------------------------------------------------
  println!("\n[8] End of example. Dropping the heap unmaps all of its blocks.");

  Ok(())
}
