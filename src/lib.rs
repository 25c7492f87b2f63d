//! # mapalloc - A Page-Mapping Memory Allocator
//!
//! This crate provides a freestanding heap that gets all of its memory
//! straight from the kernel with `mmap(2)` and carves it into fixed-size
//! chunks. No other allocator is involved, not even for its own bookkeeping.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │ Block table (one mapping, max_blocks entries)                        │
//!   │   [ block 0 ][ block 1 ][ block 2 ][ ...                           ] │
//!   └───────┬────────────┬────────────┬────────────────────────────────────┘
//!           │            │            │
//!           ▼            ▼            ▼
//!   ┌───────────────┐ ┌──────────┐ ┌──────────────────────────────┐
//!   │ data mapping  │ │   ...    │ │ data mapping (large request) │
//!   │ c0 c1 c2 ...  │ │          │ │ c0 c1 c2 c3 c4 ...           │
//!   ├───────────────┤ └──────────┘ ├──────────────────────────────┤
//!   │ chunk table   │              │ chunk table                  │
//!   │ one ChunkMeta │              │ one ChunkMeta per chunk, set │
//!   │ per chunk     │              │ only where an allocation     │
//!   │               │              │ starts                       │
//!   └───────────────┘              └──────────────────────────────┘
//! ```
//!
//! A request is rounded up to whole chunks, then the blocks are scanned in
//! the order they were mapped for the first run of free chunks that is long
//! enough (first fit). When nothing fits, a new block sized to the request
//! (rounded up to the page size) is mapped and the request is served from it.
//!
//! ## Crate Structure
//!
//! ```text
//!   mapalloc
//!   ├── align      - align_to! and size normalization
//!   ├── block      - MemoryBlock and per-chunk metadata
//!   ├── config     - HeapConfig (granularities, block limit)
//!   ├── error      - AllocError, SysError
//!   ├── ffi        - extern "C" malloc-style entry points
//!   ├── heap       - Heap: alloc, aligned_alloc, calloc, realloc, free
//!   ├── locate     - first-fit search
//!   ├── locked     - LockedHeap (spin lock + GlobalAlloc)
//!   ├── mapped     - fixed-capacity arrays stored in their own mapping
//!   ├── store      - BlockStore and block growth
//!   └── sys        - PageSource, raw mmap/munmap syscalls
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mapalloc::{Heap, Mmap};
//!
//! fn main() -> Result<(), mapalloc::AllocError> {
//!     let mut heap = Heap::new(Mmap);
//!
//!     // Allocate memory for a u64
//!     let ptr = heap.alloc(8)?.cast::<u64>();
//!
//!     unsafe {
//!         // Use the memory
//!         ptr.write(42);
//!         println!("Value: {}", ptr.read());
//!
//!         // Free the memory, the chunks are reused by the next request
//!         heap.free(ptr.as_ptr().cast())?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! Each allocation claims a run of chunks. The first chunk of the run is the
//! head and remembers how long the run is:
//!
//! ```text
//!   Block with chunk_size = 16:
//!
//!   offset  0    16   32   48   64   80   96   112
//!           ┌────┬────┬────┬────┬────┬────┬────┬────┐
//!           │ H  │ u  │ u  │    │ H  │    │    │    │
//!           └────┴────┴────┴────┴────┴────┴────┴────┘
//!             ▲                   ▲
//!             │                   └── alloc(10): span 1
//!             └── alloc(40): span 3
//!
//!   free(offset 0)  → chunks 0..3 become free again, pages stay mapped
//!   alloc(48)       → first fit: offset 0 (chunks 0..3)
//! ```
//!
//! `realloc` keeps the pointer when the run already covers the new size or
//! when enough free chunks directly follow it; otherwise it moves the data to
//! a fresh run. Pointers handed to `free`/`realloc` are checked against the
//! block extents and the head flags, so foreign, interior and already freed
//! pointers are rejected with an error instead of corrupting the metadata.
//!
//! ## Limitations
//!
//! - **Keeps pages resident**: freed chunks are recycled, blocks are only
//!   unmapped when the whole heap is dropped
//! - **First fit**: no best-fit search, no compaction
//! - **Unix-only**: requires `libc`; Linux issues the syscalls directly
//!
//! ## Safety
//!
//! [`Heap`] is single-threaded. Wrap it in a [`LockedHeap`] to share it, or to
//! install it with `#[global_allocator]`. When doing so, do not enable a
//! logger that allocates while emitting this crate's messages.

pub mod align;
pub mod block;
pub mod config;
pub mod error;
pub mod ffi;
pub mod heap;
pub mod locate;
pub mod locked;
pub mod mapped;
pub mod store;
pub mod sys;

#[cfg(test)]
mod testing;

pub use block::BlockInfo;
pub use config::HeapConfig;
pub use error::{AllocError, SysError};
pub use heap::Heap;
pub use locked::LockedHeap;
pub use sys::{Mmap, PageSource};
