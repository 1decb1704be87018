//! Explicit-root mark-and-sweep collector over a free-list heap.
//!
//! A [`Heap`] reserves one fixed region, hands out blocks from it through a
//! first-fit (or best-fit) free list, and reclaims objects that are not
//! reachable from the roots the caller pushed before [`Heap::collect`].
//! Objects are traced precisely: each one carries a [`TypeLayout`] naming
//! the offsets of its pointer fields.
//!
//! ```no_run
//! use heap::{Heap, HeapSettings, TypeLayout};
//!
//! let mut heap = Heap::new(HeapSettings::with_size(1 << 20))?;
//! let pair = TypeLayout::new(24, &[8])?.shared();
//!
//! let a = heap.new_object(&pair)?;
//! let b = heap.new_object(&pair)?;
//! heap.write_pointer(b, 8, Some(a))?;
//!
//! heap.insert_root(b)?;
//! heap.collect()?;
//! assert!(heap.is_allocated(a));
//! # Ok::<(), heap::HeapError>(())
//! ```

mod allocator;
mod block;
mod collector;
mod error;
pub mod global;
mod heap;
mod layout;
mod object;
mod region;
mod roots;
mod settings;
mod system;

pub use allocator::BlockAllocator;
pub use block::{
    BlockFlags, BlockHeader, BlockId, BlockIter, BlockList, HEADER_SIZE,
    WORD_SIZE,
};
pub use collector::{CollectionStats, GcStats};
pub use error::{HeapError, Result, fatal};
pub use heap::Heap;
pub use layout::TypeLayout;
pub use object::ObjectPtr;
pub use region::Region;
pub use roots::RootSet;
pub use settings::{DEFAULT_HEAP_SIZE, FitPolicy, HeapSettings};
pub use system::{OS_PAGE_SIZE, map_memory, unmap_memory};
