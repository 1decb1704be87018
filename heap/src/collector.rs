//! Mark and sweep.
//!
//! Marking drains the root set, using it as the worklist, and sets the
//! mark on every block reachable through layout pointer fields. Sweeping
//! walks the allocated list once, frees every unmarked block and clears
//! the mark on every survivor.

use std::time::{Duration, Instant};

use crate::{Heap, HeapError, ObjectPtr, Result};

/// Figures for one collection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    /// Roots pushed before the collection started.
    pub roots: usize,
    /// Objects marked, each counted once.
    pub marked: usize,
    /// Non-null pointer fields pushed onto the worklist.
    pub edges: usize,
    pub freed: usize,
    pub freed_bytes: usize,
    pub survivors: usize,
    pub live_bytes: usize,
    pub pause: Duration,
}

/// Running totals across collections.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub collections: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
    pub total_pause: Duration,
    pub max_pause: Duration,
    pub last: CollectionStats,
}

impl GcStats {
    fn record(&mut self, cycle: CollectionStats) {
        self.collections += 1;
        self.objects_freed += cycle.freed;
        self.bytes_freed += cycle.freed_bytes;
        self.total_pause += cycle.pause;
        self.max_pause = self.max_pause.max(cycle.pause);
        self.last = cycle;
    }

    pub fn average_pause(&self) -> Duration {
        if self.collections == 0 {
            return Duration::ZERO;
        }
        self.total_pause.div_f64(self.collections as f64)
    }
}

impl Heap {
    /// Run one full collection: mark from the root set, then sweep.
    ///
    /// Afterwards the root set is empty and every object that was not
    /// reachable from it has been returned to the free list.
    pub fn collect(&mut self) -> Result<()> {
        self.check_poisoned()?;
        let start = Instant::now();
        let mut cycle = CollectionStats {
            roots: self.roots.len(),
            ..Default::default()
        };

        if let Err(err) = self.mark(&mut cycle) {
            return Err(self.poison(err));
        }
        self.sweep(&mut cycle);

        if !self.roots.is_empty() {
            let remaining = self.roots.len();
            return Err(self.poison(HeapError::RootsNotDrained { remaining }));
        }

        cycle.pause = start.elapsed();
        self.stats.record(cycle);
        log::debug!(
            "gc #{}: {} roots, {} marked, {} freed ({} bytes), {} live ({} bytes) in {:?}",
            self.stats.collections,
            cycle.roots,
            cycle.marked,
            cycle.freed,
            cycle.freed_bytes,
            cycle.survivors,
            cycle.live_bytes,
            cycle.pause
        );
        Ok(())
    }

    // ── Marking ───────────────────────────────────────────────────────

    fn mark(&mut self, cycle: &mut CollectionStats) -> Result<()> {
        let Self {
            allocator, roots, ..
        } = self;

        while let Some(ptr) = roots.pop() {
            let id = allocator.lookup(ptr)?;
            let header = allocator.header(id);
            if !header.is_allocated() {
                return Err(HeapError::NotAllocated { addr: ptr.addr() });
            }
            // already visited, do not expand again
            if header.is_marked() {
                continue;
            }
            if header.layout().is_none() {
                return Err(HeapError::MissingLayout { addr: ptr.addr() });
            }

            allocator.set_marked(id, true);
            cycle.marked += 1;

            let offsets = allocator
                .header(id)
                .layout()
                .map(|layout| layout.pointer_offsets())
                .unwrap_or_default();
            for &offset in offsets {
                let word = allocator.read_word(id, offset);
                if let Some(child) = ObjectPtr::from_word(word) {
                    roots.push(child)?;
                    cycle.edges += 1;
                }
            }
        }
        Ok(())
    }

    // ── Sweeping ──────────────────────────────────────────────────────

    fn sweep(&mut self, cycle: &mut CollectionStats) {
        let allocator = &mut self.allocator;
        let mut cursor = allocator.allocated_head();

        while let Some(id) = cursor {
            let header = allocator.header(id);
            // releasing unlinks `id`, so step first
            cursor = header.next();
            let size = header.size();

            if header.is_marked() {
                allocator.set_marked(id, false);
                cycle.survivors += 1;
                cycle.live_bytes += size;
            } else {
                allocator.release_block(id);
                cycle.freed += 1;
                cycle.freed_bytes += size;
            }
        }
    }
}
