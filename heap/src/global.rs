//! The process-wide heap.
//!
//! Thin wrappers around one lazily created [`Heap`] behind a lock. There is
//! no error path here: every heap error is handed to [`fatal`].

use std::sync::Arc;

use parking_lot::{Mutex, const_mutex};

use crate::{Heap, HeapSettings, ObjectPtr, TypeLayout, fatal};

static HEAP: Mutex<Option<Heap>> = const_mutex(None);

/// Reserve the process-wide heap with default settings. Later calls do
/// nothing.
pub fn init() {
    init_with(HeapSettings::default());
}

/// Like [`init`], with explicit settings. Ignored once the heap exists.
pub fn init_with(settings: HeapSettings) {
    let mut heap = HEAP.lock();
    if heap.is_some() {
        log::debug!("process heap already initialized");
        return;
    }
    *heap = Some(create(settings));
}

fn create(settings: HeapSettings) -> Heap {
    Heap::new(settings).unwrap_or_else(|err| fatal(err))
}

pub fn is_initialized() -> bool {
    HEAP.lock().is_some()
}

/// Run `f` on the process-wide heap, initializing it with defaults first if
/// needed.
pub fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    let mut heap = HEAP.lock();
    f(heap.get_or_insert_with(|| create(HeapSettings::default())))
}

pub fn allocate(size: usize) -> ObjectPtr {
    with_heap(|heap| heap.allocate(size)).unwrap_or_else(|err| fatal(err))
}

pub fn release(ptr: Option<ObjectPtr>) {
    with_heap(|heap| heap.release(ptr)).unwrap_or_else(|err| fatal(err))
}

pub fn insert_root(ptr: ObjectPtr) {
    with_heap(|heap| heap.insert_root(ptr)).unwrap_or_else(|err| fatal(err))
}

pub fn new_object(layout: &Arc<TypeLayout>) -> ObjectPtr {
    with_heap(|heap| heap.new_object(layout)).unwrap_or_else(|err| fatal(err))
}

pub fn collect() {
    with_heap(Heap::collect).unwrap_or_else(|err| fatal(err))
}
