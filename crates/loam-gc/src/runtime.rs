//! The embedder-facing runtime.
//!
//! A [`Runtime`] owns the type store, the segmented heap, the thread
//! registry and the mark epoch, all behind one mutex: the global GC
//! lock. Every public operation acquires it, which serializes type
//! registration and interning, allocation, thread registration and
//! collections exactly as the concurrency model requires. Allocation is
//! therefore the only point at which a mutator can block or observe a
//! collection pause.

use std::mem::size_of;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::collect;
use crate::heap::{Heap, HeapConfig};
use crate::metrics::GcMetrics;
use crate::object::{ArrayHeader, ArrayRef, ObjRef, ObjectHeader, StaticsRef};
use crate::threads::ThreadRegistry;
use crate::types::{ClassId, FieldFlags, FieldId, MethodId, TypeCategory, TypeId, TypeStore};

/// Everything the GC lock protects.
pub(crate) struct RuntimeState {
    pub(crate) types: TypeStore,
    pub(crate) heap: Heap,
    pub(crate) threads: ThreadRegistry,
    pub(crate) mark_epoch: u8,
    pub(crate) collections: usize,
    pub(crate) last_metrics: GcMetrics,
}

/// A stop-the-world, conservative mark-and-sweep garbage collector for a
/// class-based runtime.
///
/// The embedder configures a type system (classes, fields, methods,
/// arrays), computes layouts, and then allocates objects whose memory it
/// reads and writes directly via offsets obtained from the store.
/// Objects stay alive while their address is visible to the collector:
/// on a registered thread's stack or registers, in a live object's
/// reference fields or elements, or in a class's static block.
///
/// Threads that allocate must be attached first; see
/// [`attach`](Self::attach).
pub struct Runtime {
    state: Mutex<RuntimeState>,
}

impl Runtime {
    /// Creates a runtime with the given heap configuration. Segments are
    /// created lazily, on allocation pressure.
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        Self {
            state: Mutex::new(RuntimeState {
                types: TypeStore::new(),
                heap: Heap::new(config),
                threads: ThreadRegistry::new(),
                mark_epoch: 0,
                collections: 0,
                last_metrics: GcMetrics::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Type store configuration
    // ------------------------------------------------------------------

    /// Registers a class. The base, if any, must already be registered.
    pub fn register_class(&self, name: &str, base: Option<ClassId>) -> ClassId {
        self.state.lock().types.register_class(name, base)
    }

    /// Appends a field to `class`; fields keep declaration order.
    pub fn add_field(&self, class: ClassId, ty: TypeId, flags: FieldFlags) -> FieldId {
        self.state.lock().types.add_field(class, ty, flags)
    }

    /// Appends a method to `class`. Virtual methods reserve a
    /// function-pointer-sized slot in the instance layout.
    pub fn add_method(&self, class: ClassId, is_virtual: bool) -> MethodId {
        self.state.lock().types.add_method(class, is_virtual)
    }

    /// The canonical `i32` type.
    #[must_use]
    pub fn int32(&self) -> TypeId {
        self.state.lock().types.int32()
    }

    /// The canonical array type over `content`. Idempotent.
    #[must_use]
    pub fn array_of(&self, content: TypeId) -> TypeId {
        self.state.lock().types.array_of(content)
    }

    /// The canonical class type of `class`. Idempotent.
    #[must_use]
    pub fn class_type(&self, class: ClassId) -> TypeId {
        self.state.lock().types.class_type(class)
    }

    /// Looks a class up by its full name.
    #[must_use]
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.state.lock().types.find_class(name)
    }

    /// Looks a class up by its full name, panicking on a miss.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> ClassId {
        self.state.lock().types.class_by_name(name)
    }

    /// Computes instance layouts for every registered class.
    pub fn compute_sizes(&self) {
        self.state.lock().types.compute_sizes();
    }

    /// Computes static-block layouts for every registered class.
    pub fn compute_static_sizes(&self) {
        self.state.lock().types.compute_static_sizes();
    }

    /// Allocates each class's static block from the heap, zero-filled.
    /// Static blocks are permanent roots; run this once, after
    /// [`compute_static_sizes`](Self::compute_static_sizes).
    pub fn prepare_static_fields(&self) {
        let mut state = self.state.lock();
        assert!(
            !state.types.statics_prepared(),
            "static fields already prepared"
        );
        for index in 0..state.types.class_count() {
            let class = ClassId(index);
            let size = state.types.class(class).static_size();
            if size == 0 {
                continue;
            }
            let block = alloc_raw(&mut state, size, false);
            // SAFETY: freshly allocated block of exactly `size` bytes.
            unsafe {
                std::ptr::write_bytes(block.as_ptr(), 0, size);
            }
            state.types.set_static_data(class, block.as_ptr());
        }
        state.types.mark_statics_prepared();
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// The computed byte offset of `field`: within instances for
    /// instance fields, within the class's static block for static
    /// fields. Meaningless before the respective layout pass.
    #[must_use]
    pub fn field_offset(&self, field: FieldId) -> usize {
        self.state.lock().types.class(field.class).fields()[field.index].offset()
    }

    /// The instance byte offset of a virtual method's slot.
    #[must_use]
    pub fn virtual_offset(&self, method: MethodId) -> usize {
        self.state.lock().types.class(method.class).methods()[method.index].virtual_offset()
    }

    /// Full instance size of `class` in bytes, header included.
    #[must_use]
    pub fn instance_size(&self, class: ClassId) -> usize {
        self.state.lock().types.class(class).instance_size()
    }

    /// Static-block size of `class` in bytes.
    #[must_use]
    pub fn static_size(&self, class: ClassId) -> usize {
        self.state.lock().types.class(class).static_size()
    }

    /// A view of `class`'s static block.
    ///
    /// # Panics
    ///
    /// Panics when the class has no static block: either
    /// [`prepare_static_fields`](Self::prepare_static_fields) has not
    /// run or the class has no static fields.
    #[must_use]
    pub fn statics(&self, class: ClassId) -> StaticsRef {
        let data = self.state.lock().types.class(class).static_data();
        let ptr = NonNull::new(data).expect("class has no static block");
        StaticsRef::from_raw(ptr)
    }

    /// The number of bytes `ty` occupies when stored directly in the
    /// heap: the header footprint for class objects, the array-header
    /// footprint for arrays, the scalar size for `i32`.
    #[must_use]
    pub fn measure_direct_heap_size(&self, ty: TypeId) -> usize {
        self.state.lock().types.measure_direct_heap_size(ty)
    }

    /// Payload size of an array of `len` elements of `content_type`.
    #[must_use]
    pub fn measure_array_content_size(&self, content_type: TypeId, len: usize) -> usize {
        self.state
            .lock()
            .types
            .measure_array_content_size(content_type, len)
    }

    /// Formats every class's name, base, instance size and static size
    /// as a diagnostic dump.
    #[must_use]
    pub fn dump_class_layouts(&self) -> String {
        self.state.lock().types.dump_class_layouts()
    }

    /// Whether `addr` is the start of a live reference object: inside
    /// some segment, unit-aligned, and flagged as an object start.
    #[must_use]
    pub fn is_heap_object(&self, addr: *const u8) -> bool {
        self.state.lock().heap.is_heap_object(addr as usize)
    }

    /// Whether the heap unit at `addr` is part of a live allocation
    /// (object span or payload block). Diagnostic.
    #[must_use]
    pub fn is_allocated(&self, addr: *const u8) -> bool {
        let state = self.state.lock();
        state
            .heap
            .find_owner(addr as usize, false)
            .is_some_and(|segment| segment.is_unit_allocated(addr as usize))
    }

    /// Number of heap segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.lock().heap.segment_count()
    }

    /// Statistics from the most recent collection.
    #[must_use]
    pub fn last_gc_metrics(&self) -> GcMetrics {
        self.state.lock().last_metrics
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates a zeroed instance of the given class type and writes
    /// its header.
    ///
    /// # Panics
    ///
    /// Panics when `ty` is not a class type or
    /// [`compute_sizes`](Self::compute_sizes) has not run.
    pub fn alloc_class(&self, ty: TypeId) -> ObjRef {
        let mut state = self.state.lock();
        debug_assert!(
            state.threads.current().is_some(),
            "allocating thread is not attached; its stack cannot be scanned"
        );
        let TypeCategory::Class(class) = ty.category() else {
            panic!("alloc_class requires a class type");
        };
        assert!(
            state.types.layout_done(),
            "compute_sizes must run before allocation"
        );
        let size = state.types.class(class).instance_size();
        let chunk = alloc_raw(&mut state, size, true);
        // SAFETY: freshly allocated span of `size` bytes, unit-aligned.
        unsafe {
            std::ptr::write_bytes(chunk.as_ptr(), 0, size);
            let header = chunk.cast::<ObjectHeader>().as_ptr();
            (*header).type_id = ty;
            (*header).mark = state.mark_epoch;
        }
        ObjRef::from_header(chunk.cast())
    }

    /// Allocates an array of `length` elements of `content`: a zeroed
    /// payload block plus an array object whose header carries the
    /// canonical `array_of(content)` type.
    pub fn alloc_array(&self, content: TypeId, length: usize) -> ArrayRef {
        let mut state = self.state.lock();
        debug_assert!(
            state.threads.current().is_some(),
            "allocating thread is not attached; its stack cannot be scanned"
        );
        let content_size = state.types.measure_array_content_size(content, length);
        // Payload first. A collection triggered by the header allocation
        // cannot reclaim it: sweep only frees payloads through dead
        // array objects, and no array owns this block yet.
        let payload = alloc_raw(&mut state, content_size, false);
        let chunk = alloc_raw(&mut state, size_of::<ArrayHeader>(), true);
        let array_type = state.types.array_of(content);
        // SAFETY: both spans were just allocated at the sizes used here.
        unsafe {
            std::ptr::write_bytes(payload.as_ptr(), 0, content_size);
            let header = chunk.cast::<ArrayHeader>().as_ptr();
            (*header).header.type_id = array_type;
            (*header).header.mark = state.mark_epoch;
            (*header).length = length;
            (*header).content = payload.as_ptr();
        }
        ArrayRef::from_header(chunk.cast())
    }

    // ------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------

    /// Runs a full collection now.
    pub fn force_gc(&self) {
        let mut state = self.state.lock();
        collect::perform_collection(&mut state);
    }

    /// Registers the calling thread with its OS-reported stack base.
    /// Must happen before the thread first allocates; prefer
    /// [`attach`](Self::attach).
    pub fn attach_current_thread(&self) {
        self.state.lock().threads.register_current();
    }

    /// Removes the calling thread's registration.
    pub fn detach_current_thread(&self) {
        self.state.lock().threads.unregister_current();
    }

    /// Runs `run` with the calling thread attached, detaching again when
    /// it returns or unwinds. This is the thread entry point helper:
    /// wrap each mutator thread's body in it.
    pub fn attach<R>(&self, run: impl FnOnce() -> R) -> R {
        struct DetachGuard<'a>(&'a Runtime);
        impl Drop for DetachGuard<'_> {
            fn drop(&mut self) {
                self.0.detach_current_thread();
            }
        }

        self.attach_current_thread();
        let _guard = DetachGuard(self);
        run()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(HeapConfig::default())
    }
}

/// The allocation escalation ladder: existing segments, then a
/// collection (when there is anything to collect), then growth. Growth
/// failure aborts inside [`Heap::grow`]; a fresh segment sized for the
/// request cannot fail to serve it.
fn alloc_raw(state: &mut RuntimeState, size: usize, is_gc_object: bool) -> NonNull<u8> {
    if let Some(chunk) = state.heap.try_alloc(size, is_gc_object) {
        return chunk;
    }
    if state.heap.segment_count() > 0 {
        collect::perform_collection(state);
        if let Some(chunk) = state.heap.try_alloc(size, is_gc_object) {
            return chunk;
        }
    }
    let segment = state.heap.grow(size);
    segment
        .try_alloc(size, is_gc_object)
        .expect("fresh segment cannot satisfy allocation")
}
