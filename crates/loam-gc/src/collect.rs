//! Stop-the-world mark and sweep.
//!
//! A collection advances the mark epoch, stops every registered thread
//! except the collector itself, gathers roots (conservative stack and
//! register scan per thread, precise scan of static reference fields),
//! runs a BFS over the reachable graph using type metadata to find
//! reference fields and array elements, then sweeps each segment's
//! object-start bitmap, reclaiming every object not stamped with the
//! current epoch. Threads resume only after the sweep completes.

use std::collections::VecDeque;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::heap::Heap;
use crate::metrics::GcMetrics;
use crate::object::{ArrayHeader, ObjectHeader};
use crate::runtime::RuntimeState;
use crate::stack;
use crate::suspend::{self, StopContext};
use crate::threads::{ThreadRecord, ThreadRegistry};
use crate::types::{ClassId, TypeCategory, TypeStore};

/// A thread stopped for the duration of this collection.
struct StoppedMutator {
    record: Arc<ThreadRecord>,
    ctx: StopContext,
}

/// The suspension handshake uses process-global state, so world stops
/// from distinct runtimes in one process must not overlap.
static STOP_THE_WORLD: Mutex<()> = Mutex::new(());

/// Runs one full collection. Caller holds the global GC mutex.
pub(crate) fn perform_collection(state: &mut RuntimeState) {
    let started = Instant::now();

    // The epoch is a wrapping u8: any object still live at wraparound is
    // re-stamped during that same cycle, so only unreachable objects can
    // carry a stale value equal to the new epoch, and those are never
    // compared against it during marking, only during sweep, where the
    // collision merely delays their reclamation by one cycle.
    state.mark_epoch = state.mark_epoch.wrapping_add(1);
    let epoch = state.mark_epoch;

    #[cfg(feature = "tracing")]
    let _collection = crate::trace::internal::collection_span(epoch);

    let stop_guard = STOP_THE_WORLD.lock();
    let stopped = stop_world(&state.threads);

    let mut queue: VecDeque<*mut ObjectHeader> = VecDeque::with_capacity(256);
    {
        #[cfg(feature = "tracing")]
        let _phase = crate::trace::internal::phase_span(crate::trace::internal::GcPhase::Roots);
        scan_roots(&state.heap, &state.types, &state.threads, &stopped, &mut queue);
    }
    {
        #[cfg(feature = "tracing")]
        let _phase = crate::trace::internal::phase_span(crate::trace::internal::GcPhase::Mark);
        mark(&state.types, epoch, &mut queue);
    }
    let stats = {
        #[cfg(feature = "tracing")]
        let _phase = crate::trace::internal::phase_span(crate::trace::internal::GcPhase::Sweep);
        sweep(&state.types, &mut state.heap, epoch)
    };

    resume_world(&stopped);
    drop(stop_guard);

    state.collections += 1;
    state.last_metrics = GcMetrics {
        duration: started.elapsed(),
        objects_reclaimed: stats.objects_reclaimed,
        bytes_reclaimed: stats.bytes_reclaimed,
        objects_surviving: stats.objects_surviving,
        segments: state.heap.segment_count(),
        total_collections: state.collections,
    };
    #[cfg(feature = "tracing")]
    tracing::debug!(
        epoch,
        objects_reclaimed = stats.objects_reclaimed,
        bytes_reclaimed = stats.bytes_reclaimed,
        objects_surviving = stats.objects_surviving,
        "collection finished"
    );
}

/// Suspends every registered thread except the caller. Must complete
/// before any foreign stack is read.
fn stop_world(registry: &ThreadRegistry) -> Vec<StoppedMutator> {
    let mut stopped = Vec::new();
    for record in registry.iter() {
        if record.os.is_current() {
            continue;
        }
        // SAFETY: the record belongs to a registered thread other than
        // this one, and the GC mutex serializes handshakes.
        let ctx = unsafe { suspend::suspend(record) };
        stopped.push(StoppedMutator {
            record: Arc::clone(record),
            ctx,
        });
    }
    stopped
}

fn resume_world(stopped: &[StoppedMutator]) {
    // SAFETY: every record here was stopped by `stop_world` in this
    // collection.
    unsafe {
        suspend::resume_all(stopped.iter().map(|mutator| mutator.record.as_ref()));
    }
}

/// Fills the initial mark queue. A conservative candidate is admitted
/// only if `is_heap_object` accepts it (segment membership, unit
/// alignment and the object-start bit), which keeps interior and stale
/// pointers from ever being dereferenced.
fn scan_roots(
    heap: &Heap,
    types: &TypeStore,
    registry: &ThreadRegistry,
    stopped: &[StoppedMutator],
    queue: &mut VecDeque<*mut ObjectHeader>,
) {
    // The collector's own thread: spill callee-saved registers, then
    // scan its stack from the current frame up to the recorded base.
    if let Some(record) = registry.current() {
        let base = record.stack_base;
        stack::spill_registers_and_scan(base, |value| {
            if heap.is_heap_object(value) {
                queue.push_back(value as *mut ObjectHeader);
            }
        });
    } else {
        #[cfg(feature = "tracing")]
        tracing::warn!("collection from an unattached thread; its stack is not scanned");
    }

    // Suspended threads: their stacks (which include the interrupted
    // register file on platforms that deliver the stop on-stack), plus
    // any explicitly captured registers.
    for mutator in stopped {
        let mut visit = |value: usize| {
            if heap.is_heap_object(value) {
                queue.push_back(value as *mut ObjectHeader);
            }
        };
        stack::scan_words(mutator.ctx.sp, mutator.record.stack_base, &mut visit);
        for &value in &mutator.ctx.regs {
            visit(value);
        }
    }

    // Static reference fields, precisely.
    for index in 0..types.class_count() {
        let cls = types.class(ClassId(index));
        let data = cls.static_data();
        if data.is_null() {
            continue;
        }
        for field in cls.fields() {
            if !field.flags().is_static || !field.is_reference() {
                continue;
            }
            // SAFETY: the static block was allocated with the computed
            // static size, and the field offset lies within it.
            let slot = unsafe {
                data.add(field.offset())
                    .cast::<*mut ObjectHeader>()
                    .read()
            };
            if !slot.is_null() {
                debug_assert!(
                    heap.is_heap_object(slot as usize),
                    "static reference points outside the heap"
                );
                queue.push_back(slot);
            }
        }
    }
}

/// BFS over the reachable graph. Every dequeued pointer is a valid
/// object header: conservative candidates were filtered on admission,
/// traced edges come from typed fields and elements.
fn mark(types: &TypeStore, epoch: u8, queue: &mut VecDeque<*mut ObjectHeader>) {
    while let Some(object) = queue.pop_front() {
        unsafe {
            if (*object).mark == epoch {
                continue;
            }
            (*object).mark = epoch;

            match (*object).type_id.category() {
                TypeCategory::Class(class) => {
                    // Walk the inheritance chain; every ancestor's
                    // instance fields live in this object.
                    let mut next = Some(class);
                    while let Some(id) = next {
                        let cls = types.class(id);
                        for field in cls.fields() {
                            if field.flags().is_static || !field.is_reference() {
                                continue;
                            }
                            let slot = object
                                .cast::<u8>()
                                .add(field.offset())
                                .cast::<*mut ObjectHeader>()
                                .read();
                            if !slot.is_null() {
                                queue.push_back(slot);
                            }
                        }
                        next = cls.base();
                    }
                }
                TypeCategory::Array(content) => {
                    let array = object.cast::<ArrayHeader>();
                    match content.category() {
                        TypeCategory::Class(_) | TypeCategory::Array(_) => {
                            let elements = (*array).content.cast::<*mut ObjectHeader>();
                            for i in 0..(*array).length {
                                let element = elements.add(i).read();
                                if !element.is_null() {
                                    queue.push_back(element);
                                }
                            }
                        }
                        TypeCategory::Int32 => {}
                    }
                }
                TypeCategory::Int32 => {
                    panic!("object header carries a primitive type: heap corruption");
                }
            }
        }
    }
}

struct SweepStats {
    objects_reclaimed: usize,
    bytes_reclaimed: usize,
    objects_surviving: usize,
}

/// Walks each segment's object-start bitmap and reclaims every object
/// not stamped with the current epoch. Dead arrays additionally free
/// their payload block, wherever it lives; payload frees are deferred
/// until after the walk so the owning segment can be borrowed cleanly.
fn sweep(types: &TypeStore, heap: &mut Heap, epoch: u8) -> SweepStats {
    let mut stats = SweepStats {
        objects_reclaimed: 0,
        bytes_reclaimed: 0,
        objects_surviving: 0,
    };
    let mut dead_payloads: Vec<(usize, usize)> = Vec::new();

    for segment in heap.segments_mut() {
        let mut cursor = segment.next_object_start(0);
        while let Some(unit) = cursor {
            let object = segment.addr_of_unit(unit).cast::<ObjectHeader>();
            // SAFETY: a set object-start bit marks a live, initialized
            // header written by the allocator.
            unsafe {
                if (*object).mark == epoch {
                    stats.objects_surviving += 1;
                } else {
                    let byte_size = match (*object).type_id.category() {
                        TypeCategory::Class(class) => types.class(class).instance_size(),
                        TypeCategory::Array(content) => {
                            let array = object.cast::<ArrayHeader>();
                            let payload = (*array).content;
                            assert!(!payload.is_null(), "array object lost its payload");
                            let payload_size =
                                types.measure_array_content_size(content, (*array).length);
                            dead_payloads.push((payload as usize, payload_size));
                            size_of::<ArrayHeader>()
                        }
                        TypeCategory::Int32 => {
                            panic!("object header carries a primitive type: heap corruption");
                        }
                    };
                    segment.reclaim_object(unit, byte_size);
                    stats.objects_reclaimed += 1;
                    stats.bytes_reclaimed += byte_size;
                }
            }
            cursor = segment.next_object_start(unit + 1);
        }
    }

    for (addr, size) in dead_payloads {
        let owner = heap
            .find_owner_mut(addr, false)
            .expect("array payload not owned by any heap segment");
        owner.free_non_gc_object(addr, size);
        stats.bytes_reclaimed += size;
    }

    stats
}
