//! A stop-the-world, conservative mark-and-sweep garbage collector for
//! class-based runtimes.
//!
//! `loam-gc` manages a **bitmap-managed segmented heap** on behalf of an
//! embedder that emulates a JVM-style type system: classes with single
//! inheritance, static fields and virtual-method slots, plus typed
//! arrays of primitives or references. The embedder describes its types
//! through the [`Runtime`]'s type store; the collector uses that
//! metadata to trace reference fields and array elements precisely,
//! while roots are found conservatively by scanning the stacks and
//! register files of registered mutator threads and precisely from
//! per-class static blocks.
//!
//! # Model
//!
//! - The heap is a union of **segments**, each a contiguous mapped
//!   region with two bitmaps (one bit per 16-byte heap unit): which
//!   units are allocated, and which start a reference object.
//! - Every reference object begins with a two-word header
//!   `{ type, mark }`. Array element storage is a *separate*
//!   non-reference block owned by its array object.
//! - Allocation rotates across segments; exhaustion triggers a
//!   collection, and only then does the heap grow by one segment.
//! - A collection stops the world: every registered thread except the
//!   collector is suspended via the platform primitive before any
//!   foreign stack is read, and resumed after the sweep.
//!
//! # Quick start
//!
//! ```ignore
//! use loam_gc::{FieldFlags, HeapConfig, Runtime};
//!
//! let rt = Runtime::new(HeapConfig::default());
//! let link = rt.register_class("core.Link", None);
//! let link_ty = rt.class_type(link);
//! let f_next = rt.add_field(link, link_ty, FieldFlags::INSTANCE);
//! let f_val = rt.add_field(link, rt.int32(), FieldFlags::INSTANCE);
//! rt.compute_sizes();
//! rt.compute_static_sizes();
//! rt.prepare_static_fields();
//!
//! rt.attach(|| {
//!     let node = rt.alloc_class(link_ty);
//!     unsafe { node.write_i32(rt.field_offset(f_val), 7) };
//!     rt.force_gc(); // `node` survives: its address is on this stack
//! });
//! ```
//!
//! # Rooting contract
//!
//! Object references ([`ObjRef`], [`ArrayRef`]) are raw views, not
//! owning handles. An object survives collection only while its address
//! is visible to the collector: on an attached thread's stack or
//! registers, in a reachable object's reference fields or elements, or
//! in a static block. Keeping the sole reference to an object in
//! ordinary non-GC heap memory (a `Vec`, a `Box`) hides it from the
//! collector. A pointer-sized integer that happens to equal a live
//! object's address keeps that object alive; this conservative
//! false-positive retention is by contract.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

mod bitset;
mod collect;
mod heap;
mod metrics;
mod object;
mod runtime;
mod segment;
mod stack;
mod suspend;
mod threads;
mod trace;
mod types;

pub use heap::HeapConfig;
pub use metrics::GcMetrics;
pub use object::{ArrayHeader, ArrayRef, ObjRef, ObjectHeader, StaticsRef, HEAP_UNIT};
pub use runtime::Runtime;
pub use types::{ClassId, FieldFlags, FieldId, MethodId, TypeCategory, TypeId};

#[doc(hidden)]
pub mod test_util {
    //! Helpers for tests that assert reclamation.
    pub use crate::stack::clear_registers;
}
