//! In-memory object layout.
//!
//! Every reference object in the heap (class instance or array) begins
//! with an [`ObjectHeader`]. The header size doubles as the heap unit:
//! the minimum allocation granularity inside a segment, and the
//! alignment every reference object starts on.
//!
//! Embedders read and write object memory directly through the raw views
//! ([`ObjRef`], [`ArrayRef`], [`StaticsRef`]) using offsets computed by
//! the type store, so the layouts here are a published ABI:
//!
//! - class instance: `[header | base fields… | own fields… | virtual slots…]`
//! - array object: `[header | length | content pointer]`
//! - static block: fields in declaration order, natural alignment
//!
//! Array payloads are *separate* non-reference blocks; the array object
//! itself is just the fixed-size header above.

use std::mem::size_of;
use std::ptr::NonNull;

use crate::types::{TypeCategory, TypeId};

/// The minimum allocation granularity within a segment.
///
/// Equal to the object header size: two machine words on 64-bit targets.
pub const HEAP_UNIT: usize = size_of::<ObjectHeader>();

/// Header placed at offset 0 of every reference object.
#[repr(C)]
pub struct ObjectHeader {
    /// Canonical type of the object.
    pub(crate) type_id: TypeId,
    /// Mark epoch stamped by the most recent collection that reached
    /// this object.
    pub(crate) mark: u8,
}

/// Header of an array object. The element storage lives in a separately
/// allocated non-reference block pointed to by `content`.
#[repr(C)]
pub struct ArrayHeader {
    /// Common object header; `type_id` is the canonical array type.
    pub(crate) header: ObjectHeader,
    /// Number of elements.
    pub(crate) length: usize,
    /// Separately allocated element storage.
    pub(crate) content: *mut u8,
}

/// A reference to a class instance (or, viewed through its header, any
/// reference object) in the garbage-collected heap.
///
/// This is a raw view: it does not root the object. The object stays
/// alive as long as its address is visible to the collector: on a
/// registered thread's stack, in another live object's fields, or in a
/// static block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ObjRef(NonNull<ObjectHeader>);

// SAFETY: `ObjRef` is an address into shared runtime-managed memory;
// synchronization of field accesses is the embedder's contract, exactly
// as it is for the raw pointers these views wrap.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    pub(crate) const fn from_header(ptr: NonNull<ObjectHeader>) -> Self {
        Self(ptr)
    }

    pub(crate) const fn header(self) -> *mut ObjectHeader {
        self.0.as_ptr()
    }

    /// The object's address.
    #[must_use]
    pub const fn as_raw(self) -> *mut u8 {
        self.0.as_ptr().cast::<u8>()
    }

    /// The object's canonical type.
    #[must_use]
    pub fn type_id(self) -> TypeId {
        unsafe { (*self.0.as_ptr()).type_id }
    }

    /// Reads an `i32` field at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be the computed offset of an `i32` field of this
    /// object's class (or an ancestor).
    #[must_use]
    pub unsafe fn read_i32(self, offset: usize) -> i32 {
        unsafe { self.as_raw().add(offset).cast::<i32>().read() }
    }

    /// Writes an `i32` field at `offset`.
    ///
    /// # Safety
    ///
    /// Same contract as [`read_i32`](Self::read_i32).
    pub unsafe fn write_i32(self, offset: usize, value: i32) {
        unsafe { self.as_raw().add(offset).cast::<i32>().write(value) }
    }

    /// Reads a reference field at `offset`. Returns `None` for null.
    ///
    /// # Safety
    ///
    /// `offset` must be the computed offset of a class- or array-typed
    /// field of this object's class (or an ancestor).
    #[must_use]
    pub unsafe fn read_ref(self, offset: usize) -> Option<Self> {
        let raw = unsafe { self.as_raw().add(offset).cast::<*mut ObjectHeader>().read() };
        NonNull::new(raw).map(Self)
    }

    /// Writes a reference field at `offset`; `None` stores null.
    ///
    /// # Safety
    ///
    /// Same contract as [`read_ref`](Self::read_ref).
    pub unsafe fn write_ref(self, offset: usize, value: Option<Self>) {
        let raw = value.map_or(std::ptr::null_mut(), Self::header);
        unsafe {
            self.as_raw()
                .add(offset)
                .cast::<*mut ObjectHeader>()
                .write(raw);
        }
    }

    /// Reinterprets this reference as an array.
    ///
    /// # Safety
    ///
    /// The referenced object must be an array (its type category must be
    /// [`TypeCategory::Array`]).
    #[must_use]
    pub unsafe fn as_array(self) -> ArrayRef {
        debug_assert!(
            matches!(self.type_id().category(), TypeCategory::Array(_)),
            "object is not an array"
        );
        ArrayRef(self.0.cast())
    }
}

/// A reference to an array object in the garbage-collected heap.
///
/// Rooting works exactly as for [`ObjRef`]; the element payload is kept
/// alive by the array object that owns it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ArrayRef(NonNull<ArrayHeader>);

// SAFETY: see `ObjRef`.
unsafe impl Send for ArrayRef {}
unsafe impl Sync for ArrayRef {}

impl ArrayRef {
    pub(crate) const fn from_header(ptr: NonNull<ArrayHeader>) -> Self {
        Self(ptr)
    }

    /// Views the array through its common object header, e.g. to store
    /// it in a reference field.
    #[must_use]
    pub const fn as_obj(self) -> ObjRef {
        ObjRef(self.0.cast())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(self) -> usize {
        unsafe { (*self.0.as_ptr()).length }
    }

    /// Returns `true` if the array has no elements.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Address of the element payload.
    #[must_use]
    pub fn content(self) -> *mut u8 {
        unsafe { (*self.0.as_ptr()).content }
    }

    /// Reads element `index` of an `i32` array.
    ///
    /// # Safety
    ///
    /// The array's content type must be `i32` and `index` must be in
    /// bounds.
    #[must_use]
    pub unsafe fn get_i32(self, index: usize) -> i32 {
        debug_assert!(index < self.len(), "array index {index} out of bounds");
        unsafe { self.content().cast::<i32>().add(index).read() }
    }

    /// Writes element `index` of an `i32` array.
    ///
    /// # Safety
    ///
    /// Same contract as [`get_i32`](Self::get_i32).
    pub unsafe fn set_i32(self, index: usize, value: i32) {
        debug_assert!(index < self.len(), "array index {index} out of bounds");
        unsafe { self.content().cast::<i32>().add(index).write(value) }
    }

    /// Reads element `index` of a reference array. Returns `None` for
    /// null.
    ///
    /// # Safety
    ///
    /// The array's content type must be a class or array type and
    /// `index` must be in bounds.
    #[must_use]
    pub unsafe fn get_ref(self, index: usize) -> Option<ObjRef> {
        debug_assert!(index < self.len(), "array index {index} out of bounds");
        let raw = unsafe { self.content().cast::<*mut ObjectHeader>().add(index).read() };
        NonNull::new(raw).map(ObjRef)
    }

    /// Writes element `index` of a reference array; `None` stores null.
    ///
    /// # Safety
    ///
    /// Same contract as [`get_ref`](Self::get_ref).
    pub unsafe fn set_ref(self, index: usize, value: Option<ObjRef>) {
        debug_assert!(index < self.len(), "array index {index} out of bounds");
        let raw = value.map_or(std::ptr::null_mut(), ObjRef::header);
        unsafe {
            self.content()
                .cast::<*mut ObjectHeader>()
                .add(index)
                .write(raw);
        }
    }
}

/// A view of a class's static block.
///
/// The block is allocated once by `prepare_static_fields` and is a
/// permanent root: reference fields stored here keep their targets alive
/// across collections.
#[derive(Clone, Copy, Debug)]
pub struct StaticsRef(NonNull<u8>);

// SAFETY: see `ObjRef`.
unsafe impl Send for StaticsRef {}
unsafe impl Sync for StaticsRef {}

impl StaticsRef {
    pub(crate) const fn from_raw(ptr: NonNull<u8>) -> Self {
        Self(ptr)
    }

    /// Address of the static block.
    #[must_use]
    pub const fn as_raw(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Reads a static `i32` field at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be the computed static offset of an `i32` field of
    /// this block's class.
    #[must_use]
    pub unsafe fn read_i32(self, offset: usize) -> i32 {
        unsafe { self.as_raw().add(offset).cast::<i32>().read() }
    }

    /// Writes a static `i32` field at `offset`.
    ///
    /// # Safety
    ///
    /// Same contract as [`read_i32`](Self::read_i32).
    pub unsafe fn write_i32(self, offset: usize, value: i32) {
        unsafe { self.as_raw().add(offset).cast::<i32>().write(value) }
    }

    /// Reads a static reference field at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be the computed static offset of a class- or
    /// array-typed field of this block's class.
    #[must_use]
    pub unsafe fn read_ref(self, offset: usize) -> Option<ObjRef> {
        let raw = unsafe { self.as_raw().add(offset).cast::<*mut ObjectHeader>().read() };
        NonNull::new(raw).map(ObjRef)
    }

    /// Writes a static reference field at `offset`; `None` stores null.
    ///
    /// # Safety
    ///
    /// Same contract as [`read_ref`](Self::read_ref).
    pub unsafe fn write_ref(self, offset: usize, value: Option<ObjRef>) {
        let raw = value.map_or(std::ptr::null_mut(), ObjRef::header);
        unsafe {
            self.as_raw()
                .add(offset)
                .cast::<*mut ObjectHeader>()
                .write(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_two_words() {
        assert_eq!(HEAP_UNIT, 2 * size_of::<usize>());
        assert_eq!(HEAP_UNIT % size_of::<usize>(), 0);
    }

    #[test]
    fn array_header_is_a_unit_multiple() {
        assert_eq!(size_of::<ArrayHeader>() % HEAP_UNIT, 0);
        assert_eq!(size_of::<ArrayHeader>(), HEAP_UNIT + 2 * size_of::<usize>());
    }
}
