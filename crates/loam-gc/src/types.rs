//! Type metadata store and layout engine.
//!
//! The store canonicalizes type descriptors and computes the in-memory
//! layouts the rest of the collector relies on: instance layouts
//! (inherited base layout first, then own fields at natural alignment,
//! then virtual-method slots), per-class static layouts, and the direct
//! heap footprint of each type category.
//!
//! Canonical types underpin pointer-identity comparison: for a given
//! class there is exactly one class [`TypeId`], and for a given content
//! type exactly one array [`TypeId`] per dimension. `TypeInfo` records
//! are interned once and live for the process lifetime.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::sync::OnceLock;

use crate::object::{ArrayHeader, ObjectHeader};

/// Rounds `n` up to a multiple of `align` (a power of two).
pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// What a [`TypeId`] describes.
#[derive(Clone, Copy, Debug)]
pub enum TypeCategory {
    /// The 32-bit integer primitive.
    Int32,
    /// An array whose elements have the given content type.
    Array(TypeId),
    /// An instance of the given class.
    Class(ClassId),
}

/// Interned record behind a [`TypeId`]. Never freed.
struct TypeInfo {
    category: TypeCategory,
    /// Canonical array-of-this type, created on first request.
    array_type: OnceLock<TypeId>,
}

static INT32_INFO: TypeInfo = TypeInfo {
    category: TypeCategory::Int32,
    array_type: OnceLock::new(),
};

/// An opaque, stable handle to a canonical type.
///
/// Equality and hashing are pointer identity: two `TypeId`s compare
/// equal iff they denote the same canonical type.
#[derive(Clone, Copy)]
pub struct TypeId(&'static TypeInfo);

impl TypeId {
    fn intern(category: TypeCategory) -> Self {
        Self(Box::leak(Box::new(TypeInfo {
            category,
            array_type: OnceLock::new(),
        })))
    }

    /// The category this type belongs to.
    #[must_use]
    pub fn category(self) -> TypeCategory {
        self.0.category
    }
}

impl PartialEq for TypeId {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for TypeId {}

impl Hash for TypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (std::ptr::from_ref(self.0) as usize).hash(state);
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.category {
            TypeCategory::Int32 => write!(f, "i32"),
            TypeCategory::Array(content) => write!(f, "{content:?}[]"),
            TypeCategory::Class(id) => write!(f, "class#{}", id.0),
        }
    }
}

/// Handle to a registered class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClassId(pub(crate) usize);

/// Handle to a field of a registered class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FieldId {
    pub(crate) class: ClassId,
    pub(crate) index: usize,
}

impl FieldId {
    /// The class the field belongs to.
    #[must_use]
    pub const fn class(self) -> ClassId {
        self.class
    }

    /// The field's declaration index within its class.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

/// Handle to a method of a registered class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MethodId {
    pub(crate) class: ClassId,
    pub(crate) index: usize,
}

/// Field attributes.
#[derive(Clone, Copy, Debug)]
pub struct FieldFlags {
    /// Static fields live in the class's static block, not in instances.
    pub is_static: bool,
    /// Visibility marker; irrelevant to layout.
    pub is_public: bool,
}

impl FieldFlags {
    /// A public instance field.
    pub const INSTANCE: Self = Self {
        is_static: false,
        is_public: true,
    };

    /// A public static field.
    pub const STATIC: Self = Self {
        is_static: true,
        is_public: true,
    };
}

/// A declared field. The offset is assigned by the layout engine: by
/// `compute_sizes` for instance fields, by `compute_static_sizes` for
/// static fields, and is meaningless before the respective pass runs.
pub struct Field {
    ty: TypeId,
    flags: FieldFlags,
    offset: usize,
}

impl Field {
    /// The field's declared type.
    #[must_use]
    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// The field's attributes.
    #[must_use]
    pub const fn flags(&self) -> FieldFlags {
        self.flags
    }

    /// The computed byte offset: within instances for instance fields,
    /// within the class's static block for static fields.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// `true` when the field holds a reference (class or array).
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self.ty.category(),
            TypeCategory::Class(_) | TypeCategory::Array(_)
        )
    }
}

/// A declared method. Only virtual methods affect layout: each reserves
/// a function-pointer-sized slot in the instance.
pub struct Method {
    is_virtual: bool,
    virtual_offset: usize,
}

impl Method {
    /// Whether the method is virtual.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Byte offset of the virtual slot within instances. Meaningless for
    /// non-virtual methods or before `compute_sizes`.
    #[must_use]
    pub const fn virtual_offset(&self) -> usize {
        self.virtual_offset
    }
}

/// A registered class descriptor.
pub struct Class {
    name: String,
    base: Option<ClassId>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    instance_size: usize,
    static_size: usize,
    static_data: *mut u8,
    class_type: OnceLock<TypeId>,
}

impl Class {
    /// The class's full name, unique within the store.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base class, if any.
    #[must_use]
    pub const fn base(&self) -> Option<ClassId> {
        self.base
    }

    /// Declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Declared methods, in declaration order.
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Full instance size in bytes, including the inherited layout and
    /// the object header. Zero before `compute_sizes`.
    #[must_use]
    pub const fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Size of the class's static block in bytes. Static fields do not
    /// inherit; every class owns its own block. Zero before
    /// `compute_static_sizes` (or when there are no static fields).
    #[must_use]
    pub const fn static_size(&self) -> usize {
        self.static_size
    }

    pub(crate) const fn static_data(&self) -> *mut u8 {
        self.static_data
    }
}

/// The type metadata store.
///
/// Owned by the runtime and mutated only under the global GC mutex.
pub struct TypeStore {
    classes: Vec<Class>,
    layout_done: bool,
    statics_prepared: bool,
}

// SAFETY: the raw `static_data` pointers refer to blocks owned by the
// runtime's heap and carry no thread affinity.
unsafe impl Send for TypeStore {}

impl TypeStore {
    pub(crate) const fn new() -> Self {
        Self {
            classes: Vec::new(),
            layout_done: false,
            statics_prepared: false,
        }
    }

    /// The canonical `i32` type.
    #[must_use]
    pub fn int32(&self) -> TypeId {
        TypeId(&INT32_INFO)
    }

    /// The canonical array type over `content`. Idempotent: every call
    /// with the same content type returns the identical `TypeId`, even
    /// under concurrent first requests.
    #[must_use]
    pub fn array_of(&self, content: TypeId) -> TypeId {
        *content
            .0
            .array_type
            .get_or_init(|| TypeId::intern(TypeCategory::Array(content)))
    }

    /// The canonical class type of `class`. Idempotent.
    #[must_use]
    pub fn class_type(&self, class: ClassId) -> TypeId {
        *self.classes[class.0]
            .class_type
            .get_or_init(|| TypeId::intern(TypeCategory::Class(class)))
    }

    /// Registers a class. The base, if any, must already be registered,
    /// which keeps inheritance chains acyclic by construction.
    ///
    /// # Panics
    ///
    /// Panics if the name is already taken or the base id is unknown.
    pub fn register_class(&mut self, name: &str, base: Option<ClassId>) -> ClassId {
        assert!(
            self.find_class(name).is_none(),
            "class `{name}` already registered"
        );
        if let Some(b) = base {
            assert!(b.0 < self.classes.len(), "base class id is unknown");
        }
        self.classes.push(Class {
            name: name.to_owned(),
            base,
            fields: Vec::new(),
            methods: Vec::new(),
            instance_size: 0,
            static_size: 0,
            static_data: std::ptr::null_mut(),
            class_type: OnceLock::new(),
        });
        ClassId(self.classes.len() - 1)
    }

    /// Appends a field to `class`. Fields keep declaration order.
    pub fn add_field(&mut self, class: ClassId, ty: TypeId, flags: FieldFlags) -> FieldId {
        let cls = &mut self.classes[class.0];
        cls.fields.push(Field {
            ty,
            flags,
            offset: 0,
        });
        FieldId {
            class,
            index: cls.fields.len() - 1,
        }
    }

    /// Appends a method to `class`.
    pub fn add_method(&mut self, class: ClassId, is_virtual: bool) -> MethodId {
        let cls = &mut self.classes[class.0];
        cls.methods.push(Method {
            is_virtual,
            virtual_offset: 0,
        });
        MethodId {
            class,
            index: cls.methods.len() - 1,
        }
    }

    /// The class behind `id`.
    #[must_use]
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    /// Number of registered classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Looks a class up by its full name.
    #[must_use]
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|cls| cls.name == name)
            .map(ClassId)
    }

    /// Looks a class up by its full name.
    ///
    /// # Panics
    ///
    /// Panics when no class of that name is registered; a miss is a
    /// programming error in the embedder.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> ClassId {
        self.find_class(name)
            .unwrap_or_else(|| panic!("class `{name}` not registered"))
    }

    /// Assigns instance-field offsets and virtual-method slots for every
    /// class and records instance sizes.
    ///
    /// The base class's full instance layout, header included, comes
    /// first; the derived class appends its own fields at their natural
    /// alignment (pointer size for references and arrays, 4 bytes for
    /// `i32`), then one pointer-aligned slot per virtual method.
    pub fn compute_sizes(&mut self) {
        for i in 0..self.classes.len() {
            let size = self.layout_instance(ClassId(i));
            self.classes[i].instance_size = size;
        }
        self.layout_done = true;
    }

    fn layout_instance(&mut self, id: ClassId) -> usize {
        let base = self.classes[id.0].base;
        let mut size = match base {
            Some(parent) => self.layout_instance(parent),
            None => size_of::<ObjectHeader>(),
        };

        let ptr_size = size_of::<usize>();
        let cls = &mut self.classes[id.0];
        for field in &mut cls.fields {
            if field.flags.is_static {
                continue;
            }
            let (field_size, field_align) = match field.ty().category() {
                TypeCategory::Array(_) | TypeCategory::Class(_) => (ptr_size, ptr_size),
                TypeCategory::Int32 => (size_of::<i32>(), size_of::<i32>()),
            };
            size = align_up(size, field_align);
            field.offset = size;
            size += field_size;
        }
        for method in &mut cls.methods {
            if !method.is_virtual() {
                continue;
            }
            size = align_up(size, ptr_size);
            method.virtual_offset = size;
            size += ptr_size;
        }
        size
    }

    /// Assigns static-field offsets and records each class's static
    /// block size. Same alignment rules as `compute_sizes`, but statics
    /// do not inherit: every class lays out only its own static fields,
    /// starting at offset 0.
    pub fn compute_static_sizes(&mut self) {
        let ptr_size = size_of::<usize>();
        for cls in &mut self.classes {
            let mut size = 0usize;
            for field in &mut cls.fields {
                if !field.flags.is_static {
                    continue;
                }
                let (field_size, field_align) = match field.ty().category() {
                    TypeCategory::Array(_) | TypeCategory::Class(_) => (ptr_size, ptr_size),
                    TypeCategory::Int32 => (size_of::<i32>(), size_of::<i32>()),
                };
                size = align_up(size, field_align);
                field.offset = size;
                size += field_size;
            }
            cls.static_size = size;
        }
    }

    /// The number of bytes `ty` occupies when stored directly in the
    /// heap: the header footprint for class objects, the array-header
    /// footprint for arrays, the scalar size for `i32`.
    #[must_use]
    pub fn measure_direct_heap_size(&self, ty: TypeId) -> usize {
        match ty.category() {
            TypeCategory::Class(_) => size_of::<ObjectHeader>(),
            TypeCategory::Array(_) => size_of::<ArrayHeader>(),
            TypeCategory::Int32 => size_of::<i32>(),
        }
    }

    /// Payload size of an array of `len` elements of `content_type`.
    #[must_use]
    pub fn measure_array_content_size(&self, content_type: TypeId, len: usize) -> usize {
        len * self.measure_direct_heap_size(content_type)
    }

    /// Formats every class's name, base, instance size and static size
    /// as a diagnostic dump.
    #[must_use]
    pub fn dump_class_layouts(&self) -> String {
        use fmt::Write as _;

        let mut out = String::new();
        for cls in &self.classes {
            let _ = writeln!(out, "class {}", cls.name);
            match cls.base {
                Some(base) => {
                    let _ = writeln!(out, "  base: {}", self.classes[base.0].name);
                }
                None => {
                    let _ = writeln!(out, "  base: none");
                }
            }
            let _ = writeln!(out, "  instance_size: {}", cls.instance_size);
            let _ = writeln!(out, "  static_size: {}", cls.static_size);
        }
        out
    }

    pub(crate) const fn layout_done(&self) -> bool {
        self.layout_done
    }

    pub(crate) const fn statics_prepared(&self) -> bool {
        self.statics_prepared
    }

    pub(crate) fn set_static_data(&mut self, id: ClassId, data: *mut u8) {
        self.classes[id.0].static_data = data;
    }

    pub(crate) fn mark_statics_prepared(&mut self) {
        self.statics_prepared = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_link() -> (TypeStore, ClassId) {
        let mut store = TypeStore::new();
        let link = store.register_class("core.Link", None);
        let link_ty = store.class_type(link);
        store.add_field(link, link_ty, FieldFlags::INSTANCE); // prev
        store.add_field(link, link_ty, FieldFlags::INSTANCE); // next
        store.add_field(link, store.int32(), FieldFlags::INSTANCE); // val
        (store, link)
    }

    #[test]
    fn canonical_types_are_pointer_identical() {
        let (store, link) = store_with_link();
        let int32 = store.int32();
        assert_eq!(store.array_of(int32), store.array_of(int32));
        assert_eq!(store.class_type(link), store.class_type(link));
        assert_ne!(store.array_of(store.array_of(int32)), store.array_of(int32));
    }

    #[test]
    fn int32_field_then_ref_field_layout() {
        // class A { i32 a; Link b; } with no base.
        let (mut store, link) = store_with_link();
        let link_ty = store.class_type(link);
        let a_cls = store.register_class("core.A", None);
        let fa = store.add_field(a_cls, store.int32(), FieldFlags::INSTANCE);
        let fb = store.add_field(a_cls, link_ty, FieldFlags::INSTANCE);
        store.compute_sizes();

        let header = size_of::<ObjectHeader>();
        let ptr = size_of::<usize>();
        let a = store.class(a_cls);
        assert_eq!(a.fields()[fa.index()].offset(), align_up(header, 4));
        let expected_b = align_up(align_up(header, 4) + 4, ptr);
        assert_eq!(a.fields()[fb.index()].offset(), expected_b);
        assert_eq!(a.instance_size(), expected_b + ptr);
    }

    #[test]
    fn derived_layout_appends_to_base() {
        let mut store = TypeStore::new();
        let base = store.register_class("core.Base", None);
        store.add_field(base, store.int32(), FieldFlags::INSTANCE);
        let derived = store.register_class("core.Derived", Some(base));
        let fd = store.add_field(derived, store.int32(), FieldFlags::INSTANCE);
        store.compute_sizes();

        let base_size = store.class(base).instance_size();
        let d = store.class(derived);
        assert!(d.instance_size() >= base_size);
        assert!(d.fields()[fd.index()].offset() >= base_size);
        assert!(d.fields()[fd.index()].offset() + 4 <= d.instance_size());
    }

    #[test]
    fn virtual_methods_reserve_pointer_slots() {
        let mut store = TypeStore::new();
        let cls = store.register_class("core.Virt", None);
        store.add_field(cls, store.int32(), FieldFlags::INSTANCE);
        let m_virt = store.add_method(cls, true);
        store.add_method(cls, false);
        store.compute_sizes();

        let ptr = size_of::<usize>();
        let c = store.class(cls);
        let slot = c.methods()[m_virt.index].virtual_offset();
        assert_eq!(slot % ptr, 0);
        assert_eq!(c.instance_size(), slot + ptr);
    }

    #[test]
    fn static_layout_is_independent_of_instances() {
        let (mut store, link) = store_with_link();
        let link_ty = store.class_type(link);
        let f_something = store.add_field(link, store.int32(), FieldFlags::STATIC);
        let f_notable = store.add_field(link, link_ty, FieldFlags::STATIC);
        store.compute_sizes();
        store.compute_static_sizes();

        let ptr = size_of::<usize>();
        let cls = store.class(link);
        assert_eq!(cls.fields()[f_something.index()].offset(), 0);
        assert_eq!(cls.fields()[f_notable.index()].offset(), ptr);
        assert_eq!(cls.static_size(), 2 * ptr);
        // Instance fields never moved past the instance size.
        for field in cls.fields() {
            if !field.flags().is_static {
                assert!(field.offset() < cls.instance_size());
            }
        }
    }

    #[test]
    fn direct_heap_sizes() {
        let (store, link) = store_with_link();
        let link_ty = store.class_type(link);
        let int32 = store.int32();
        assert_eq!(
            store.measure_direct_heap_size(link_ty),
            size_of::<ObjectHeader>()
        );
        assert_eq!(
            store.measure_direct_heap_size(store.array_of(int32)),
            size_of::<ArrayHeader>()
        );
        assert_eq!(store.measure_direct_heap_size(int32), 4);
        assert_eq!(store.measure_array_content_size(int32, 50), 200);
    }

    #[test]
    fn class_lookup() {
        let (store, link) = store_with_link();
        assert_eq!(store.find_class("core.Link"), Some(link));
        assert_eq!(store.find_class("core.Missing"), None);
        assert_eq!(store.class_by_name("core.Link"), link);
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn class_by_name_miss_panics() {
        let store = TypeStore::new();
        let _ = store.class_by_name("core.Missing");
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_class_name_panics() {
        let mut store = TypeStore::new();
        store.register_class("core.Link", None);
        store.register_class("core.Link", None);
    }

    #[test]
    fn dump_lists_every_class() {
        let (mut store, _) = store_with_link();
        store.register_class("core.Other", None);
        store.compute_sizes();
        store.compute_static_sizes();
        let dump = store.dump_class_layouts();
        assert!(dump.contains("core.Link"));
        assert!(dump.contains("core.Other"));
        assert!(dump.contains("instance_size"));
    }
}
