//! Layout and canonical-type behavior through the public API.

use std::mem::size_of;

use loam_gc::{FieldFlags, HeapConfig, ObjectHeader, Runtime};

const PTR: usize = size_of::<usize>();

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

#[test]
fn int32_then_ref_field_offsets() {
    // class A { i32 a; Link b; } with no base.
    let rt = Runtime::new(HeapConfig::default());
    let link = rt.register_class("core.Link", None);
    let link_ty = rt.class_type(link);
    let a_cls = rt.register_class("core.A", None);
    let f_a = rt.add_field(a_cls, rt.int32(), FieldFlags::INSTANCE);
    let f_b = rt.add_field(a_cls, link_ty, FieldFlags::INSTANCE);
    rt.compute_sizes();

    let header = size_of::<ObjectHeader>();
    assert_eq!(rt.field_offset(f_a), align_up(header, 4));
    let expected_b = align_up(rt.field_offset(f_a) + 4, PTR);
    assert_eq!(rt.field_offset(f_b), expected_b);
    assert_eq!(rt.instance_size(a_cls), expected_b + PTR);
}

#[test]
fn base_chain_layout_is_monotonic() {
    let rt = Runtime::new(HeapConfig::default());
    let base = rt.register_class("core.Base", None);
    rt.add_field(base, rt.int32(), FieldFlags::INSTANCE);
    let mid = rt.register_class("core.Mid", Some(base));
    rt.add_field(mid, rt.class_type(base), FieldFlags::INSTANCE);
    let leaf = rt.register_class("core.Leaf", Some(mid));
    let f_leaf = rt.add_field(leaf, rt.int32(), FieldFlags::INSTANCE);
    rt.compute_sizes();

    assert!(rt.instance_size(mid) >= rt.instance_size(base));
    assert!(rt.instance_size(leaf) >= rt.instance_size(mid));
    // The leaf's own field sits past the inherited layout and inside the
    // instance.
    assert!(rt.field_offset(f_leaf) >= rt.instance_size(mid));
    assert!(rt.field_offset(f_leaf) + 4 <= rt.instance_size(leaf));
}

#[test]
fn virtual_methods_consume_pointer_slots() {
    let rt = Runtime::new(HeapConfig::default());
    let cls = rt.register_class("core.Virt", None);
    rt.add_field(cls, rt.int32(), FieldFlags::INSTANCE);
    let m_virtual = rt.add_method(cls, true);
    rt.add_method(cls, false);
    rt.compute_sizes();

    let slot = rt.virtual_offset(m_virtual);
    assert_eq!(slot % PTR, 0);
    assert_eq!(rt.instance_size(cls), slot + PTR);
}

#[test]
fn canonical_array_types() {
    let rt = Runtime::new(HeapConfig::default());
    let link = rt.register_class("core.Link", None);
    let int32 = rt.int32();

    assert_eq!(rt.array_of(int32), rt.array_of(int32));
    assert_eq!(rt.class_type(link), rt.class_type(link));
    assert_ne!(rt.array_of(rt.array_of(int32)), rt.array_of(int32));
    assert_ne!(rt.array_of(rt.class_type(link)), rt.array_of(int32));
}

#[test]
fn static_block_layout_and_lookup() {
    let rt = Runtime::new(HeapConfig::default());
    let link = rt.register_class("core.Link", None);
    let link_ty = rt.class_type(link);
    let f_something = rt.add_field(link, rt.int32(), FieldFlags::STATIC);
    let f_notable = rt.add_field(link, link_ty, FieldFlags::STATIC);
    rt.compute_sizes();
    rt.compute_static_sizes();

    assert_eq!(rt.field_offset(f_something), 0);
    assert_eq!(rt.field_offset(f_notable), PTR);
    assert_eq!(rt.static_size(link), 2 * PTR);

    assert_eq!(rt.find_class("core.Link"), Some(link));
    assert_eq!(rt.find_class("core.Missing"), None);
    assert_eq!(rt.class_by_name("core.Link"), link);
}

#[test]
fn dump_reports_every_class() {
    let rt = Runtime::new(HeapConfig::default());
    let base = rt.register_class("core.Base", None);
    rt.register_class("core.Derived", Some(base));
    rt.compute_sizes();
    rt.compute_static_sizes();

    let dump = rt.dump_class_layouts();
    assert!(dump.contains("core.Base"));
    assert!(dump.contains("core.Derived"));
    assert!(dump.contains("instance_size"));
    assert!(dump.contains("static_size"));
}
