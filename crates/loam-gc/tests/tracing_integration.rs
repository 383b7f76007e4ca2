//! Smoke test for the `tracing` feature: collections emit spans without
//! disturbing collector behavior.

#![cfg(feature = "tracing")]

use loam_gc::{FieldFlags, HeapConfig, Runtime};

#[test]
fn collections_emit_spans() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();

    let rt = Runtime::new(HeapConfig::default());
    let link = rt.register_class("core.Link", None);
    let link_ty = rt.class_type(link);
    let f_val = rt.add_field(link, rt.int32(), FieldFlags::INSTANCE);
    rt.compute_sizes();
    rt.compute_static_sizes();
    let o_val = rt.field_offset(f_val);

    rt.attach(|| {
        let node = rt.alloc_class(link_ty);
        unsafe { node.write_i32(o_val, 5) };
        rt.force_gc();
        assert_eq!(unsafe { node.read_i32(o_val) }, 5);
        assert_eq!(rt.last_gc_metrics().total_collections, 1);
        std::hint::black_box(node);
    });
}
