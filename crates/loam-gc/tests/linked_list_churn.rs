//! Linked-list churn: repeatedly build a large local list, validate it,
//! drop it, and let allocation pressure collect the garbage.

use loam_gc::{FieldFlags, HeapConfig, ObjRef, Runtime, TypeId};

const OUTER: usize = 100;
const NODES: i32 = 3_000;

struct LinkWorld {
    rt: Runtime,
    link_ty: TypeId,
    o_prev: usize,
    o_next: usize,
    o_val: usize,
}

fn link_world() -> LinkWorld {
    let rt = Runtime::new(HeapConfig::default());
    let class = rt.register_class("core.Link", None);
    let link_ty = rt.class_type(class);
    let f_prev = rt.add_field(class, link_ty, FieldFlags::INSTANCE);
    let f_next = rt.add_field(class, link_ty, FieldFlags::INSTANCE);
    let f_val = rt.add_field(class, rt.int32(), FieldFlags::INSTANCE);
    rt.compute_sizes();
    rt.compute_static_sizes();
    rt.prepare_static_fields();
    let (o_prev, o_next, o_val) = (
        rt.field_offset(f_prev),
        rt.field_offset(f_next),
        rt.field_offset(f_val),
    );
    LinkWorld {
        rt,
        link_ty,
        o_prev,
        o_next,
        o_val,
    }
}

fn build_list(world: &LinkWorld, nodes: i32) -> ObjRef {
    let mut first = None;
    let mut prev: Option<ObjRef> = None;
    for j in 0..nodes {
        let node = world.rt.alloc_class(world.link_ty);
        unsafe {
            node.write_ref(world.o_prev, prev);
            if let Some(p) = prev {
                p.write_ref(world.o_next, Some(node));
            }
            node.write_i32(world.o_val, j + 1);
        }
        if first.is_none() {
            first = Some(node);
        }
        prev = Some(node);
    }
    first.expect("list is non-empty")
}

fn verify_list(world: &LinkWorld, first: ObjRef, nodes: i32) {
    let mut expected = 1;
    let mut cursor = Some(first);
    while let Some(node) = cursor {
        let val = unsafe { node.read_i32(world.o_val) };
        assert_eq!(val, expected, "node {expected} holds a wrong value");
        expected += 1;
        cursor = unsafe { node.read_ref(world.o_next) };
    }
    assert_eq!(expected, nodes + 1, "list has a wrong length");
}

#[test]
fn list_churn_survives_collections() {
    let world = link_world();
    world.rt.attach(|| {
        for _ in 0..OUTER {
            let first = build_list(&world, NODES);
            verify_list(&world, first, NODES);
        }
        // The live set is one list at a time; the heap must settle
        // instead of growing with every iteration. Conservative
        // retention can keep a handful of stale lists alive, but not
        // dozens.
        let live_bytes = NODES as usize * world.rt.instance_size(world.rt.class_by_name("core.Link"));
        let bound = 8 * live_bytes / HeapConfig::DEFAULT_SEGMENT_SIZE + 16;
        assert!(
            world.rt.segment_count() <= bound,
            "heap grew unboundedly: {} segments (bound {bound})",
            world.rt.segment_count()
        );
    });
}

#[test]
fn list_traversal_after_explicit_collections() {
    let world = link_world();
    world.rt.attach(|| {
        let first = build_list(&world, 500);
        for _ in 0..3 {
            world.rt.force_gc();
        }
        verify_list(&world, first, 500);
        std::hint::black_box(first);
    });
}

#[test]
fn prev_links_stay_consistent() {
    let world = link_world();
    world.rt.attach(|| {
        let first = build_list(&world, 100);
        world.rt.force_gc();
        // Walk forward to the tail, then back via prev.
        let mut tail = first;
        while let Some(next) = unsafe { tail.read_ref(world.o_next) } {
            tail = next;
        }
        let mut count = 1;
        let mut cursor = tail;
        while let Some(prev) = unsafe { cursor.read_ref(world.o_prev) } {
            cursor = prev;
            count += 1;
        }
        assert_eq!(count, 100);
        assert_eq!(cursor, first);
    });
}
