//! Stop-the-world behavior with multiple mutator threads: roots on a
//! suspended thread's stack survive collections triggered elsewhere, and
//! parallel allocation churn stays consistent.

use std::sync::{mpsc, Arc};
use std::thread;

use loam_gc::{FieldFlags, HeapConfig, ObjRef, Runtime, TypeId};

struct World {
    rt: Arc<Runtime>,
    link_ty: TypeId,
    o_next: usize,
    o_val: usize,
}

fn world() -> World {
    let rt = Arc::new(Runtime::new(HeapConfig::default()));
    let link = rt.register_class("core.Link", None);
    let link_ty = rt.class_type(link);
    let f_next = rt.add_field(link, link_ty, FieldFlags::INSTANCE);
    let f_val = rt.add_field(link, rt.int32(), FieldFlags::INSTANCE);
    rt.compute_sizes();
    rt.compute_static_sizes();
    rt.prepare_static_fields();
    let (o_next, o_val) = (rt.field_offset(f_next), rt.field_offset(f_val));
    World {
        rt,
        link_ty,
        o_next,
        o_val,
    }
}

fn build_chain(world: &World, len: i32) -> ObjRef {
    let mut head = None;
    for i in (0..len).rev() {
        let node = world.rt.alloc_class(world.link_ty);
        unsafe {
            node.write_i32(world.o_val, i);
            node.write_ref(world.o_next, head);
        }
        head = Some(node);
    }
    head.expect("chain is non-empty")
}

fn verify_chain(world: &World, head: ObjRef, len: i32) {
    let mut cursor = Some(head);
    let mut expected = 0;
    while let Some(node) = cursor {
        assert_eq!(unsafe { node.read_i32(world.o_val) }, expected);
        expected += 1;
        cursor = unsafe { node.read_ref(world.o_next) };
    }
    assert_eq!(expected, len);
}

#[test]
fn roots_on_suspended_thread_stack_survive() {
    let world = world();
    let (ready_tx, ready_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();

    let worker = {
        let world = World {
            rt: Arc::clone(&world.rt),
            link_ty: world.link_ty,
            o_next: world.o_next,
            o_val: world.o_val,
        };
        thread::spawn(move || {
            world.rt.attach(|| {
                // The only references to this chain live on this stack
                // while the thread sits parked in recv().
                let head = build_chain(&world, 300);
                ready_tx.send(()).expect("main thread is alive");
                resume_rx.recv().expect("main thread signals resume");
                verify_chain(&world, head, 300);
                std::hint::black_box(head);
            });
        })
    };

    ready_rx.recv().expect("worker built its chain");

    // Collect, repeatedly, while the worker is suspended. Its stack
    // must be scanned via the world stop.
    world.rt.attach(|| {
        for _ in 0..5 {
            let churn = build_chain(&world, 200);
            std::hint::black_box(churn);
            world.rt.force_gc();
        }
    });

    resume_tx.send(()).expect("worker is alive");
    worker.join().expect("worker verified its chain");
}

#[test]
fn parallel_allocation_churn() {
    let world = world();
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let world = World {
                rt: Arc::clone(&world.rt),
                link_ty: world.link_ty,
                o_next: world.o_next,
                o_val: world.o_val,
            };
            thread::spawn(move || {
                world.rt.attach(|| {
                    for round in 0..10 {
                        let len = 200 + (t * 37 + round) as i32 % 100;
                        let head = build_chain(&world, len);
                        verify_chain(&world, head, len);
                    }
                });
            })
        })
        .collect();

    for handle in threads {
        handle.join().expect("mutator thread panicked");
    }

    // All threads detached again; a final collection from the main
    // thread must still work.
    world.rt.attach(|| {
        world.rt.force_gc();
    });
}
