//! Event fan-out and drain ownership.

mod common;

use std::sync::{Arc, Mutex};

use common::{create, manager, record_events};
use pdhost_audio::engine::{TestAtom, TestEvent, TestOp};
use pdhost_audio::{Atom, PdEvent};

#[test]
fn every_subscriber_sees_each_bang_once() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");

    let seen = Arc::new(Mutex::new(Vec::new()));
    for id in [a, b] {
        let seen = seen.clone();
        mgr.instance_mut(id)
            .unwrap()
            .subscribers_mut()
            .on_bang(move |src| seen.lock().unwrap().push((id, src.to_string())));
    }

    backend.emit_bang("x");
    assert_eq!(mgr.update(), 1);

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![(a, "x".to_string()), (b, "x".to_string())]);
}

#[test]
fn events_arrive_in_enqueue_order() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let log = record_events(&mut mgr, a);

    backend.emit_float("f", 1.0);
    backend.emit_bang("b");
    backend.emit(TestEvent::List(
        "l".into(),
        vec![TestAtom::Float(2.0), TestAtom::Symbol("two".into())],
    ));
    backend.emit(TestEvent::NoteOn(0, 60, 100));
    mgr.update();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 4);
    assert!(matches!(&log[0], PdEvent::Float { source, value } if source == "f" && *value == 1.0));
    assert!(matches!(&log[1], PdEvent::Bang { source } if source == "b"));
    match &log[2] {
        PdEvent::List { source, args } => {
            assert_eq!(source, "l");
            assert_eq!(args[0], Atom::Float(2.0));
            assert_eq!(args[1], Atom::Symbol("two".into()));
        }
        other => panic!("expected a list, got {:?}", other),
    }
    assert!(matches!(&log[3], PdEvent::Midi(_)));
}

#[test]
fn only_drain_owner_drains() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");
    assert_eq!(mgr.drain_owner(), Some(a));

    backend.emit_bang("x");
    backend.clear();
    assert_eq!(mgr.update_for(b), 0);
    assert_eq!(backend.count(|op| *op == TestOp::ReceiveMessages), 0);

    assert_eq!(mgr.update_for(a), 1);
    assert_eq!(backend.count(|op| *op == TestOp::ReceiveMessages), 1);
}

#[test]
fn drain_ownership_passes_to_oldest_survivor() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");
    let c = create(&mut mgr, "c");

    mgr.destroy(a).unwrap();
    assert_eq!(mgr.drain_owner(), Some(b));

    let log = record_events(&mut mgr, c);
    backend.emit_bang("x");
    assert_eq!(mgr.update_for(b), 1);
    assert_eq!(log.lock().unwrap().len(), 1);

    mgr.destroy(b).unwrap();
    assert_eq!(mgr.drain_owner(), Some(c));
    mgr.destroy(c).unwrap();
    assert_eq!(mgr.drain_owner(), None);
}

#[test]
fn failed_instances_receive_nothing() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    backend.fail_patch(true);
    let broken = create(&mut mgr, "broken");

    let good = record_events(&mut mgr, a);
    let bad = record_events(&mut mgr, broken);
    backend.emit_bang("x");
    mgr.update();

    assert_eq!(good.lock().unwrap().len(), 1);
    assert!(bad.lock().unwrap().is_empty());
}

#[test]
fn update_without_instances_is_a_no_op() {
    let (backend, mut mgr) = manager();
    assert_eq!(mgr.update(), 0);
    assert!(backend.operations().is_empty());
}

#[test]
fn print_events_reach_subscribers_in_both_modes() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let prints = Arc::new(Mutex::new(Vec::new()));
    let sink = prints.clone();
    mgr.instance_mut(a)
        .unwrap()
        .subscribers_mut()
        .on_print(move |text| sink.lock().unwrap().push(text.to_string()));

    mgr.set_verbose_print(false);
    assert!(!mgr.verbose_print());
    backend.emit_print("hello\n");
    mgr.update();

    mgr.set_verbose_print(true);
    backend.emit_print("again");
    backend.emit_print("\n");
    mgr.update();

    assert_eq!(*prints.lock().unwrap(), vec!["hello".to_string(), "again".to_string()]);
}

#[test]
fn events_queued_after_destroy_go_to_survivors() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");
    let log_b = record_events(&mut mgr, b);

    backend.emit_bang("x");
    mgr.destroy(a).unwrap();
    mgr.update();
    assert_eq!(log_b.lock().unwrap().len(), 1);
}
