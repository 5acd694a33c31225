//! Instance creation, destruction, and engine lifetime.

mod common;

use common::{config, create, manager, releases, HOST};
use pdhost_audio::engine::TestOp;
use pdhost_audio::{
    ConfigError, HostAudio, InstanceError, InstanceManager, InstanceState, ManagerError, SendError,
};

#[test]
fn engine_initialises_once_for_many_instances() {
    let (backend, mut mgr) = manager();
    create(&mut mgr, "a");
    create(&mut mgr, "b");
    create(&mut mgr, "c");
    assert_eq!(backend.count(|op| *op == TestOp::Init), 1);
    assert_eq!(backend.count(|op| *op == TestOp::InstallHooks), 1);
    assert_eq!(mgr.active().len(), 3);
}

#[test]
fn active_set_tracks_create_and_destroy() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");

    backend.fail_patch(true);
    let broken = create(&mut mgr, "broken");
    backend.fail_patch(false);
    assert_eq!(mgr.instance(broken).unwrap().state(), InstanceState::PatchFailed);

    let c = create(&mut mgr, "c");
    assert_eq!(mgr.active(), &[a, b, c]);

    mgr.destroy(b).unwrap();
    assert_eq!(mgr.active(), &[a, c]);
    mgr.destroy(broken).unwrap();
    assert_eq!(mgr.active(), &[a, c]);
    assert_eq!(releases(&backend), 0);

    mgr.destroy(a).unwrap();
    assert_eq!(releases(&backend), 0);
    mgr.destroy(c).unwrap();
    assert_eq!(releases(&backend), 1);
    assert!(mgr.active().is_empty());
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn release_happens_once_even_with_drop() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    mgr.destroy(a).unwrap();
    drop(mgr);
    assert_eq!(releases(&backend), 1);
}

#[test]
fn create_after_release_is_audio_failed() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    mgr.destroy(a).unwrap();

    let late = create(&mut mgr, "late");
    assert_eq!(mgr.instance(late).unwrap().state(), InstanceState::AudioFailed);
    assert!(mgr.active().is_empty());
    assert_eq!(backend.count(|op| matches!(op, TestOp::NewInstance(_))), 1);
}

#[test]
fn native_init_failure_is_not_fatal() {
    let (backend, mut mgr) = manager();
    backend.set_init_code(-1);
    let a = create(&mut mgr, "a");
    assert_eq!(mgr.instance(a).unwrap().state(), InstanceState::Running);
}

#[test]
fn audio_failure_is_terminal_and_unregistered() {
    let (backend, mut mgr) = manager();
    backend.fail_audio(true);
    let a = create(&mut mgr, "a");
    let inst = mgr.instance(a).unwrap();
    assert_eq!(inst.state(), InstanceState::AudioFailed);
    assert!(mgr.active().is_empty());
    assert_eq!(mgr.drain_owner(), None);
    assert_eq!(backend.live_instances(), 0);
}

#[test]
fn failed_instance_operations_are_inert() {
    let (backend, mut mgr) = manager();
    backend.fail_patch(true);
    let a = create(&mut mgr, "a");
    backend.clear();

    let inst = mgr.instance_mut(a).unwrap();
    assert_eq!(
        inst.send_float("x", 1.0),
        Err(SendError::Unavailable(InstanceState::PatchFailed))
    );
    assert_eq!(
        inst.send_note_on(0, 60, 100),
        Err(SendError::Unavailable(InstanceState::PatchFailed))
    );
    assert_eq!(
        inst.bind("x"),
        Err(InstanceError::Unavailable(InstanceState::PatchFailed))
    );
    assert_eq!(inst.dollar_zero(), None);
    assert!(backend.operations().is_empty());
}

#[test]
fn tick_ratio_rejected_at_creation() {
    let (backend, mut mgr) = manager();
    let host = HostAudio {
        sample_rate: 48_000,
        buffer_frames: 96,
    };
    let err = mgr.create(config("a"), host).unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Config(ConfigError::TickRatio {
            host_frames: 96,
            block_size: 64
        })
    ));
    assert!(mgr.is_empty());
    assert!(backend.operations().is_empty());
}

#[test]
fn zero_sample_rate_rejected() {
    let (_backend, mut mgr) = manager();
    let host = HostAudio {
        sample_rate: 0,
        buffer_frames: 256,
    };
    assert!(matches!(
        mgr.create(config("a"), host),
        Err(ManagerError::Config(ConfigError::ZeroSampleRate))
    ));
}

#[test]
fn ticks_follow_host_buffer() {
    let (_backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    assert_eq!(mgr.instance(a).unwrap().ticks_per_callback(), HOST.buffer_frames / 64);
}

#[test]
fn destroy_unbinds_before_closing_patch() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    {
        let inst = mgr.instance_mut(a).unwrap();
        inst.bind("freq").unwrap();
        inst.bind("gain").unwrap();
    }
    backend.clear();
    mgr.destroy(a).unwrap();

    let ops = backend.operations();
    let last_unbind = ops
        .iter()
        .rposition(|op| matches!(op, TestOp::Unbind { .. }))
        .unwrap();
    let close = ops
        .iter()
        .position(|op| matches!(op, TestOp::ClosePatch(_)))
        .unwrap();
    let free = ops
        .iter()
        .position(|op| matches!(op, TestOp::FreeInstance(_)))
        .unwrap();
    let dsp_off = ops
        .iter()
        .position(|op| matches!(op, TestOp::FinishMessage { selector, .. } if selector == "dsp"))
        .unwrap();
    assert!(dsp_off < last_unbind);
    assert!(last_unbind < close);
    assert!(close < free);
    assert_eq!(backend.count(|op| matches!(op, TestOp::Unbind { .. })), 2);
}

#[test]
fn bind_unbind_bind_again() {
    let (_backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let inst = mgr.instance_mut(a).unwrap();
    inst.bind("x").unwrap();
    assert_eq!(inst.bind("x"), Err(InstanceError::DuplicateBinding("x".into())));
    inst.unbind("x").unwrap();
    assert_eq!(inst.unbind("x"), Err(InstanceError::UnknownBinding("x".into())));
    inst.bind("x").unwrap();
    assert!(inst.is_bound("x"));
}

#[test]
fn bindings_are_per_instance() {
    let (_backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");
    mgr.instance_mut(a).unwrap().bind("x").unwrap();
    mgr.instance_mut(b).unwrap().bind("x").unwrap();
    assert!(mgr.instance(a).unwrap().is_bound("x"));
    assert!(mgr.instance(b).unwrap().is_bound("x"));
}

#[test]
fn sends_select_their_own_instance() {
    let (backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");
    backend.clear();

    mgr.instance(b).unwrap().send_bang("go").unwrap();
    mgr.instance(a).unwrap().send_bang("go").unwrap();

    let targets: Vec<_> = backend
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            TestOp::SendBang { instance, .. } => instance,
            _ => None,
        })
        .collect();
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1]);
}

#[test]
fn dollar_zero_is_unique_per_instance() {
    let (_backend, mut mgr) = manager();
    let a = create(&mut mgr, "a");
    let b = create(&mut mgr, "b");
    let dz_a = mgr.instance(a).unwrap().dollar_zero().unwrap();
    let dz_b = mgr.instance(b).unwrap().dollar_zero().unwrap();
    assert_ne!(dz_a, dz_b);
    assert_eq!(mgr.instance(a).unwrap().dollar_zero(), Some(dz_a));
}

#[test]
fn one_manager_per_engine_and_lifecycle_outlives_it() {
    let (backend, mut first) = manager();
    let a = create(&mut first, "a");

    assert!(matches!(
        InstanceManager::new(backend.clone()),
        Err(ManagerError::EngineInUse)
    ));
    assert_eq!(first.instance(a).unwrap().state(), InstanceState::Running);
    assert_eq!(releases(&backend), 0);

    drop(first);
    assert_eq!(releases(&backend), 1);

    let mut second = InstanceManager::new(backend.clone()).unwrap();
    let late = create(&mut second, "late");
    assert_eq!(second.instance(late).unwrap().state(), InstanceState::AudioFailed);
    drop(second);

    assert_eq!(backend.count(|op| *op == TestOp::Init), 1);
    assert_eq!(releases(&backend), 1);
}

#[test]
fn unused_manager_leaves_engine_untouched() {
    let (backend, first) = manager();
    drop(first);
    let mut second = InstanceManager::new(backend.clone()).unwrap();
    let a = create(&mut second, "a");
    assert_eq!(second.instance(a).unwrap().state(), InstanceState::Running);
    assert_eq!(backend.count(|op| *op == TestOp::Init), 1);
}
