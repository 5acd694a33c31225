#![allow(dead_code)]
//! Test harness utilities for pdhost-audio integration tests.

use std::sync::{Arc, Mutex};

use pdhost_audio::engine::{TestBackend, TestOp};
use pdhost_audio::{HostAudio, InstanceConfig, InstanceId, InstanceManager, PdEvent};

/// 256-frame host buffer at 48 kHz: four 64-frame engine blocks.
pub const HOST: HostAudio = HostAudio {
    sample_rate: 48_000,
    buffer_frames: 256,
};

/// A manager over a fresh recording backend.
pub fn manager() -> (Arc<TestBackend>, InstanceManager) {
    let backend = Arc::new(TestBackend::new());
    let manager = InstanceManager::new(backend.clone()).expect("fresh engine");
    (backend, manager)
}

pub fn config(patch: &str) -> InstanceConfig {
    InstanceConfig::new(patch, patch, "/patches")
}

/// Create a running instance, panicking if creation is rejected.
pub fn create(manager: &mut InstanceManager, patch: &str) -> InstanceId {
    manager
        .create(config(patch), HOST)
        .unwrap_or_else(|e| panic!("creating {} failed: {}", patch, e))
}

/// Record every event delivered to `id` into a shared log.
pub fn record_events(manager: &mut InstanceManager, id: InstanceId) -> Arc<Mutex<Vec<PdEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    manager
        .instance_mut(id)
        .expect("instance exists")
        .subscribers_mut()
        .on_event(move |event| sink.lock().unwrap().push(event.clone()));
    log
}

pub fn count_ops(backend: &TestBackend, f: impl Fn(&TestOp) -> bool) -> usize {
    backend.count(f)
}

pub fn releases(backend: &TestBackend) -> usize {
    backend.count(|op| *op == TestOp::Release)
}
