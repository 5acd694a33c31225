//! Instance manager: owns every instance and the process-wide coordination
//! state, and runs the consumer-thread side of the event pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use pdhost_types::{HostAudio, InstanceConfig, InstanceId};

use crate::audio_callback::{ticks_per_callback, AudioCallback, CallbackShared};
use crate::engine::PdBackend;
use crate::error::{ConfigError, InitError, ManagerError};
use crate::instance::{Instance, InstanceState};
use crate::pipeline::EventPipeline;
use crate::registry::EngineRegistry;
use crate::selection::SelectionLock;

/// Engine-wide settings applied when the engine is first initialised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Switch on the engine's own verbose mode.
    pub verbose: bool,
    /// Mirror print output into the log.
    pub verbose_print: bool,
    /// Extra directories for abstraction lookup.
    pub search_paths: Vec<PathBuf>,
    /// Used for instances whose config leaves `patch_dir` empty.
    pub default_patch_dir: Option<PathBuf>,
}

pub struct InstanceManager {
    lock: Arc<SelectionLock>,
    registry: EngineRegistry,
    pipeline: EventPipeline,
    instances: BTreeMap<InstanceId, Instance>,
    default_patch_dir: Option<PathBuf>,
    next_id: u32,
}

impl InstanceManager {
    pub fn new(backend: Arc<dyn PdBackend>) -> Result<Self, ManagerError> {
        Self::with_settings(backend, EngineSettings::default())
    }

    /// Take charge of `backend`'s engine. Only one manager may drive an
    /// engine at a time; a second one fails with `EngineInUse` until the
    /// first is dropped.
    pub fn with_settings(backend: Arc<dyn PdBackend>, settings: EngineSettings) -> Result<Self, ManagerError> {
        let mut registry = backend
            .registry_slot()
            .claim()
            .ok_or(ManagerError::EngineInUse)?;
        registry.set_verbose(settings.verbose);
        for dir in &settings.search_paths {
            registry.add_search_path(dir);
        }
        Ok(Self {
            lock: Arc::new(SelectionLock::new(backend)),
            registry,
            pipeline: EventPipeline::new(settings.verbose_print),
            instances: BTreeMap::new(),
            default_patch_dir: settings.default_patch_dir,
            next_id: 1,
        })
    }

    /// Create an instance running `config.patch`.
    ///
    /// Configuration errors return `Err` before anything native happens.
    /// Engine failures do not: the instance is created in `AudioFailed` or
    /// `PatchFailed`, stays inert, and is never registered.
    pub fn create(&mut self, mut config: InstanceConfig, host: HostAudio) -> Result<InstanceId, ManagerError> {
        if config.patch.trim().is_empty() {
            return Err(ConfigError::EmptyPatchName.into());
        }
        if host.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate.into());
        }
        if config.patch_dir.as_os_str().is_empty() {
            if let Some(dir) = &self.default_patch_dir {
                config.patch_dir = dir.clone();
            }
        }

        let block_size = self.lock.acquire().block_size();
        let ticks = ticks_per_callback(host.buffer_frames, block_size)?;

        let sink = self.pipeline.sink();
        let init = {
            let engine = self.lock.acquire();
            if !self.registry.is_initialized() && !config.patch_dir.as_os_str().is_empty() {
                self.registry.add_search_path(&config.patch_dir);
            }
            self.registry.ensure_initialized(&*engine, sink)
        };

        let id = InstanceId::new(self.next_id);
        self.next_id += 1;
        let shared = CallbackShared::new(ticks, block_size, host.buffer_frames, host.sample_rate);
        let mut instance = Instance::new(id, config, shared, self.lock.clone());

        match init {
            Ok(()) => instance.start(host.sample_rate),
            Err(InitError::NativeInitFailed(code)) => {
                warn!(target: "pd::registry", "engine init reported {}; starting {} anyway", code, instance.name());
                instance.start(host.sample_rate);
            }
            Err(InitError::AlreadyReleased) => {
                warn!(
                    target: "pd::registry",
                    "cannot start {}: the engine has already been released",
                    instance.name()
                );
                instance.fail_audio();
            }
        }

        if instance.state() == InstanceState::Running {
            self.registry.register(id);
            info!(target: "pd::instance", "{} created as instance {} ({} ticks per callback)", instance.name(), id, ticks);
        }
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Tear an instance down and drop it. The engine is released when the
    /// last registered instance goes.
    pub fn destroy(&mut self, id: InstanceId) -> Result<(), ManagerError> {
        let instance = self
            .instances
            .remove(&id)
            .ok_or(ManagerError::UnknownInstance(id))?;
        self.teardown(instance);
        Ok(())
    }

    /// Destroy every instance, newest first.
    pub fn destroy_all(&mut self) {
        while let Some((_, instance)) = self.instances.pop_last() {
            self.teardown(instance);
        }
    }

    fn teardown(&mut self, mut instance: Instance) {
        instance.shutdown();
        let engine = self.lock.acquire();
        self.registry.unregister(&*engine, instance.id());
    }

    /// Drain the engine if some instance is registered, and deliver the
    /// results. Returns the number of events dispatched.
    pub fn update(&mut self) -> usize {
        match self.registry.drain_owner() {
            Some(_) => self.drain(),
            None => 0,
        }
    }

    /// Per-instance update: only the current drain owner drains; for every
    /// other instance this does nothing.
    pub fn update_for(&mut self, id: InstanceId) -> usize {
        if self.registry.is_drain_owner(id) {
            self.drain()
        } else {
            0
        }
    }

    fn drain(&mut self) -> usize {
        {
            let engine = self.lock.acquire();
            engine.receive_messages();
        }
        let events = self.pipeline.collect();
        if events.is_empty() {
            return 0;
        }
        self.pipeline
            .dispatch(&events, &mut self.instances, self.registry.active())
    }

    pub fn audio_callback(&self, id: InstanceId) -> Option<AudioCallback> {
        self.instances.get(&id).map(Instance::audio_callback)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(&id)
    }

    /// All instances, running or failed, in creation order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Registered (running) instances in registration order.
    pub fn active(&self) -> &[InstanceId] {
        self.registry.active()
    }

    pub fn drain_owner(&self) -> Option<InstanceId> {
        self.registry.drain_owner()
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn set_verbose_print(&self, on: bool) {
        self.pipeline.set_verbose_print(on);
    }

    pub fn verbose_print(&self) -> bool {
        self.pipeline.verbose_print()
    }
}

impl Drop for InstanceManager {
    fn drop(&mut self) {
        self.destroy_all();
        let registry = std::mem::take(&mut self.registry);
        self.lock.acquire().registry_slot().restore(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TestBackend, TestOp};

    fn manager() -> (Arc<TestBackend>, InstanceManager) {
        let backend = Arc::new(TestBackend::new());
        let manager = InstanceManager::new(backend.clone()).unwrap();
        (backend, manager)
    }

    fn config(patch: &str) -> InstanceConfig {
        InstanceConfig::new(patch, patch, "/patches")
    }

    #[test]
    fn empty_patch_name_is_rejected_before_native_work() {
        let (backend, mut mgr) = manager();
        assert!(matches!(
            mgr.create(config(""), HostAudio::default()),
            Err(ManagerError::Config(ConfigError::EmptyPatchName))
        ));
        assert!(backend.operations().is_empty());
    }

    #[test]
    fn bad_tick_ratio_allocates_nothing() {
        let (backend, mut mgr) = manager();
        let host = HostAudio { sample_rate: 48_000, buffer_frames: 100 };
        assert!(matches!(
            mgr.create(config("a"), host),
            Err(ManagerError::Config(ConfigError::TickRatio { .. }))
        ));
        assert!(backend.operations().is_empty());
        assert!(mgr.is_empty());
    }

    #[test]
    fn default_patch_dir_fills_empty_config() {
        let backend = Arc::new(TestBackend::new());
        let settings = EngineSettings {
            default_patch_dir: Some("/default".into()),
            ..EngineSettings::default()
        };
        let mut mgr = InstanceManager::with_settings(backend.clone(), settings).unwrap();
        let id = mgr
            .create(InstanceConfig::new("a", "a", ""), HostAudio::default())
            .unwrap();
        assert_eq!(mgr.instance(id).unwrap().config().patch_dir, PathBuf::from("/default"));
        assert!(backend
            .operations()
            .contains(&TestOp::AddSearchPath("/default".into())));
    }

    #[test]
    fn drop_destroys_everything() {
        let (backend, mut mgr) = manager();
        mgr.create(config("a"), HostAudio::default()).unwrap();
        mgr.create(config("b"), HostAudio::default()).unwrap();
        drop(mgr);
        assert_eq!(backend.live_instances(), 0);
        assert_eq!(backend.count(|op| *op == TestOp::Release), 1);
    }

    #[test]
    fn unknown_instance_destroy_errors() {
        let (_backend, mut mgr) = manager();
        assert!(matches!(
            mgr.destroy(InstanceId::new(42)),
            Err(ManagerError::UnknownInstance(_))
        ));
    }

    #[test]
    fn destroy_all_goes_newest_first_and_releases_once() {
        let (backend, mut mgr) = manager();
        mgr.create(config("a"), HostAudio::default()).unwrap();
        mgr.create(config("b"), HostAudio::default()).unwrap();
        backend.clear();

        mgr.destroy_all();
        assert!(mgr.is_empty());
        assert!(mgr.active().is_empty());
        let closed: Vec<TestOp> = backend
            .operations()
            .into_iter()
            .filter(|op| matches!(op, TestOp::ClosePatch(_)))
            .collect();
        assert_eq!(closed.len(), 2);
        assert!(matches!((&closed[0], &closed[1]), (TestOp::ClosePatch(b), TestOp::ClosePatch(a)) if b.0 > a.0));
        assert_eq!(backend.count(|op| *op == TestOp::Release), 1);
    }

    #[test]
    fn second_manager_on_same_engine_is_refused() {
        let (backend, _mgr) = manager();
        assert!(matches!(
            InstanceManager::new(backend.clone()),
            Err(ManagerError::EngineInUse)
        ));
    }
}
