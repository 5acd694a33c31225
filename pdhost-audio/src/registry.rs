//! Process-wide engine lifecycle.
//!
//! The engine is initialised once, when the first instance is created, and
//! released once, when the last registered instance is destroyed. The
//! registry also tracks which instances are active and elects the one whose
//! update drains the engine's shared queues.
//!
//! The registry's home is a [`RegistrySlot`] owned by the engine itself, so
//! its state lasts as long as the engine does. An instance manager takes the
//! registry out of the slot for its lifetime and puts it back when dropped;
//! while it is out, no other manager can drive the same engine.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{debug, info, warn};
use pdhost_types::InstanceId;

use crate::engine::{HookInstall, PdBackend};
use crate::error::InitError;
use crate::pipeline::HookSink;

pub struct EngineRegistry {
    initialized: bool,
    hooks_installed: bool,
    released: bool,
    /// Registered instances, oldest first.
    active: Vec<InstanceId>,
    drain_owner: Option<InstanceId>,
    search_paths: Vec<PathBuf>,
    verbose: bool,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            initialized: false,
            hooks_installed: false,
            released: false,
            active: Vec::new(),
            drain_owner: None,
            search_paths: Vec::new(),
            verbose: false,
        }
    }

    /// Queue a directory for the engine's search path. Directories added
    /// after initialisation are passed straight through by the caller.
    pub fn add_search_path(&mut self, dir: &Path) {
        if !self.search_paths.iter().any(|p| p == dir) {
            self.search_paths.push(dir.to_path_buf());
        }
    }

    /// Whether the engine's own verbose mode is switched on at init.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Install hooks and initialise the engine, once per process.
    ///
    /// Hooks go in before init. A non-zero init code is logged and returned
    /// as `NativeInitFailed`; the engine is still marked initialised, so the
    /// caller may carry on and later calls return `Ok`. After the engine has
    /// been released this always fails with `AlreadyReleased`.
    pub fn ensure_initialized(&mut self, engine: &dyn PdBackend, sink: HookSink) -> Result<(), InitError> {
        if self.released {
            return Err(InitError::AlreadyReleased);
        }
        if self.initialized {
            return Ok(());
        }

        match engine.install_hooks(sink) {
            HookInstall::Installed => debug!(target: "pd::registry", "event hooks installed"),
            HookInstall::AlreadyInstalled => {
                debug!(target: "pd::registry", "event hooks already present in this process")
            }
        }
        self.hooks_installed = true;

        let code = engine.init();
        self.initialized = true;
        engine.set_verbose(self.verbose);
        for dir in &self.search_paths {
            engine.add_to_search_path(dir);
        }

        if code != 0 {
            warn!(target: "pd::registry", "engine init returned {}; continuing", code);
            return Err(InitError::NativeInitFailed(code));
        }
        info!(target: "pd::registry", "engine initialised");
        Ok(())
    }

    /// Add an instance to the active set. The first registrant becomes the
    /// drain owner.
    pub fn register(&mut self, id: InstanceId) {
        if self.active.contains(&id) {
            return;
        }
        self.active.push(id);
        if self.drain_owner.is_none() {
            self.drain_owner = Some(id);
            debug!(target: "pd::registry", "instance {} now drains events", id);
        }
    }

    /// Remove an instance from the active set, hand drain ownership to the
    /// oldest remaining instance, and release the engine if the set is now
    /// empty. Returns true if the engine was released.
    pub fn unregister(&mut self, engine: &dyn PdBackend, id: InstanceId) -> bool {
        self.active.retain(|&a| a != id);
        if self.drain_owner == Some(id) {
            self.drain_owner = self.active.first().copied();
            if let Some(next) = self.drain_owner {
                debug!(target: "pd::registry", "instance {} now drains events", next);
            }
        }
        self.release_if_last(engine)
    }

    /// Release the engine if no instance is registered. Happens at most once
    /// per process.
    pub fn release_if_last(&mut self, engine: &dyn PdBackend) -> bool {
        if !self.active.is_empty() || !self.initialized || self.released {
            return false;
        }
        engine.release();
        self.released = true;
        info!(target: "pd::registry", "engine released");
        true
    }

    pub fn is_drain_owner(&self, id: InstanceId) -> bool {
        self.drain_owner == Some(id)
    }

    pub fn drain_owner(&self) -> Option<InstanceId> {
        self.drain_owner
    }

    pub fn active(&self) -> &[InstanceId] {
        &self.active
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn hooks_installed(&self) -> bool {
        self.hooks_installed
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Where an engine keeps its registry while no manager holds it.
pub struct RegistrySlot {
    registry: Mutex<Option<EngineRegistry>>,
}

impl Default for RegistrySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrySlot {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Some(EngineRegistry::new())),
        }
    }

    /// Take the registry, or `None` if a manager already holds it.
    pub fn claim(&self) -> Option<EngineRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Hand the registry back, lifecycle flags intact.
    pub fn restore(&self, registry: EngineRegistry) {
        *self.registry.lock().unwrap_or_else(PoisonError::into_inner) = Some(registry);
    }

    pub fn is_claimed(&self) -> bool {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TestBackend, TestOp};
    use crate::pipeline::EventPipeline;

    fn id(n: u32) -> InstanceId {
        InstanceId::new(n)
    }

    #[test]
    fn initializes_once_hooks_first() {
        let backend = TestBackend::new();
        let pipeline = EventPipeline::new(false);
        let mut reg = EngineRegistry::new();
        reg.add_search_path(Path::new("/patches"));

        reg.ensure_initialized(&backend, pipeline.sink()).unwrap();
        reg.ensure_initialized(&backend, pipeline.sink()).unwrap();

        let ops = backend.operations();
        assert_eq!(ops[0], TestOp::InstallHooks);
        assert_eq!(ops[1], TestOp::Init);
        assert_eq!(backend.count(|op| *op == TestOp::Init), 1);
        assert!(ops.contains(&TestOp::AddSearchPath("/patches".into())));
        assert!(reg.hooks_installed());
    }

    #[test]
    fn native_failure_is_reported_then_tolerated() {
        let backend = TestBackend::new();
        backend.set_init_code(-1);
        let pipeline = EventPipeline::new(false);
        let mut reg = EngineRegistry::new();

        assert!(matches!(
            reg.ensure_initialized(&backend, pipeline.sink()),
            Err(InitError::NativeInitFailed(-1))
        ));
        assert!(reg.is_initialized());
        assert!(reg.ensure_initialized(&backend, pipeline.sink()).is_ok());
    }

    #[test]
    fn first_registrant_owns_drain() {
        let mut reg = EngineRegistry::new();
        reg.register(id(1));
        reg.register(id(2));
        reg.register(id(1));
        assert_eq!(reg.active(), &[id(1), id(2)]);
        assert!(reg.is_drain_owner(id(1)));
        assert!(!reg.is_drain_owner(id(2)));
    }

    #[test]
    fn ownership_passes_to_oldest_remaining() {
        let backend = TestBackend::new();
        let mut reg = EngineRegistry::new();
        for n in 1..=3 {
            reg.register(id(n));
        }
        assert!(!reg.unregister(&backend, id(1)));
        assert_eq!(reg.drain_owner(), Some(id(2)));
        assert!(!reg.unregister(&backend, id(3)));
        assert_eq!(reg.drain_owner(), Some(id(2)));
    }

    #[test]
    fn releases_exactly_once_when_empty() {
        let backend = TestBackend::new();
        let pipeline = EventPipeline::new(false);
        let mut reg = EngineRegistry::new();
        reg.ensure_initialized(&backend, pipeline.sink()).unwrap();
        reg.register(id(1));
        reg.register(id(2));

        assert!(!reg.unregister(&backend, id(1)));
        assert!(reg.unregister(&backend, id(2)));
        assert!(!reg.release_if_last(&backend));
        assert_eq!(backend.count(|op| *op == TestOp::Release), 1);
        assert_eq!(reg.drain_owner(), None);
    }

    #[test]
    fn no_init_after_release() {
        let backend = TestBackend::new();
        let pipeline = EventPipeline::new(false);
        let mut reg = EngineRegistry::new();
        reg.ensure_initialized(&backend, pipeline.sink()).unwrap();
        reg.register(id(1));
        reg.unregister(&backend, id(1));
        assert!(matches!(
            reg.ensure_initialized(&backend, pipeline.sink()),
            Err(InitError::AlreadyReleased)
        ));
    }

    #[test]
    fn never_released_before_init() {
        let backend = TestBackend::new();
        let mut reg = EngineRegistry::new();
        assert!(!reg.release_if_last(&backend));
        assert_eq!(backend.count(|op| *op == TestOp::Release), 0);
    }

    #[test]
    fn slot_hands_out_one_registry_and_keeps_its_state() {
        let backend = TestBackend::new();
        let pipeline = EventPipeline::new(false);
        let slot = RegistrySlot::new();

        let mut reg = slot.claim().unwrap();
        assert!(slot.is_claimed());
        assert!(slot.claim().is_none());

        reg.ensure_initialized(&backend, pipeline.sink()).unwrap();
        reg.register(id(1));
        reg.unregister(&backend, id(1));
        slot.restore(reg);
        assert!(!slot.is_claimed());

        let mut reg = slot.claim().unwrap();
        assert!(reg.is_released());
        assert!(matches!(
            reg.ensure_initialized(&backend, pipeline.sink()),
            Err(InitError::AlreadyReleased)
        ));
        assert_eq!(backend.count(|op| *op == TestOp::Init), 1);
    }
}
