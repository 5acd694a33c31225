//! Serialized access to the engine's "current instance".
//!
//! The engine keeps one process-wide current instance and every per-instance
//! native call acts on it. Any select-then-act sequence must therefore run
//! under a single process mutex, from the consumer thread and the audio
//! thread alike. [`SelectionLock::acquire`] returns an [`EngineGuard`] that
//! derefs to the backend and releases the mutex when dropped.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::engine::{PdBackend, RawInstance};

/// How long acquisition may spin before it is treated as a deadlock.
pub const DEADLOCK_WINDOW: Duration = Duration::from_secs(2);

/// The process mutex guarding instance selection.
pub struct SelectionLock {
    backend: Arc<dyn PdBackend>,
    mutex: Mutex<()>,
}

/// Exclusive access to the engine. Dropping it releases the lock.
pub struct EngineGuard<'a> {
    backend: &'a Arc<dyn PdBackend>,
    _held: MutexGuard<'a, ()>,
}

impl Deref for EngineGuard<'_> {
    type Target = dyn PdBackend;

    fn deref(&self) -> &Self::Target {
        &**self.backend
    }
}

impl SelectionLock {
    pub fn new(backend: Arc<dyn PdBackend>) -> Self {
        Self {
            backend,
            mutex: Mutex::new(()),
        }
    }

    /// Take the lock, spinning until it is free.
    ///
    /// A poisoned lock is recovered: the guarded state is the engine's, not
    /// ours. Panics if the lock stays held for longer than
    /// [`DEADLOCK_WINDOW`], which only happens when a holder never releases.
    pub fn acquire(&self) -> EngineGuard<'_> {
        let mut started: Option<Instant> = None;
        loop {
            match self.mutex.try_lock() {
                Ok(held) => return self.guard(held),
                Err(TryLockError::Poisoned(poisoned)) => return self.guard(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    let since = *started.get_or_insert_with(Instant::now);
                    if since.elapsed() > DEADLOCK_WINDOW {
                        panic!("engine selection lock held for more than {:?}", DEADLOCK_WINDOW);
                    }
                    thread::yield_now();
                }
            }
        }
    }

    /// Acquire the lock and make `instance` current.
    pub fn select(&self, instance: RawInstance) -> EngineGuard<'_> {
        let guard = self.acquire();
        guard.set_instance(instance);
        guard
    }

    fn guard<'a>(&'a self, held: MutexGuard<'a, ()>) -> EngineGuard<'a> {
        EngineGuard {
            backend: &self.backend,
            _held: held,
        }
    }
}
