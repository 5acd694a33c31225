//! # pdhost-audio
//!
//! Runs several independent libpd instances in one process.
//!
//! libpd keeps a single "current instance" and a single set of event hooks
//! for the whole process. This crate layers per-instance objects on top:
//!
//! - [`InstanceManager`] creates and destroys [`Instance`]s, initialising the
//!   engine with the first and releasing it after the last.
//! - A [`SelectionLock`](selection::SelectionLock) serialises every
//!   select-then-act sequence, from the consumer and audio threads alike.
//! - Engine events flow through an [`EventPipeline`] and are fanned out to
//!   every active instance's [`EventSubscribers`] on the consumer thread.
//! - An [`AudioCallback`] drives one instance from the host's audio thread.

pub mod audio_callback;
pub mod codec;
pub mod config;
pub mod devices;
pub mod engine;
pub mod error;
pub mod instance;
pub mod manager;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod registry;
pub mod selection;
pub mod subscribers;
pub mod telemetry;

pub use audio_callback::{ticks_per_callback, AudioCallback};
pub use config::Config;
pub use engine::{LibPdBackend, PdBackend, TestBackend};
pub use error::{BackendError, ConfigError, DeviceError, InitError, InstanceError, ManagerError, SendError};
pub use instance::{Instance, InstanceState};
pub use manager::{EngineSettings, InstanceManager};
pub use pipeline::EventPipeline;
pub use registry::EngineRegistry;
pub use subscribers::EventSubscribers;
pub use telemetry::TelemetrySummary;

pub use pdhost_types::{Arg, Atom, AtomList, EventKind, HostAudio, InstanceConfig, InstanceId, MidiEvent, PdEvent};
