//! Error types for the coordination layer.

use std::path::PathBuf;

use pdhost_types::InstanceId;

use crate::instance::InstanceState;

/// Failure to bring up the process-wide engine.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("libpd_queued_init returned {0}")]
    NativeInitFailed(i32),
    #[error("the engine was released when the last instance was destroyed")]
    AlreadyReleased,
}

/// Invalid instance or host audio configuration, detected before any native
/// allocation takes place.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("patch name is empty")]
    EmptyPatchName,
    #[error("host sample rate is zero")]
    ZeroSampleRate,
    #[error("engine reported a block size of zero")]
    ZeroBlockSize,
    #[error("host buffer of {host_frames} frames is not a whole multiple of the {block_size}-frame engine block")]
    TickRatio { host_frames: u32, block_size: u32 },
}

/// Failures of outgoing sends, MIDI and array access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SendError {
    #[error("list and message sends need at least one argument")]
    EmptyArguments,
    #[error("{0} arguments have no atom representation")]
    UnsupportedArgType(&'static str),
    #[error("no receiver named '{0}'")]
    ReceiverNotFound(String),
    #[error("could not open a message buffer of {0} atoms")]
    MessageBuffer(usize),
    #[error("send to '{0}' failed")]
    SendFailed(String),
    #[error("midi {kind} rejected (error {code})")]
    MidiRejected { kind: &'static str, code: i32 },
    #[error("array '{name}' access failed (error {code})")]
    ArrayAccess { name: String, code: i32 },
    #[error("instance is {0:?}")]
    Unavailable(InstanceState),
}

/// Failures of per-instance binding operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstanceError {
    #[error("'{0}' is already bound on this instance")]
    DuplicateBinding(String),
    #[error("'{0}' is not bound on this instance")]
    UnknownBinding(String),
    #[error("engine refused to bind '{0}'")]
    BindFailed(String),
    #[error("instance is {0:?}")]
    Unavailable(InstanceState),
}

/// Failures surfaced by the instance manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no instance with id {0}")]
    UnknownInstance(InstanceId),
    #[error("the engine is already driven by another instance manager")]
    EngineInUse,
}

/// Failure to load the native library.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("{path} has no symbol {name}: {source}")]
    Symbol {
        path: PathBuf,
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

/// Failure to find or open an audio output device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("output device '{0}' not found")]
    UnknownDevice(String),
    #[error("could not query device config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error("could not enumerate devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("could not build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("could not start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}
