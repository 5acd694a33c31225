//! # pdhost-types
//!
//! Plain data shared between the pdhost coordination layer and application code:
//! atoms and outgoing arguments, the events a patch can emit, and the
//! per-instance configuration.

mod atom;
mod event;
mod instance;

pub use atom::{Arg, Atom, AtomList};
pub use event::{EventKind, MidiEvent, PdEvent};
pub use instance::InstanceConfig;

/// Input channels every instance is initialised with.
pub const CHANNELS_IN: u32 = 2;

/// Output channels every instance is initialised with.
pub const CHANNELS_OUT: u32 = 2;

/// Unique identifier for an engine instance, assigned by the instance manager.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct InstanceId(u32);

impl InstanceId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audio settings reported by the host's audio subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HostAudio {
    pub sample_rate: u32,
    /// Frames per channel delivered to each audio callback.
    pub buffer_frames: u32,
}

impl Default for HostAudio {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_frames: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_roundtrips_through_display() {
        let id = InstanceId::new(7);
        assert_eq!(id.get(), 7);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn instance_ids_order_by_value() {
        assert!(InstanceId::new(1) < InstanceId::new(2));
    }
}
