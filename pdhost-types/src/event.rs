//! Events emitted by a running patch.
//!
//! Events are produced while the engine's queues are drained and delivered to
//! application subscribers on the consumer thread. The engine does not tag
//! events with the instance that produced them.

use serde::{Deserialize, Serialize};

use crate::atom::AtomList;

/// MIDI output from a patch. Channels are 0-based; libpd encodes the port in
/// the upper bits (channel = port * 16 + channel-on-port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiEvent {
    NoteOn { channel: i32, pitch: i32, velocity: i32 },
    ControlChange { channel: i32, controller: i32, value: i32 },
    ProgramChange { channel: i32, program: i32 },
    /// Pitch bend value: -8192 (full down) to +8191 (full up), 0 = center
    PitchBend { channel: i32, value: i32 },
    Aftertouch { channel: i32, value: i32 },
    PolyAftertouch { channel: i32, pitch: i32, value: i32 },
    Byte { port: i32, value: i32 },
}

impl MidiEvent {
    /// Raw MIDI bytes for this event, for forwarding to a hardware port.
    pub fn to_bytes(&self) -> Vec<u8> {
        let status = |kind: u8, channel: i32| kind | (channel & 0x0F) as u8;
        let data = |v: i32| v.clamp(0, 127) as u8;
        match *self {
            MidiEvent::NoteOn { channel, pitch, velocity } => {
                vec![status(0x90, channel), data(pitch), data(velocity)]
            }
            MidiEvent::ControlChange { channel, controller, value } => {
                vec![status(0xB0, channel), data(controller), data(value)]
            }
            MidiEvent::ProgramChange { channel, program } => {
                vec![status(0xC0, channel), data(program)]
            }
            MidiEvent::PitchBend { channel, value } => {
                let raw = (value + 8192).clamp(0, 16383) as u16;
                vec![status(0xE0, channel), (raw & 0x7F) as u8, (raw >> 7) as u8]
            }
            MidiEvent::Aftertouch { channel, value } => {
                vec![status(0xD0, channel), data(value)]
            }
            MidiEvent::PolyAftertouch { channel, pitch, value } => {
                vec![status(0xA0, channel), data(pitch), data(value)]
            }
            MidiEvent::Byte { value, .. } => vec![(value & 0xFF) as u8],
        }
    }
}

/// One event produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PdEvent {
    Print(String),
    Bang { source: String },
    Float { source: String, value: f32 },
    Symbol { source: String, value: String },
    List { source: String, args: AtomList },
    Message { source: String, selector: String, args: AtomList },
    Midi(MidiEvent),
}

/// Subscription channel an event is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Print,
    Bang,
    Float,
    Symbol,
    List,
    Message,
    NoteOn,
    ControlChange,
    ProgramChange,
    PitchBend,
    Aftertouch,
    PolyAftertouch,
    MidiByte,
}

impl PdEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PdEvent::Print(_) => EventKind::Print,
            PdEvent::Bang { .. } => EventKind::Bang,
            PdEvent::Float { .. } => EventKind::Float,
            PdEvent::Symbol { .. } => EventKind::Symbol,
            PdEvent::List { .. } => EventKind::List,
            PdEvent::Message { .. } => EventKind::Message,
            PdEvent::Midi(midi) => match midi {
                MidiEvent::NoteOn { .. } => EventKind::NoteOn,
                MidiEvent::ControlChange { .. } => EventKind::ControlChange,
                MidiEvent::ProgramChange { .. } => EventKind::ProgramChange,
                MidiEvent::PitchBend { .. } => EventKind::PitchBend,
                MidiEvent::Aftertouch { .. } => EventKind::Aftertouch,
                MidiEvent::PolyAftertouch { .. } => EventKind::PolyAftertouch,
                MidiEvent::Byte { .. } => EventKind::MidiByte,
            },
        }
    }

    /// The bound symbol (or print text source) an event arrived on, if any.
    pub fn source(&self) -> Option<&str> {
        match self {
            PdEvent::Bang { source }
            | PdEvent::Float { source, .. }
            | PdEvent::Symbol { source, .. }
            | PdEvent::List { source, .. }
            | PdEvent::Message { source, .. } => Some(source),
            PdEvent::Print(_) | PdEvent::Midi(_) => None,
        }
    }
}
