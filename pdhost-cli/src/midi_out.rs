use std::sync::{Arc, Mutex};

use midir::{MidiOutput, MidiOutputConnection};
use pdhost_audio::{Instance, PdEvent};

/// Information about an available MIDI output port
#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

pub fn list_ports() -> Vec<MidiPortInfo> {
    let Ok(midi_out) = MidiOutput::new("pdhost") else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect()
}

/// Forwards MIDI produced by patches to a hardware or virtual port.
#[derive(Clone)]
pub struct MidiForwarder {
    connection: Arc<Mutex<MidiOutputConnection>>,
    port_name: String,
}

impl MidiForwarder {
    pub fn connect(port_index: usize) -> Result<Self, String> {
        let midi_out = MidiOutput::new("pdhost").map_err(|e| e.to_string())?;
        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| format!("Invalid port index: {}", port_index))?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());
        let connection = midi_out
            .connect(port, "pdhost-output")
            .map_err(|e| e.to_string())?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Forward every MIDI event `instance` receives.
    pub fn attach(&self, instance: &mut Instance) {
        let connection = self.connection.clone();
        let label = instance.name().to_string();
        instance.subscribers_mut().on_event(move |event| {
            let PdEvent::Midi(midi) = event else {
                return;
            };
            let Ok(mut conn) = connection.lock() else {
                return;
            };
            if let Err(e) = conn.send(&midi.to_bytes()) {
                log::warn!(target: "midi", "{}: could not forward {:?}: {}", label, midi, e);
            }
        });
    }
}
