//! Event pipeline: engine hooks to application subscribers.
//!
//! The engine's hooks are process-wide and only fire while its queues are
//! being drained. Each hook is a thin trampoline that builds a [`PdEvent`] and
//! pushes it through a [`HookSink`] into an unbounded FIFO channel. After a
//! drain the consumer thread collects the channel and fans every event out to
//! every active instance. The engine does not say which instance produced an
//! event, so every instance sees every event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use pdhost_types::{InstanceId, MidiEvent, PdEvent};

use crate::codec::{decode_atom_list, AtomReader};
use crate::instance::Instance;

/// Producer end of the pipeline, handed to the engine's hook trampolines.
#[derive(Clone)]
pub struct HookSink {
    tx: Sender<PdEvent>,
}

impl HookSink {
    fn push(&self, event: PdEvent) {
        // The receiver lives as long as the pipeline; a send after it is gone
        // has nobody left to deliver to.
        let _ = self.tx.send(event);
    }

    pub fn print(&self, text: &str) {
        let line = text.trim_end_matches('\n');
        if !line.is_empty() {
            self.push(PdEvent::Print(line.to_string()));
        }
    }

    pub fn bang(&self, source: &str) {
        self.push(PdEvent::Bang { source: source.to_string() });
    }

    pub fn float(&self, source: &str, value: f32) {
        self.push(PdEvent::Float { source: source.to_string(), value });
    }

    pub fn symbol(&self, source: &str, value: &str) {
        self.push(PdEvent::Symbol {
            source: source.to_string(),
            value: value.to_string(),
        });
    }

    pub fn list(&self, source: &str, atoms: &mut dyn AtomReader, count: usize) {
        self.push(PdEvent::List {
            source: source.to_string(),
            args: decode_atom_list(atoms, count),
        });
    }

    pub fn message(&self, source: &str, selector: &str, atoms: &mut dyn AtomReader, count: usize) {
        self.push(PdEvent::Message {
            source: source.to_string(),
            selector: selector.to_string(),
            args: decode_atom_list(atoms, count),
        });
    }

    pub fn note_on(&self, channel: i32, pitch: i32, velocity: i32) {
        self.push(PdEvent::Midi(MidiEvent::NoteOn { channel, pitch, velocity }));
    }

    pub fn control_change(&self, channel: i32, controller: i32, value: i32) {
        self.push(PdEvent::Midi(MidiEvent::ControlChange { channel, controller, value }));
    }

    pub fn program_change(&self, channel: i32, program: i32) {
        self.push(PdEvent::Midi(MidiEvent::ProgramChange { channel, program }));
    }

    pub fn pitch_bend(&self, channel: i32, value: i32) {
        self.push(PdEvent::Midi(MidiEvent::PitchBend { channel, value }));
    }

    pub fn aftertouch(&self, channel: i32, value: i32) {
        self.push(PdEvent::Midi(MidiEvent::Aftertouch { channel, value }));
    }

    pub fn poly_aftertouch(&self, channel: i32, pitch: i32, value: i32) {
        self.push(PdEvent::Midi(MidiEvent::PolyAftertouch { channel, pitch, value }));
    }

    pub fn midi_byte(&self, port: i32, value: i32) {
        self.push(PdEvent::Midi(MidiEvent::Byte { port, value }));
    }
}

/// Consumer end of the pipeline.
pub struct EventPipeline {
    tx: Sender<PdEvent>,
    rx: Receiver<PdEvent>,
    verbose_print: Arc<AtomicBool>,
}

impl EventPipeline {
    pub fn new(verbose_print: bool) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            verbose_print: Arc::new(AtomicBool::new(verbose_print)),
        }
    }

    pub fn sink(&self) -> HookSink {
        HookSink { tx: self.tx.clone() }
    }

    /// Mirror engine print output into the log under `pd::print`.
    pub fn set_verbose_print(&self, on: bool) {
        self.verbose_print.store(on, Ordering::Relaxed);
    }

    pub fn verbose_print(&self) -> bool {
        self.verbose_print.load(Ordering::Relaxed)
    }

    /// Take every event queued so far, oldest first.
    pub fn collect(&self) -> Vec<PdEvent> {
        self.rx.try_iter().collect()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Deliver `events` to each instance in `order` (registration order),
    /// preserving event order. Instances missing from the map are skipped.
    /// Returns the number of events dispatched.
    pub fn dispatch(
        &self,
        events: &[PdEvent],
        instances: &mut BTreeMap<InstanceId, Instance>,
        order: &[InstanceId],
    ) -> usize {
        let mut targets: Vec<_> = instances
            .iter_mut()
            .filter_map(|(id, instance)| {
                order
                    .iter()
                    .position(|o| o == id)
                    .map(|pos| (pos, instance))
            })
            .collect();
        targets.sort_by_key(|(pos, _)| *pos);

        let verbose = self.verbose_print();
        for event in events {
            if let PdEvent::Print(text) = event {
                if verbose {
                    info!(target: "pd::print", "{}", text);
                }
            }
            for (_, instance) in targets.iter_mut() {
                instance.subscribers_mut().deliver(event);
            }
        }
        if !events.is_empty() {
            debug!(
                target: "pd::pipeline",
                "dispatched {} events to {} instances",
                events.len(),
                targets.len()
            );
        }
        events.len()
    }
}
