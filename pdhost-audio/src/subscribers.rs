//! Per-instance event subscriptions.
//!
//! Each event kind has its own ordered list of callbacks. Callbacks run on the
//! consumer thread during a drain, in registration order, never on the audio
//! thread.

use pdhost_types::{AtomList, EventKind, MidiEvent, PdEvent};

type TextHandler = Box<dyn FnMut(&str) + Send>;
type FloatHandler = Box<dyn FnMut(&str, f32) + Send>;
type SymbolHandler = Box<dyn FnMut(&str, &str) + Send>;
type ListHandler = Box<dyn FnMut(&str, &AtomList) + Send>;
type MessageHandler = Box<dyn FnMut(&str, &str, &AtomList) + Send>;
type Midi2Handler = Box<dyn FnMut(i32, i32) + Send>;
type Midi3Handler = Box<dyn FnMut(i32, i32, i32) + Send>;
type EventHandler = Box<dyn FnMut(&PdEvent) + Send>;

/// Callbacks registered on one instance.
#[derive(Default)]
pub struct EventSubscribers {
    print: Vec<TextHandler>,
    bang: Vec<TextHandler>,
    float: Vec<FloatHandler>,
    symbol: Vec<SymbolHandler>,
    list: Vec<ListHandler>,
    message: Vec<MessageHandler>,
    note_on: Vec<Midi3Handler>,
    control_change: Vec<Midi3Handler>,
    program_change: Vec<Midi2Handler>,
    pitch_bend: Vec<Midi2Handler>,
    aftertouch: Vec<Midi2Handler>,
    poly_aftertouch: Vec<Midi3Handler>,
    midi_byte: Vec<Midi2Handler>,
    any: Vec<EventHandler>,
}

impl EventSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `f(text)` for every print line.
    pub fn on_print(&mut self, f: impl FnMut(&str) + Send + 'static) {
        self.print.push(Box::new(f));
    }

    /// `f(source)`
    pub fn on_bang(&mut self, f: impl FnMut(&str) + Send + 'static) {
        self.bang.push(Box::new(f));
    }

    /// `f(source, value)`
    pub fn on_float(&mut self, f: impl FnMut(&str, f32) + Send + 'static) {
        self.float.push(Box::new(f));
    }

    /// `f(source, symbol)`
    pub fn on_symbol(&mut self, f: impl FnMut(&str, &str) + Send + 'static) {
        self.symbol.push(Box::new(f));
    }

    /// `f(source, atoms)`
    pub fn on_list(&mut self, f: impl FnMut(&str, &AtomList) + Send + 'static) {
        self.list.push(Box::new(f));
    }

    /// `f(source, selector, atoms)`
    pub fn on_message(&mut self, f: impl FnMut(&str, &str, &AtomList) + Send + 'static) {
        self.message.push(Box::new(f));
    }

    /// `f(channel, pitch, velocity)`
    pub fn on_note_on(&mut self, f: impl FnMut(i32, i32, i32) + Send + 'static) {
        self.note_on.push(Box::new(f));
    }

    /// `f(channel, controller, value)`
    pub fn on_control_change(&mut self, f: impl FnMut(i32, i32, i32) + Send + 'static) {
        self.control_change.push(Box::new(f));
    }

    /// `f(channel, program)`
    pub fn on_program_change(&mut self, f: impl FnMut(i32, i32) + Send + 'static) {
        self.program_change.push(Box::new(f));
    }

    /// `f(channel, value)`
    pub fn on_pitch_bend(&mut self, f: impl FnMut(i32, i32) + Send + 'static) {
        self.pitch_bend.push(Box::new(f));
    }

    /// `f(channel, value)`
    pub fn on_aftertouch(&mut self, f: impl FnMut(i32, i32) + Send + 'static) {
        self.aftertouch.push(Box::new(f));
    }

    /// `f(channel, pitch, value)`
    pub fn on_poly_aftertouch(&mut self, f: impl FnMut(i32, i32, i32) + Send + 'static) {
        self.poly_aftertouch.push(Box::new(f));
    }

    /// `f(port, byte)`
    pub fn on_midi_byte(&mut self, f: impl FnMut(i32, i32) + Send + 'static) {
        self.midi_byte.push(Box::new(f));
    }

    /// Called for every event of every kind, after the kind-specific callbacks.
    pub fn on_event(&mut self, f: impl FnMut(&PdEvent) + Send + 'static) {
        self.any.push(Box::new(f));
    }

    pub fn len(&self) -> usize {
        self.print.len()
            + self.bang.len()
            + self.float.len()
            + self.symbol.len()
            + self.list.len()
            + self.message.len()
            + self.note_on.len()
            + self.control_change.len()
            + self.program_change.len()
            + self.pitch_bend.len()
            + self.aftertouch.len()
            + self.poly_aftertouch.len()
            + self.midi_byte.len()
            + self.any.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of callbacks an event of `kind` reaches, catch-all ones included.
    pub fn subscribed(&self, kind: EventKind) -> usize {
        let specific = match kind {
            EventKind::Print => self.print.len(),
            EventKind::Bang => self.bang.len(),
            EventKind::Float => self.float.len(),
            EventKind::Symbol => self.symbol.len(),
            EventKind::List => self.list.len(),
            EventKind::Message => self.message.len(),
            EventKind::NoteOn => self.note_on.len(),
            EventKind::ControlChange => self.control_change.len(),
            EventKind::ProgramChange => self.program_change.len(),
            EventKind::PitchBend => self.pitch_bend.len(),
            EventKind::Aftertouch => self.aftertouch.len(),
            EventKind::PolyAftertouch => self.poly_aftertouch.len(),
            EventKind::MidiByte => self.midi_byte.len(),
        };
        specific + self.any.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Invoke every callback subscribed to this event's kind. Returns the
    /// number of callbacks run.
    pub fn deliver(&mut self, event: &PdEvent) -> usize {
        if self.subscribed(event.kind()) == 0 {
            return 0;
        }
        let mut ran = match event {
            PdEvent::Print(text) => run(&mut self.print, |f| f(text)),
            PdEvent::Bang { source } => run(&mut self.bang, |f| f(source)),
            PdEvent::Float { source, value } => run(&mut self.float, |f| f(source, *value)),
            PdEvent::Symbol { source, value } => run(&mut self.symbol, |f| f(source, value)),
            PdEvent::List { source, args } => run(&mut self.list, |f| f(source, args)),
            PdEvent::Message { source, selector, args } => {
                run(&mut self.message, |f| f(source, selector, args))
            }
            PdEvent::Midi(midi) => match *midi {
                MidiEvent::NoteOn { channel, pitch, velocity } => {
                    run(&mut self.note_on, |f| f(channel, pitch, velocity))
                }
                MidiEvent::ControlChange { channel, controller, value } => {
                    run(&mut self.control_change, |f| f(channel, controller, value))
                }
                MidiEvent::ProgramChange { channel, program } => {
                    run(&mut self.program_change, |f| f(channel, program))
                }
                MidiEvent::PitchBend { channel, value } => run(&mut self.pitch_bend, |f| f(channel, value)),
                MidiEvent::Aftertouch { channel, value } => run(&mut self.aftertouch, |f| f(channel, value)),
                MidiEvent::PolyAftertouch { channel, pitch, value } => {
                    run(&mut self.poly_aftertouch, |f| f(channel, pitch, value))
                }
                MidiEvent::Byte { port, value } => run(&mut self.midi_byte, |f| f(port, value)),
            },
        };
        ran += run(&mut self.any, |f| f(event));
        ran
    }
}

fn run<H>(handlers: &mut Vec<H>, mut call: impl FnMut(&mut H)) -> usize {
    for handler in handlers.iter_mut() {
        call(handler);
    }
    handlers.len()
}
