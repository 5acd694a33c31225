//! Engine backend trait: a thin, call-for-call abstraction over the libpd C API.
//!
//! `PdBackend` mirrors the native entry points the coordination layer needs,
//! including their integer status codes. Every call that touches per-instance
//! state acts on whichever instance was last passed to `set_instance`, so
//! callers must hold the selection lock across select-then-act sequences.
//! `TestBackend` records operations and simulates the engine for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::codec::AtomReader;
use crate::pipeline::HookSink;
use crate::registry::RegistrySlot;

/// Opaque native instance handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawInstance(pub usize);

/// Opaque handle to an open patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPatch(pub usize);

/// Opaque handle to a symbol binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBinding(pub usize);

/// Outcome of installing the event hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookInstall {
    Installed,
    /// Hooks were installed earlier in this process and cannot be replaced.
    AlreadyInstalled,
}

/// Outgoing MIDI, one variant per native send function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiOut {
    NoteOn { channel: i32, pitch: i32, velocity: i32 },
    ControlChange { channel: i32, controller: i32, value: i32 },
    ProgramChange { channel: i32, program: i32 },
    PitchBend { channel: i32, value: i32 },
    Aftertouch { channel: i32, value: i32 },
    PolyAftertouch { channel: i32, pitch: i32, value: i32 },
    Byte { port: i32, value: i32 },
    Sysex { port: i32, value: i32 },
    SysRealtime { port: i32, value: i32 },
}

impl MidiOut {
    pub fn kind(&self) -> &'static str {
        match self {
            MidiOut::NoteOn { .. } => "note on",
            MidiOut::ControlChange { .. } => "control change",
            MidiOut::ProgramChange { .. } => "program change",
            MidiOut::PitchBend { .. } => "pitch bend",
            MidiOut::Aftertouch { .. } => "aftertouch",
            MidiOut::PolyAftertouch { .. } => "poly aftertouch",
            MidiOut::Byte { .. } => "byte",
            MidiOut::Sysex { .. } => "sysex",
            MidiOut::SysRealtime { .. } => "sys realtime",
        }
    }
}

/// Native engine operations.
///
/// Status codes follow libpd: zero is success, anything else is failure.
pub trait PdBackend: Send + Sync {
    // Process-wide lifecycle

    /// Home of the engine's registry between managers.
    fn registry_slot(&self) -> &RegistrySlot;

    /// Install the queued event hooks. Must precede `init`.
    fn install_hooks(&self, sink: HookSink) -> HookInstall;
    fn init(&self) -> i32;
    fn release(&self);
    fn set_verbose(&self, verbose: bool);
    fn add_to_search_path(&self, dir: &Path);
    /// Drain the engine's message and MIDI queues into the installed hooks.
    fn receive_messages(&self);

    // Instances

    fn new_instance(&self) -> Option<RawInstance>;
    fn set_instance(&self, instance: RawInstance);
    fn free_instance(&self, instance: RawInstance);
    fn init_audio(&self, in_channels: u32, out_channels: u32, sample_rate: u32) -> i32;
    fn block_size(&self) -> u32;
    /// Run `ticks` engine blocks over an interleaved buffer in place.
    fn process_in_place(&self, ticks: u32, buffer: &mut [f32]) -> i32;

    // Patches and bindings

    fn open_patch(&self, file_name: &str, dir: &Path) -> Option<RawPatch>;
    fn close_patch(&self, patch: RawPatch);
    fn dollar_zero(&self, patch: RawPatch) -> i32;
    fn bind(&self, symbol: &str) -> Option<RawBinding>;
    fn unbind(&self, binding: RawBinding);

    // Sends

    fn send_bang(&self, receiver: &str) -> i32;
    fn send_float(&self, receiver: &str, value: f32) -> i32;
    fn send_symbol(&self, receiver: &str, symbol: &str) -> i32;
    fn start_message(&self, max_len: usize) -> i32;
    fn add_float(&self, value: f32);
    fn add_symbol(&self, symbol: &str);
    fn finish_list(&self, receiver: &str) -> i32;
    fn finish_message(&self, receiver: &str, selector: &str) -> i32;
    fn send_midi(&self, msg: MidiOut) -> i32;

    // Arrays

    /// Size of a named array, or a negative code if it does not exist.
    fn array_size(&self, name: &str) -> i32;
    fn read_array(&self, dest: &mut [f32], name: &str, offset: usize) -> i32;
    fn write_array(&self, name: &str, offset: usize, src: &[f32]) -> i32;
}

// ─── Test Backend ───────────────────────────────────────────────────

/// An atom as held in the simulated engine's message buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TestAtom {
    Float(f32),
    Symbol(String),
    /// An atom type the coordination layer does not understand.
    Pointer,
}

/// Walks a slice of `TestAtom`s the way the native atom reader walks a
/// `t_atom` array.
pub struct SliceAtoms<'a> {
    atoms: &'a [TestAtom],
    pos: usize,
}

impl<'a> SliceAtoms<'a> {
    pub fn new(atoms: &'a [TestAtom]) -> Self {
        Self { atoms, pos: 0 }
    }

    fn current(&self) -> Option<&TestAtom> {
        self.atoms.get(self.pos)
    }
}

impl AtomReader for SliceAtoms<'_> {
    fn is_float(&self) -> bool {
        matches!(self.current(), Some(TestAtom::Float(_)))
    }

    fn is_symbol(&self) -> bool {
        matches!(self.current(), Some(TestAtom::Symbol(_)))
    }

    fn float(&self) -> f32 {
        match self.current() {
            Some(TestAtom::Float(v)) => *v,
            _ => 0.0,
        }
    }

    fn symbol(&self) -> String {
        match self.current() {
            Some(TestAtom::Symbol(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

/// Something the simulated engine will emit on the next `receive_messages`.
#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    Print(String),
    Bang(String),
    Float(String, f32),
    Symbol(String, String),
    List(String, Vec<TestAtom>),
    Message(String, String, Vec<TestAtom>),
    NoteOn(i32, i32, i32),
    ControlChange(i32, i32, i32),
    ProgramChange(i32, i32),
    PitchBend(i32, i32),
    Aftertouch(i32, i32),
    PolyAftertouch(i32, i32, i32),
    MidiByte(i32, i32),
}

/// An operation recorded by `TestBackend` for assertion in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOp {
    InstallHooks,
    Init,
    Release,
    SetVerbose(bool),
    AddSearchPath(PathBuf),
    ReceiveMessages,
    NewInstance(RawInstance),
    SetInstance(RawInstance),
    FreeInstance(RawInstance),
    InitAudio {
        instance: Option<RawInstance>,
        in_channels: u32,
        out_channels: u32,
        sample_rate: u32,
    },
    Process {
        instance: Option<RawInstance>,
        ticks: u32,
        len: usize,
    },
    OpenPatch {
        instance: Option<RawInstance>,
        file_name: String,
        dir: PathBuf,
    },
    ClosePatch(RawPatch),
    Bind {
        instance: Option<RawInstance>,
        symbol: String,
    },
    Unbind {
        instance: Option<RawInstance>,
        symbol: String,
    },
    SendBang {
        instance: Option<RawInstance>,
        receiver: String,
    },
    SendFloat {
        instance: Option<RawInstance>,
        receiver: String,
        value: f32,
    },
    SendSymbol {
        instance: Option<RawInstance>,
        receiver: String,
        symbol: String,
    },
    FinishList {
        instance: Option<RawInstance>,
        receiver: String,
        atoms: Vec<TestAtom>,
    },
    FinishMessage {
        instance: Option<RawInstance>,
        receiver: String,
        selector: String,
        atoms: Vec<TestAtom>,
    },
    Midi {
        instance: Option<RawInstance>,
        msg: MidiOut,
    },
    ReadArray {
        name: String,
        offset: usize,
        len: usize,
    },
    WriteArray {
        name: String,
        offset: usize,
        values: Vec<f32>,
    },
}

#[derive(Default)]
struct TestEngine {
    ops: Vec<TestOp>,
    hooks: Option<HookSink>,
    next_handle: usize,
    current: Option<RawInstance>,
    live: HashSet<RawInstance>,
    patches: HashMap<RawPatch, (RawInstance, i32)>,
    bindings: HashMap<RawBinding, (RawInstance, String)>,
    message: Option<(usize, Vec<TestAtom>)>,
    pending: VecDeque<TestEvent>,
    arrays: HashMap<String, Vec<f32>>,
    missing_receivers: HashSet<String>,
    init_code: i32,
    block_size: u32,
    fail_new_instance: bool,
    fail_audio: bool,
    fail_patch: bool,
}

impl TestEngine {
    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn reaches(&self, receiver: &str) -> bool {
        !self.missing_receivers.contains(receiver)
    }
}

/// A test backend that records all operations and simulates just enough of
/// the engine to exercise the coordination layer: instance selection,
/// patch and binding handles, the message buffer, arrays, and queued events.
/// Every receiver exists unless marked missing. Uses `Mutex` for interior
/// mutability so it can be shared as `Arc<TestBackend>`.
pub struct TestBackend {
    engine: Mutex<TestEngine>,
    slot: RegistrySlot,
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            engine: Mutex::new(TestEngine {
                block_size: 64,
                ..TestEngine::default()
            }),
            slot: RegistrySlot::new(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut TestEngine) -> R) -> R {
        let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut engine)
    }

    fn record(&self, op: TestOp) {
        self.with(|e| e.ops.push(op));
    }

    /// Return all recorded operations.
    pub fn operations(&self) -> Vec<TestOp> {
        self.with(|e| e.ops.clone())
    }

    /// Clear recorded operations.
    pub fn clear(&self) {
        self.with(|e| e.ops.clear());
    }

    /// Count operations matching a predicate.
    pub fn count<F: Fn(&TestOp) -> bool>(&self, f: F) -> usize {
        self.with(|e| e.ops.iter().filter(|op| f(op)).count())
    }

    /// Find the first operation matching a predicate.
    pub fn find<F: Fn(&TestOp) -> bool>(&self, f: F) -> Option<TestOp> {
        self.with(|e| e.ops.iter().find(|op| f(op)).cloned())
    }

    /// Instance handles allocated and not yet freed.
    pub fn live_instances(&self) -> usize {
        self.with(|e| e.live.len())
    }

    /// Bindings currently held by the engine.
    pub fn live_bindings(&self) -> usize {
        self.with(|e| e.bindings.len())
    }

    /// Patches currently open.
    pub fn open_patches(&self) -> usize {
        self.with(|e| e.patches.len())
    }

    pub fn set_init_code(&self, code: i32) {
        self.with(|e| e.init_code = code);
    }

    pub fn set_block_size(&self, frames: u32) {
        self.with(|e| e.block_size = frames);
    }

    pub fn fail_new_instance(&self, fail: bool) {
        self.with(|e| e.fail_new_instance = fail);
    }

    pub fn fail_audio(&self, fail: bool) {
        self.with(|e| e.fail_audio = fail);
    }

    pub fn fail_patch(&self, fail: bool) {
        self.with(|e| e.fail_patch = fail);
    }

    /// Make sends to `receiver` report that nothing is listening.
    pub fn mark_missing(&self, receiver: &str) {
        self.with(|e| e.missing_receivers.insert(receiver.to_string()));
    }

    /// Define a zero-filled array of `len` samples.
    pub fn add_array(&self, name: &str, len: usize) {
        self.with(|e| e.arrays.insert(name.to_string(), vec![0.0; len]));
    }

    pub fn array(&self, name: &str) -> Option<Vec<f32>> {
        self.with(|e| e.arrays.get(name).cloned())
    }

    /// Queue an event for delivery on the next drain.
    pub fn emit(&self, event: TestEvent) {
        self.with(|e| e.pending.push_back(event));
    }

    pub fn emit_bang(&self, source: &str) {
        self.emit(TestEvent::Bang(source.to_string()));
    }

    pub fn emit_float(&self, source: &str, value: f32) {
        self.emit(TestEvent::Float(source.to_string(), value));
    }

    pub fn emit_print(&self, text: &str) {
        self.emit(TestEvent::Print(text.to_string()));
    }
}

impl PdBackend for TestBackend {
    fn registry_slot(&self) -> &RegistrySlot {
        &self.slot
    }

    fn install_hooks(&self, sink: HookSink) -> HookInstall {
        self.with(|e| {
            e.ops.push(TestOp::InstallHooks);
            if e.hooks.is_some() {
                HookInstall::AlreadyInstalled
            } else {
                e.hooks = Some(sink);
                HookInstall::Installed
            }
        })
    }

    fn init(&self) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::Init);
            e.init_code
        })
    }

    fn release(&self) {
        self.record(TestOp::Release);
    }

    fn set_verbose(&self, verbose: bool) {
        self.record(TestOp::SetVerbose(verbose));
    }

    fn add_to_search_path(&self, dir: &Path) {
        self.record(TestOp::AddSearchPath(dir.to_path_buf()));
    }

    fn receive_messages(&self) {
        // Hooks run outside the engine lock.
        let (sink, pending) = self.with(|e| {
            e.ops.push(TestOp::ReceiveMessages);
            (e.hooks.clone(), e.pending.drain(..).collect::<Vec<_>>())
        });
        let Some(sink) = sink else {
            return;
        };
        for event in pending {
            match event {
                TestEvent::Print(text) => sink.print(&text),
                TestEvent::Bang(src) => sink.bang(&src),
                TestEvent::Float(src, v) => sink.float(&src, v),
                TestEvent::Symbol(src, s) => sink.symbol(&src, &s),
                TestEvent::List(src, atoms) => {
                    sink.list(&src, &mut SliceAtoms::new(&atoms), atoms.len())
                }
                TestEvent::Message(src, sel, atoms) => {
                    sink.message(&src, &sel, &mut SliceAtoms::new(&atoms), atoms.len())
                }
                TestEvent::NoteOn(ch, p, v) => sink.note_on(ch, p, v),
                TestEvent::ControlChange(ch, c, v) => sink.control_change(ch, c, v),
                TestEvent::ProgramChange(ch, p) => sink.program_change(ch, p),
                TestEvent::PitchBend(ch, v) => sink.pitch_bend(ch, v),
                TestEvent::Aftertouch(ch, v) => sink.aftertouch(ch, v),
                TestEvent::PolyAftertouch(ch, p, v) => sink.poly_aftertouch(ch, p, v),
                TestEvent::MidiByte(port, v) => sink.midi_byte(port, v),
            }
        }
    }

    fn new_instance(&self) -> Option<RawInstance> {
        self.with(|e| {
            if e.fail_new_instance {
                return None;
            }
            let handle = RawInstance(e.handle());
            e.live.insert(handle);
            e.ops.push(TestOp::NewInstance(handle));
            Some(handle)
        })
    }

    fn set_instance(&self, instance: RawInstance) {
        self.with(|e| {
            e.current = Some(instance);
            e.ops.push(TestOp::SetInstance(instance));
        });
    }

    fn free_instance(&self, instance: RawInstance) {
        self.with(|e| {
            e.live.remove(&instance);
            if e.current == Some(instance) {
                e.current = None;
            }
            e.ops.push(TestOp::FreeInstance(instance));
        });
    }

    fn init_audio(&self, in_channels: u32, out_channels: u32, sample_rate: u32) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::InitAudio {
                instance: e.current,
                in_channels,
                out_channels,
                sample_rate,
            });
            if e.fail_audio {
                -1
            } else {
                0
            }
        })
    }

    fn block_size(&self) -> u32 {
        self.with(|e| e.block_size)
    }

    /// Adds one to every sample so tests can tell a processed buffer from
    /// an untouched one.
    fn process_in_place(&self, ticks: u32, buffer: &mut [f32]) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::Process {
                instance: e.current,
                ticks,
                len: buffer.len(),
            })
        });
        for sample in buffer.iter_mut() {
            *sample += 1.0;
        }
        0
    }

    fn open_patch(&self, file_name: &str, dir: &Path) -> Option<RawPatch> {
        self.with(|e| {
            e.ops.push(TestOp::OpenPatch {
                instance: e.current,
                file_name: file_name.to_string(),
                dir: dir.to_path_buf(),
            });
            let instance = e.current?;
            if e.fail_patch {
                return None;
            }
            let patch = RawPatch(e.handle());
            let dollar_zero = 1000 + patch.0 as i32;
            e.patches.insert(patch, (instance, dollar_zero));
            Some(patch)
        })
    }

    fn close_patch(&self, patch: RawPatch) {
        self.with(|e| {
            e.patches.remove(&patch);
            e.ops.push(TestOp::ClosePatch(patch));
        });
    }

    fn dollar_zero(&self, patch: RawPatch) -> i32 {
        self.with(|e| e.patches.get(&patch).map(|(_, dz)| *dz).unwrap_or(0))
    }

    fn bind(&self, symbol: &str) -> Option<RawBinding> {
        self.with(|e| {
            e.ops.push(TestOp::Bind {
                instance: e.current,
                symbol: symbol.to_string(),
            });
            let instance = e.current?;
            let binding = RawBinding(e.handle());
            e.bindings.insert(binding, (instance, symbol.to_string()));
            Some(binding)
        })
    }

    fn unbind(&self, binding: RawBinding) {
        self.with(|e| {
            if let Some((_, symbol)) = e.bindings.remove(&binding) {
                e.ops.push(TestOp::Unbind {
                    instance: e.current,
                    symbol,
                });
            }
        });
    }

    fn send_bang(&self, receiver: &str) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::SendBang {
                instance: e.current,
                receiver: receiver.to_string(),
            });
            if e.reaches(receiver) {
                0
            } else {
                -1
            }
        })
    }

    fn send_float(&self, receiver: &str, value: f32) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::SendFloat {
                instance: e.current,
                receiver: receiver.to_string(),
                value,
            });
            if e.reaches(receiver) {
                0
            } else {
                -1
            }
        })
    }

    fn send_symbol(&self, receiver: &str, symbol: &str) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::SendSymbol {
                instance: e.current,
                receiver: receiver.to_string(),
                symbol: symbol.to_string(),
            });
            if e.reaches(receiver) {
                0
            } else {
                -1
            }
        })
    }

    fn start_message(&self, max_len: usize) -> i32 {
        self.with(|e| {
            e.message = Some((max_len, Vec::with_capacity(max_len)));
            0
        })
    }

    fn add_float(&self, value: f32) {
        self.with(|e| {
            if let Some((max, atoms)) = e.message.as_mut() {
                if atoms.len() < *max {
                    atoms.push(TestAtom::Float(value));
                }
            }
        });
    }

    fn add_symbol(&self, symbol: &str) {
        self.with(|e| {
            if let Some((max, atoms)) = e.message.as_mut() {
                if atoms.len() < *max {
                    atoms.push(TestAtom::Symbol(symbol.to_string()));
                }
            }
        });
    }

    fn finish_list(&self, receiver: &str) -> i32 {
        self.with(|e| {
            let atoms = e.message.take().map(|(_, atoms)| atoms).unwrap_or_default();
            e.ops.push(TestOp::FinishList {
                instance: e.current,
                receiver: receiver.to_string(),
                atoms,
            });
            if e.reaches(receiver) {
                0
            } else {
                -1
            }
        })
    }

    fn finish_message(&self, receiver: &str, selector: &str) -> i32 {
        self.with(|e| {
            let atoms = e.message.take().map(|(_, atoms)| atoms).unwrap_or_default();
            e.ops.push(TestOp::FinishMessage {
                instance: e.current,
                receiver: receiver.to_string(),
                selector: selector.to_string(),
                atoms,
            });
            if e.reaches(receiver) {
                0
            } else {
                -1
            }
        })
    }

    fn send_midi(&self, msg: MidiOut) -> i32 {
        let in_range = match msg {
            MidiOut::NoteOn { channel, pitch, velocity } => {
                channel >= 0 && (0..128).contains(&pitch) && (0..128).contains(&velocity)
            }
            MidiOut::ControlChange { channel, controller, value } => {
                channel >= 0 && (0..128).contains(&controller) && (0..128).contains(&value)
            }
            MidiOut::ProgramChange { channel, program } => channel >= 0 && (0..128).contains(&program),
            MidiOut::PitchBend { channel, value } => channel >= 0 && (-8192..8192).contains(&value),
            MidiOut::Aftertouch { channel, value } => channel >= 0 && (0..128).contains(&value),
            MidiOut::PolyAftertouch { channel, pitch, value } => {
                channel >= 0 && (0..128).contains(&pitch) && (0..128).contains(&value)
            }
            MidiOut::Byte { port, value }
            | MidiOut::Sysex { port, value }
            | MidiOut::SysRealtime { port, value } => port >= 0 && (0..256).contains(&value),
        };
        self.with(|e| {
            e.ops.push(TestOp::Midi {
                instance: e.current,
                msg,
            })
        });
        if in_range {
            0
        } else {
            -1
        }
    }

    fn array_size(&self, name: &str) -> i32 {
        self.with(|e| e.arrays.get(name).map(|a| a.len() as i32).unwrap_or(-1))
    }

    fn read_array(&self, dest: &mut [f32], name: &str, offset: usize) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::ReadArray {
                name: name.to_string(),
                offset,
                len: dest.len(),
            });
            let Some(array) = e.arrays.get(name) else {
                return -1;
            };
            match array.get(offset..offset + dest.len()) {
                Some(src) => {
                    dest.copy_from_slice(src);
                    0
                }
                None => -2,
            }
        })
    }

    fn write_array(&self, name: &str, offset: usize, src: &[f32]) -> i32 {
        self.with(|e| {
            e.ops.push(TestOp::WriteArray {
                name: name.to_string(),
                offset,
                values: src.to_vec(),
            });
            let Some(array) = e.arrays.get_mut(name) else {
                return -1;
            };
            match array.get_mut(offset..offset + src.len()) {
                Some(dest) => {
                    dest.copy_from_slice(src);
                    0
                }
                None => -2,
            }
        })
    }
}
