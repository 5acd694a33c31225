//! One engine instance: a native handle with its open patch, bindings and
//! subscribers.
//!
//! Every native call selects this instance under the selection lock first.
//! An instance whose bring-up failed never touches the engine again; its
//! operations log a warning and return `Unavailable`.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info, warn};
use pdhost_types::{Arg, Atom, AtomList, InstanceConfig, InstanceId, CHANNELS_IN, CHANNELS_OUT};

use crate::audio_callback::{AudioCallback, CallbackShared};
use crate::codec::{self, SendTarget};
use crate::engine::{MidiOut, PdBackend, RawBinding, RawInstance, RawPatch};
use crate::error::{InstanceError, SendError};
use crate::selection::SelectionLock;
use crate::subscribers::EventSubscribers;

/// Lifecycle of an instance.
///
/// `Uninitialized -> AudioReady -> PatchLoaded -> Running -> Destroyed`, with
/// `AudioFailed` and `PatchFailed` as terminal failure states reachable only
/// during creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized,
    AudioReady,
    PatchLoaded,
    Running,
    AudioFailed,
    PatchFailed,
    Destroyed,
}

impl InstanceState {
    pub fn is_failed(self) -> bool {
        matches!(self, InstanceState::AudioFailed | InstanceState::PatchFailed)
    }
}

pub struct Instance {
    id: InstanceId,
    config: InstanceConfig,
    state: InstanceState,
    handle: Option<RawInstance>,
    patch: Option<RawPatch>,
    bindings: HashMap<String, RawBinding>,
    shared: Arc<CallbackShared>,
    lock: Arc<SelectionLock>,
    subscribers: EventSubscribers,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        config: InstanceConfig,
        shared: CallbackShared,
        lock: Arc<SelectionLock>,
    ) -> Self {
        Self {
            id,
            config,
            state: InstanceState::Uninitialized,
            handle: None,
            patch: None,
            bindings: HashMap::new(),
            shared: Arc::new(shared),
            lock,
            subscribers: EventSubscribers::new(),
        }
    }

    /// Mark an instance that will never be brought up.
    pub(crate) fn fail_audio(&mut self) {
        self.state = InstanceState::AudioFailed;
    }

    /// Allocate a native instance, initialise its audio, open its patch and
    /// switch DSP on. Any failure frees the native handle and leaves the
    /// instance in a terminal failure state.
    pub(crate) fn start(&mut self, sample_rate: u32) {
        let label = self.label();
        let handle = self.lock.acquire().new_instance();
        let Some(handle) = handle else {
            error!(target: "pd::instance", "{}: engine could not allocate an instance", label);
            self.state = InstanceState::AudioFailed;
            return;
        };

        let engine = self.lock.select(handle);
        let code = engine.init_audio(CHANNELS_IN, CHANNELS_OUT, sample_rate);
        if code != 0 {
            error!(target: "pd::instance", "{}: audio init failed ({})", label, code);
            engine.free_instance(handle);
            self.state = InstanceState::AudioFailed;
            return;
        }
        self.state = InstanceState::AudioReady;

        let file_name = self.config.patch_file_name();
        let Some(patch) = engine.open_patch(&file_name, &self.config.patch_dir) else {
            error!(
                target: "pd::instance",
                "{}: could not open {} in {}",
                label,
                file_name,
                self.config.patch_dir.display()
            );
            engine.free_instance(handle);
            self.state = InstanceState::PatchFailed;
            return;
        };
        self.patch = Some(patch);
        self.state = InstanceState::PatchLoaded;

        if let Err(e) = set_dsp(&*engine, true) {
            warn!(target: "pd::instance", "{}: could not switch DSP on: {}", label, e);
        }
        self.handle = Some(handle);
        self.shared.start(handle);
        self.state = InstanceState::Running;
        info!(
            target: "pd::instance",
            "{}: running {} ($0 = {})",
            label,
            file_name,
            engine.dollar_zero(patch)
        );
    }

    /// Tear down native state: DSP off, every binding released, patch
    /// closed, handle freed. Idempotent; failed instances have nothing
    /// native left and only change state.
    pub(crate) fn shutdown(&mut self) {
        if self.state == InstanceState::Destroyed {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let engine = self.lock.select(handle);
            self.shared.stop();
            if let Err(e) = set_dsp(&*engine, false) {
                warn!(target: "pd::instance", "{}: could not switch DSP off: {}", self.label(), e);
            }
            for (_, binding) in self.bindings.drain() {
                engine.unbind(binding);
            }
            if let Some(patch) = self.patch.take() {
                engine.close_patch(patch);
            }
            engine.free_instance(handle);
        }
        self.state = InstanceState::Destroyed;
        info!(target: "pd::instance", "{}: destroyed", self.label());
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.config.display_name()
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn ticks_per_callback(&self) -> u32 {
        self.shared.ticks()
    }

    /// A handle for driving this instance from the audio thread.
    pub fn audio_callback(&self) -> AudioCallback {
        AudioCallback::new(self.shared.clone(), self.lock.clone())
    }

    pub fn subscribers(&self) -> &EventSubscribers {
        &self.subscribers
    }

    pub fn subscribers_mut(&mut self) -> &mut EventSubscribers {
        &mut self.subscribers
    }

    fn label(&self) -> String {
        format!("{}#{}", self.name(), self.id)
    }

    /// The native handle if the instance may touch the engine.
    fn usable(&self, op: &str) -> Result<RawInstance, InstanceState> {
        match (self.state, self.handle) {
            (InstanceState::Running, Some(handle)) => Ok(handle),
            (state, _) => {
                warn!(target: "pd::instance", "{}: {} ignored, instance is {:?}", self.label(), op, state);
                Err(state)
            }
        }
    }

    // ── Bindings ────────────────────────────────────────────────────

    /// Subscribe this instance to messages sent to `symbol`.
    pub fn bind(&mut self, symbol: &str) -> Result<(), InstanceError> {
        if self.bindings.contains_key(symbol) {
            return Err(InstanceError::DuplicateBinding(symbol.to_string()));
        }
        let handle = self.usable("bind").map_err(InstanceError::Unavailable)?;
        let binding = self.lock.select(handle).bind(symbol);
        match binding {
            Some(binding) => {
                self.bindings.insert(symbol.to_string(), binding);
                Ok(())
            }
            None => {
                warn!(target: "pd::instance", "{}: engine refused to bind '{}'", self.label(), symbol);
                Err(InstanceError::BindFailed(symbol.to_string()))
            }
        }
    }

    pub fn unbind(&mut self, symbol: &str) -> Result<(), InstanceError> {
        let handle = self.usable("unbind").map_err(InstanceError::Unavailable)?;
        let binding = self
            .bindings
            .remove(symbol)
            .ok_or_else(|| InstanceError::UnknownBinding(symbol.to_string()))?;
        self.lock.select(handle).unbind(binding);
        Ok(())
    }

    pub fn is_bound(&self, symbol: &str) -> bool {
        self.bindings.contains_key(symbol)
    }

    pub fn bound_symbols(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// The patch's `$0`, or `None` without an open patch.
    pub fn dollar_zero(&self) -> Option<i32> {
        let handle = self.handle?;
        let patch = self.patch?;
        Some(self.lock.select(handle).dollar_zero(patch))
    }

    // ── Sends ───────────────────────────────────────────────────────

    pub fn send_bang(&self, receiver: &str) -> Result<(), SendError> {
        self.send_simple("bang", receiver, |engine| engine.send_bang(receiver))
    }

    pub fn send_float(&self, receiver: &str, value: f32) -> Result<(), SendError> {
        self.send_simple("float", receiver, |engine| engine.send_float(receiver, value))
    }

    pub fn send_symbol(&self, receiver: &str, symbol: &str) -> Result<(), SendError> {
        self.send_simple("symbol", receiver, |engine| engine.send_symbol(receiver, symbol))
    }

    fn send_simple(
        &self,
        what: &str,
        receiver: &str,
        send: impl FnOnce(&dyn PdBackend) -> i32,
    ) -> Result<(), SendError> {
        let handle = self.usable(what).map_err(SendError::Unavailable)?;
        let code = send(&*self.lock.select(handle));
        if code != 0 {
            warn!(target: "pd::instance", "{}: {} to '{}': no such receiver", self.label(), what, receiver);
            return Err(SendError::ReceiverNotFound(receiver.to_string()));
        }
        Ok(())
    }

    /// Send `args` as a list. Nothing is sent if encoding fails.
    pub fn send_list(&self, receiver: &str, args: &[Arg]) -> Result<(), SendError> {
        self.send_encoded(SendTarget::List { receiver }, args)
    }

    /// Send `args` prefixed by `selector`. Nothing is sent if encoding fails.
    pub fn send_message(&self, receiver: &str, selector: &str, args: &[Arg]) -> Result<(), SendError> {
        self.send_encoded(SendTarget::Message { receiver, selector }, args)
    }

    fn send_encoded(&self, target: SendTarget<'_>, args: &[Arg]) -> Result<(), SendError> {
        let atoms = codec::encode_args(args).inspect_err(|e| {
            warn!(target: "pd::codec", "{}: not sending to '{}': {}", self.label(), target.receiver(), e)
        })?;
        let handle = self.usable("send").map_err(SendError::Unavailable)?;
        codec::send_atoms(&*self.lock.select(handle), target, &atoms).inspect_err(|e| {
            warn!(target: "pd::instance", "{}: {}", self.label(), e)
        })
    }

    // ── MIDI ────────────────────────────────────────────────────────

    pub fn send_note_on(&self, channel: i32, pitch: i32, velocity: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::NoteOn { channel, pitch, velocity })
    }

    pub fn send_control_change(&self, channel: i32, controller: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::ControlChange { channel, controller, value })
    }

    pub fn send_program_change(&self, channel: i32, program: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::ProgramChange { channel, program })
    }

    pub fn send_pitch_bend(&self, channel: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::PitchBend { channel, value })
    }

    pub fn send_aftertouch(&self, channel: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::Aftertouch { channel, value })
    }

    pub fn send_poly_aftertouch(&self, channel: i32, pitch: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::PolyAftertouch { channel, pitch, value })
    }

    pub fn send_midi_byte(&self, port: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::Byte { port, value })
    }

    pub fn send_sysex(&self, port: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::Sysex { port, value })
    }

    pub fn send_sys_realtime(&self, port: i32, value: i32) -> Result<(), SendError> {
        self.send_midi(MidiOut::SysRealtime { port, value })
    }

    fn send_midi(&self, msg: MidiOut) -> Result<(), SendError> {
        let handle = self.usable(msg.kind()).map_err(SendError::Unavailable)?;
        let code = self.lock.select(handle).send_midi(msg);
        if code != 0 {
            warn!(target: "pd::instance", "{}: midi {:?} rejected ({})", self.label(), msg, code);
            return Err(SendError::MidiRejected { kind: msg.kind(), code });
        }
        Ok(())
    }

    // ── Arrays ──────────────────────────────────────────────────────

    /// Length of the named array, or `None` if the patch has no such array.
    pub fn array_size(&self, name: &str) -> Option<usize> {
        let handle = self.usable("array size").ok()?;
        let size = self.lock.select(handle).array_size(name);
        usize::try_from(size).ok()
    }

    /// Copy `dest.len()` samples starting at `offset` out of the named array.
    pub fn read_array(&self, dest: &mut [f32], name: &str, offset: usize) -> Result<(), SendError> {
        let handle = self.usable("read array").map_err(SendError::Unavailable)?;
        let code = self.lock.select(handle).read_array(dest, name, offset);
        self.array_result("read", name, code)
    }

    /// Copy `src` into the named array starting at `offset`.
    pub fn write_array(&self, name: &str, offset: usize, src: &[f32]) -> Result<(), SendError> {
        let handle = self.usable("write array").map_err(SendError::Unavailable)?;
        let code = self.lock.select(handle).write_array(name, offset, src);
        self.array_result("write", name, code)
    }

    fn array_result(&self, op: &str, name: &str, code: i32) -> Result<(), SendError> {
        if code != 0 {
            warn!(
                target: "pd::instance",
                "{}: array '{}' {} failed ({}): missing or out of bounds",
                self.label(),
                name,
                op,
                code
            );
            return Err(SendError::ArrayAccess { name: name.to_string(), code });
        }
        Ok(())
    }
}

/// `[; pd dsp 1(` or `[; pd dsp 0(` to the current instance.
fn set_dsp(engine: &dyn PdBackend, on: bool) -> Result<(), SendError> {
    let atoms = AtomList::from(vec![Atom::Float(if on { 1.0 } else { 0.0 })]);
    codec::send_atoms(engine, SendTarget::Message { receiver: "pd", selector: "dsp" }, &atoms)
}
