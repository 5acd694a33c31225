//! `PdBackend` over the libpd shared library, loaded at runtime.
//!
//! The library and its symbol table are loaded once per process and never
//! unloaded: the engine keeps pointers to our hook trampolines for as long as
//! the process lives. Hooks are process-wide and can only be installed once,
//! before `libpd_queued_init`.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use libloading::Library;
use log::{debug, info, warn};

use super::backend::{HookInstall, MidiOut, PdBackend, RawBinding, RawInstance, RawPatch};
use crate::codec::AtomReader;
use crate::error::BackendError;
use crate::pipeline::HookSink;
use crate::registry::RegistrySlot;

type Atom = c_void;

type PrintHook = unsafe extern "C" fn(*const c_char);
type BangHook = unsafe extern "C" fn(*const c_char);
type FloatHook = unsafe extern "C" fn(*const c_char, f32);
type SymbolHook = unsafe extern "C" fn(*const c_char, *const c_char);
type ListHook = unsafe extern "C" fn(*const c_char, c_int, *mut Atom);
type MessageHook = unsafe extern "C" fn(*const c_char, *const c_char, c_int, *mut Atom);
type Midi3Hook = unsafe extern "C" fn(c_int, c_int, c_int);
type Midi2Hook = unsafe extern "C" fn(c_int, c_int);

macro_rules! libpd_api {
    ($($name:ident: fn($($arg:ty),*) $(-> $ret:ty)?;)*) => {
        /// Function pointers resolved from the library, named after their
        /// `libpd_` symbols.
        struct Api {
            $($name: unsafe extern "C" fn($($arg),*) $(-> $ret)?,)*
        }

        impl Api {
            /// # Safety
            /// The signatures above must match the library's exports.
            unsafe fn load(lib: &Library, path: &Path) -> Result<Self, BackendError> {
                Ok(Self {
                    $($name: *lib
                        .get::<unsafe extern "C" fn($($arg),*) $(-> $ret)?>(
                            concat!("libpd_", stringify!($name), "\0").as_bytes(),
                        )
                        .map_err(|source| BackendError::Symbol {
                            path: path.to_path_buf(),
                            name: stringify!($name),
                            source,
                        })?,)*
                })
            }
        }
    };
}

libpd_api! {
    set_queued_printhook: fn(Option<PrintHook>);
    set_queued_banghook: fn(Option<BangHook>);
    set_queued_floathook: fn(Option<FloatHook>);
    set_queued_symbolhook: fn(Option<SymbolHook>);
    set_queued_listhook: fn(Option<ListHook>);
    set_queued_messagehook: fn(Option<MessageHook>);
    set_queued_noteonhook: fn(Option<Midi3Hook>);
    set_queued_controlchangehook: fn(Option<Midi3Hook>);
    set_queued_programchangehook: fn(Option<Midi2Hook>);
    set_queued_pitchbendhook: fn(Option<Midi2Hook>);
    set_queued_aftertouchhook: fn(Option<Midi2Hook>);
    set_queued_polyaftertouchhook: fn(Option<Midi3Hook>);
    set_queued_midibytehook: fn(Option<Midi2Hook>);
    queued_init: fn() -> c_int;
    queued_release: fn();
    queued_receive_pd_messages: fn();
    queued_receive_midi_messages: fn();
    set_verbose: fn(c_int);
    add_to_search_path: fn(*const c_char);
    new_instance: fn() -> *mut c_void;
    set_instance: fn(*mut c_void);
    free_instance: fn(*mut c_void);
    init_audio: fn(c_int, c_int, c_int) -> c_int;
    blocksize: fn() -> c_int;
    process_float: fn(c_int, *const f32, *mut f32) -> c_int;
    openfile: fn(*const c_char, *const c_char) -> *mut c_void;
    closefile: fn(*mut c_void);
    getdollarzero: fn(*mut c_void) -> c_int;
    bind: fn(*const c_char) -> *mut c_void;
    unbind: fn(*mut c_void);
    bang: fn(*const c_char) -> c_int;
    float: fn(*const c_char, f32) -> c_int;
    symbol: fn(*const c_char, *const c_char) -> c_int;
    start_message: fn(c_int) -> c_int;
    add_float: fn(f32);
    add_symbol: fn(*const c_char);
    finish_list: fn(*const c_char) -> c_int;
    finish_message: fn(*const c_char, *const c_char) -> c_int;
    noteon: fn(c_int, c_int, c_int) -> c_int;
    controlchange: fn(c_int, c_int, c_int) -> c_int;
    programchange: fn(c_int, c_int) -> c_int;
    pitchbend: fn(c_int, c_int) -> c_int;
    aftertouch: fn(c_int, c_int) -> c_int;
    polyaftertouch: fn(c_int, c_int, c_int) -> c_int;
    midibyte: fn(c_int, c_int) -> c_int;
    sysex: fn(c_int, c_int) -> c_int;
    sysrealtime: fn(c_int, c_int) -> c_int;
    arraysize: fn(*const c_char) -> c_int;
    read_array: fn(*mut f32, *const c_char, c_int, c_int) -> c_int;
    write_array: fn(*const c_char, c_int, *const f32, c_int) -> c_int;
    is_float: fn(*mut Atom) -> c_int;
    is_symbol: fn(*mut Atom) -> c_int;
    get_float: fn(*mut Atom) -> f32;
    get_symbol: fn(*mut Atom) -> *const c_char;
    next_atom: fn(*mut Atom) -> *mut Atom;
}

struct Loaded {
    path: PathBuf,
    api: Api,
    slot: RegistrySlot,
    _lib: Library,
}

static LIBPD: OnceLock<Loaded> = OnceLock::new();
static HOOKS: OnceLock<HookSink> = OnceLock::new();

/// Platform file name of the libpd shared library (`libpd.so`, `libpd.dylib`, `pd.dll`).
pub fn default_library_name() -> std::ffi::OsString {
    libloading::library_filename("pd")
}

/// The libpd backend. Cheap to construct; all instances share the one
/// loaded library.
pub struct LibPdBackend {
    pd: &'static Loaded,
}

impl LibPdBackend {
    /// Load libpd from `path`, or reuse the copy already loaded in this
    /// process.
    pub fn load(path: &Path) -> Result<Self, BackendError> {
        if let Some(pd) = LIBPD.get() {
            if pd.path != path {
                debug!(target: "pd::libpd", "libpd already loaded from {}", pd.path.display());
            }
            return Ok(Self { pd });
        }

        // SAFETY: loading libpd runs no initialisers with preconditions.
        let lib = unsafe { Library::new(path) }.map_err(|source| BackendError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: the declared signatures mirror z_libpd.h / z_queued.h.
        let api = unsafe { Api::load(&lib, path) }?;
        let pd = LIBPD.get_or_init(|| Loaded {
            path: path.to_path_buf(),
            api,
            slot: RegistrySlot::new(),
            _lib: lib,
        });
        info!(target: "pd::libpd", "loaded {}", pd.path.display());
        Ok(Self { pd })
    }

    fn api(&self) -> &Api {
        &self.pd.api
    }
}

fn cstring(s: &str) -> Option<CString> {
    match CString::new(s) {
        Ok(c) => Some(c),
        Err(_) => {
            warn!(target: "pd::libpd", "'{}' contains a NUL byte", s.escape_debug());
            None
        }
    }
}

fn path_cstring(path: &Path) -> Option<CString> {
    cstring(&path.to_string_lossy())
}

fn len_int(len: usize) -> c_int {
    c_int::try_from(len).unwrap_or(c_int::MAX)
}

impl PdBackend for LibPdBackend {
    fn registry_slot(&self) -> &RegistrySlot {
        &self.pd.slot
    }

    fn install_hooks(&self, sink: HookSink) -> HookInstall {
        if HOOKS.set(sink).is_err() {
            return HookInstall::AlreadyInstalled;
        }
        let api = self.api();
        // SAFETY: trampolines match the hook typedefs and live for the process.
        unsafe {
            (api.set_queued_printhook)(Some(print_hook));
            (api.set_queued_banghook)(Some(bang_hook));
            (api.set_queued_floathook)(Some(float_hook));
            (api.set_queued_symbolhook)(Some(symbol_hook));
            (api.set_queued_listhook)(Some(list_hook));
            (api.set_queued_messagehook)(Some(message_hook));
            (api.set_queued_noteonhook)(Some(note_on_hook));
            (api.set_queued_controlchangehook)(Some(control_change_hook));
            (api.set_queued_programchangehook)(Some(program_change_hook));
            (api.set_queued_pitchbendhook)(Some(pitch_bend_hook));
            (api.set_queued_aftertouchhook)(Some(aftertouch_hook));
            (api.set_queued_polyaftertouchhook)(Some(poly_aftertouch_hook));
            (api.set_queued_midibytehook)(Some(midi_byte_hook));
        }
        HookInstall::Installed
    }

    fn init(&self) -> i32 {
        unsafe { (self.api().queued_init)() }
    }

    fn release(&self) {
        unsafe { (self.api().queued_release)() }
    }

    fn set_verbose(&self, verbose: bool) {
        unsafe { (self.api().set_verbose)(verbose as c_int) }
    }

    fn add_to_search_path(&self, dir: &Path) {
        if let Some(dir) = path_cstring(dir) {
            unsafe { (self.api().add_to_search_path)(dir.as_ptr()) }
        }
    }

    fn receive_messages(&self) {
        unsafe {
            (self.api().queued_receive_pd_messages)();
            (self.api().queued_receive_midi_messages)();
        }
    }

    fn new_instance(&self) -> Option<RawInstance> {
        let ptr = unsafe { (self.api().new_instance)() };
        (!ptr.is_null()).then(|| RawInstance(ptr as usize))
    }

    fn set_instance(&self, instance: RawInstance) {
        unsafe { (self.api().set_instance)(instance.0 as *mut c_void) }
    }

    fn free_instance(&self, instance: RawInstance) {
        unsafe { (self.api().free_instance)(instance.0 as *mut c_void) }
    }

    fn init_audio(&self, in_channels: u32, out_channels: u32, sample_rate: u32) -> i32 {
        unsafe {
            (self.api().init_audio)(in_channels as c_int, out_channels as c_int, sample_rate as c_int)
        }
    }

    fn block_size(&self) -> u32 {
        let size = unsafe { (self.api().blocksize)() };
        u32::try_from(size).unwrap_or(0)
    }

    fn process_in_place(&self, ticks: u32, buffer: &mut [f32]) -> i32 {
        // libpd reads all input for a tick before writing its output, so the
        // same buffer may serve as both.
        let ptr = buffer.as_mut_ptr();
        unsafe { (self.api().process_float)(ticks as c_int, ptr as *const f32, ptr) }
    }

    fn open_patch(&self, file_name: &str, dir: &Path) -> Option<RawPatch> {
        let name = cstring(file_name)?;
        let dir = path_cstring(dir)?;
        let ptr = unsafe { (self.api().openfile)(name.as_ptr(), dir.as_ptr()) };
        (!ptr.is_null()).then(|| RawPatch(ptr as usize))
    }

    fn close_patch(&self, patch: RawPatch) {
        unsafe { (self.api().closefile)(patch.0 as *mut c_void) }
    }

    fn dollar_zero(&self, patch: RawPatch) -> i32 {
        unsafe { (self.api().getdollarzero)(patch.0 as *mut c_void) }
    }

    fn bind(&self, symbol: &str) -> Option<RawBinding> {
        let symbol = cstring(symbol)?;
        let ptr = unsafe { (self.api().bind)(symbol.as_ptr()) };
        (!ptr.is_null()).then(|| RawBinding(ptr as usize))
    }

    fn unbind(&self, binding: RawBinding) {
        unsafe { (self.api().unbind)(binding.0 as *mut c_void) }
    }

    fn send_bang(&self, receiver: &str) -> i32 {
        let Some(recv) = cstring(receiver) else { return -1 };
        unsafe { (self.api().bang)(recv.as_ptr()) }
    }

    fn send_float(&self, receiver: &str, value: f32) -> i32 {
        let Some(recv) = cstring(receiver) else { return -1 };
        unsafe { (self.api().float)(recv.as_ptr(), value) }
    }

    fn send_symbol(&self, receiver: &str, symbol: &str) -> i32 {
        let (Some(recv), Some(sym)) = (cstring(receiver), cstring(symbol)) else {
            return -1;
        };
        unsafe { (self.api().symbol)(recv.as_ptr(), sym.as_ptr()) }
    }

    fn start_message(&self, max_len: usize) -> i32 {
        unsafe { (self.api().start_message)(len_int(max_len)) }
    }

    fn add_float(&self, value: f32) {
        unsafe { (self.api().add_float)(value) }
    }

    fn add_symbol(&self, symbol: &str) {
        // An unrepresentable symbol still occupies its slot.
        let sym = cstring(symbol).unwrap_or_default();
        unsafe { (self.api().add_symbol)(sym.as_ptr()) }
    }

    fn finish_list(&self, receiver: &str) -> i32 {
        let Some(recv) = cstring(receiver) else { return -1 };
        unsafe { (self.api().finish_list)(recv.as_ptr()) }
    }

    fn finish_message(&self, receiver: &str, selector: &str) -> i32 {
        let (Some(recv), Some(sel)) = (cstring(receiver), cstring(selector)) else {
            return -1;
        };
        unsafe { (self.api().finish_message)(recv.as_ptr(), sel.as_ptr()) }
    }

    fn send_midi(&self, msg: MidiOut) -> i32 {
        let api = self.api();
        unsafe {
            match msg {
                MidiOut::NoteOn { channel, pitch, velocity } => (api.noteon)(channel, pitch, velocity),
                MidiOut::ControlChange { channel, controller, value } => {
                    (api.controlchange)(channel, controller, value)
                }
                MidiOut::ProgramChange { channel, program } => (api.programchange)(channel, program),
                MidiOut::PitchBend { channel, value } => (api.pitchbend)(channel, value),
                MidiOut::Aftertouch { channel, value } => (api.aftertouch)(channel, value),
                MidiOut::PolyAftertouch { channel, pitch, value } => {
                    (api.polyaftertouch)(channel, pitch, value)
                }
                MidiOut::Byte { port, value } => (api.midibyte)(port, value),
                MidiOut::Sysex { port, value } => (api.sysex)(port, value),
                MidiOut::SysRealtime { port, value } => (api.sysrealtime)(port, value),
            }
        }
    }

    fn array_size(&self, name: &str) -> i32 {
        let Some(name) = cstring(name) else { return -1 };
        unsafe { (self.api().arraysize)(name.as_ptr()) }
    }

    fn read_array(&self, dest: &mut [f32], name: &str, offset: usize) -> i32 {
        let Some(name) = cstring(name) else { return -1 };
        unsafe {
            (self.api().read_array)(dest.as_mut_ptr(), name.as_ptr(), len_int(offset), len_int(dest.len()))
        }
    }

    fn write_array(&self, name: &str, offset: usize, src: &[f32]) -> i32 {
        let Some(name) = cstring(name) else { return -1 };
        unsafe {
            (self.api().write_array)(name.as_ptr(), len_int(offset), src.as_ptr(), len_int(src.len()))
        }
    }
}

// ─── Hook trampolines ───────────────────────────────────────────────

/// Borrow a C string from the engine, lossily.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
unsafe fn text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Walks a native `t_atom` array through libpd's accessors.
struct NativeAtoms<'a> {
    api: &'a Api,
    current: *mut Atom,
}

impl AtomReader for NativeAtoms<'_> {
    fn is_float(&self) -> bool {
        !self.current.is_null() && unsafe { (self.api.is_float)(self.current) } != 0
    }

    fn is_symbol(&self) -> bool {
        !self.current.is_null() && unsafe { (self.api.is_symbol)(self.current) } != 0
    }

    fn float(&self) -> f32 {
        unsafe { (self.api.get_float)(self.current) }
    }

    fn symbol(&self) -> String {
        unsafe { text((self.api.get_symbol)(self.current)) }
    }

    fn advance(&mut self) {
        if !self.current.is_null() {
            self.current = unsafe { (self.api.next_atom)(self.current) };
        }
    }
}

fn with_sink(f: impl FnOnce(&HookSink)) {
    if let Some(sink) = HOOKS.get() {
        f(sink);
    }
}

fn with_atoms(argv: *mut Atom, f: impl FnOnce(&HookSink, &mut NativeAtoms<'_>)) {
    if let (Some(sink), Some(pd)) = (HOOKS.get(), LIBPD.get()) {
        let mut atoms = NativeAtoms { api: &pd.api, current: argv };
        f(sink, &mut atoms);
    }
}

fn count(argc: c_int) -> usize {
    usize::try_from(argc).unwrap_or(0)
}

unsafe extern "C" fn print_hook(s: *const c_char) {
    let line = text(s);
    with_sink(|sink| sink.print(&line));
}

unsafe extern "C" fn bang_hook(recv: *const c_char) {
    let recv = text(recv);
    with_sink(|sink| sink.bang(&recv));
}

unsafe extern "C" fn float_hook(recv: *const c_char, x: f32) {
    let recv = text(recv);
    with_sink(|sink| sink.float(&recv, x));
}

unsafe extern "C" fn symbol_hook(recv: *const c_char, sym: *const c_char) {
    let (recv, sym) = (text(recv), text(sym));
    with_sink(|sink| sink.symbol(&recv, &sym));
}

unsafe extern "C" fn list_hook(recv: *const c_char, argc: c_int, argv: *mut Atom) {
    let recv = text(recv);
    with_atoms(argv, |sink, atoms| sink.list(&recv, atoms, count(argc)));
}

unsafe extern "C" fn message_hook(recv: *const c_char, msg: *const c_char, argc: c_int, argv: *mut Atom) {
    let (recv, msg) = (text(recv), text(msg));
    with_atoms(argv, |sink, atoms| sink.message(&recv, &msg, atoms, count(argc)));
}

unsafe extern "C" fn note_on_hook(channel: c_int, pitch: c_int, velocity: c_int) {
    with_sink(|sink| sink.note_on(channel, pitch, velocity));
}

unsafe extern "C" fn control_change_hook(channel: c_int, controller: c_int, value: c_int) {
    with_sink(|sink| sink.control_change(channel, controller, value));
}

unsafe extern "C" fn program_change_hook(channel: c_int, value: c_int) {
    with_sink(|sink| sink.program_change(channel, value));
}

unsafe extern "C" fn pitch_bend_hook(channel: c_int, value: c_int) {
    with_sink(|sink| sink.pitch_bend(channel, value));
}

unsafe extern "C" fn aftertouch_hook(channel: c_int, value: c_int) {
    with_sink(|sink| sink.aftertouch(channel, value));
}

unsafe extern "C" fn poly_aftertouch_hook(channel: c_int, pitch: c_int, value: c_int) {
    with_sink(|sink| sink.poly_aftertouch(channel, pitch, value));
}

unsafe extern "C" fn midi_byte_hook(port: c_int, byte: c_int) {
    with_sink(|sink| sink.midi_byte(port, byte));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_name_mentions_pd() {
        let name = default_library_name();
        assert!(name.to_string_lossy().contains("pd"));
    }

    #[test]
    fn missing_library_is_a_load_error() {
        match LibPdBackend::load(Path::new("/nonexistent/libpd-missing.so")) {
            Err(BackendError::Load { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/libpd-missing.so"))
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("loaded a library that does not exist"),
        }
    }

    #[test]
    fn nul_bytes_are_rejected() {
        assert!(cstring("a\0b").is_none());
        assert_eq!(len_int(usize::MAX), c_int::MAX);
    }
}
