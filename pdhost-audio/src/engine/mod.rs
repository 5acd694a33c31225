//! Native engine access.

mod backend;
mod libpd;

pub use backend::{
    HookInstall, MidiOut, PdBackend, RawBinding, RawInstance, RawPatch, SliceAtoms, TestAtom,
    TestBackend, TestEvent, TestOp,
};
pub use libpd::{default_library_name, LibPdBackend};
