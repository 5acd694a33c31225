//! Conversion between application values and engine atoms.
//!
//! Outgoing: loosely-typed [`Arg`]s are encoded into an [`AtomList`] and
//! pushed through the engine's message buffer as a list or a
//! selector-prefixed message. Incoming: a native atom array is walked through
//! an [`AtomReader`] and decoded into an [`AtomList`].

use pdhost_types::{Arg, Atom, AtomList};

use crate::engine::PdBackend;
use crate::error::SendError;

/// Where an encoded atom list is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget<'a> {
    List { receiver: &'a str },
    Message { receiver: &'a str, selector: &'a str },
}

impl<'a> SendTarget<'a> {
    pub fn receiver(&self) -> &'a str {
        match *self {
            SendTarget::List { receiver } | SendTarget::Message { receiver, .. } => receiver,
        }
    }
}

/// Cursor over a native atom array.
pub trait AtomReader {
    fn is_float(&self) -> bool;
    fn is_symbol(&self) -> bool;
    fn float(&self) -> f32;
    fn symbol(&self) -> String;
    fn advance(&mut self);
}

/// Encode arguments into atoms, preserving order and length.
///
/// Fails without side effects when `args` is empty or contains a value with
/// no atom representation.
pub fn encode_args(args: &[Arg]) -> Result<AtomList, SendError> {
    if args.is_empty() {
        return Err(SendError::EmptyArguments);
    }
    args.iter()
        .map(|arg| match arg {
            Arg::Int(v) => Ok(Atom::Float(*v as f32)),
            Arg::Float(v) => Ok(Atom::Float(*v)),
            Arg::Double(v) => Ok(Atom::Float(*v as f32)),
            Arg::Str(s) => Ok(Atom::Symbol(s.clone())),
            Arg::Bool(_) | Arg::Blob(_) => Err(SendError::UnsupportedArgType(arg.type_name())),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(AtomList::from)
}

/// Push `atoms` through the engine's message buffer to `target`.
///
/// The caller must hold the selection lock with the sending instance
/// selected.
pub fn send_atoms(engine: &dyn PdBackend, target: SendTarget<'_>, atoms: &AtomList) -> Result<(), SendError> {
    if atoms.is_empty() {
        return Err(SendError::EmptyArguments);
    }
    if engine.start_message(atoms.len()) != 0 {
        return Err(SendError::MessageBuffer(atoms.len()));
    }
    for atom in atoms {
        match atom {
            Atom::Float(v) => engine.add_float(*v),
            Atom::Symbol(s) => engine.add_symbol(s),
        }
    }
    let code = match target {
        SendTarget::List { receiver } => engine.finish_list(receiver),
        SendTarget::Message { receiver, selector } => engine.finish_message(receiver, selector),
    };
    if code != 0 {
        return Err(SendError::SendFailed(target.receiver().to_string()));
    }
    Ok(())
}

/// Decode `count` atoms from `reader`. Atoms that are neither float nor
/// symbol decode as an empty symbol so the list keeps its length.
pub fn decode_atom_list(reader: &mut dyn AtomReader, count: usize) -> AtomList {
    let mut atoms = Vec::with_capacity(count);
    for i in 0..count {
        if i > 0 {
            reader.advance();
        }
        let atom = if reader.is_float() {
            Atom::Float(reader.float())
        } else if reader.is_symbol() {
            Atom::Symbol(reader.symbol())
        } else {
            Atom::Symbol(String::new())
        };
        atoms.push(atom);
    }
    atoms.into()
}
