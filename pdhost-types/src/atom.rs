//! Atoms: the tagged float/symbol values carried by engine messages.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// A single value in an engine list or message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    Float(f32),
    Symbol(String),
}

impl Atom {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Atom::Float(v) => Some(*v),
            Atom::Symbol(_) => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Atom::Symbol(s) => Some(s),
            Atom::Float(_) => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Float(v) => write!(f, "{}", v),
            Atom::Symbol(s) => write!(f, "{}", s),
        }
    }
}

/// An ordered run of atoms whose length is fixed once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomList(Box<[Atom]>);

impl AtomList {
    pub fn empty() -> Self {
        Self(Box::new([]))
    }

    pub fn into_vec(self) -> Vec<Atom> {
        self.0.into_vec()
    }
}

impl Deref for AtomList {
    type Target = [Atom];

    fn deref(&self) -> &[Atom] {
        &self.0
    }
}

impl From<Vec<Atom>> for AtomList {
    fn from(atoms: Vec<Atom>) -> Self {
        Self(atoms.into_boxed_slice())
    }
}

impl FromIterator<Atom> for AtomList {
    fn from_iter<I: IntoIterator<Item = Atom>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a AtomList {
    type Item = &'a Atom;
    type IntoIter = std::slice::Iter<'a, Atom>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for AtomList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, atom) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", atom)?;
        }
        Ok(())
    }
}

/// A loosely-typed outgoing argument for list and message sends.
///
/// Numeric variants become float atoms and `Str` becomes a symbol atom.
/// `Bool` and `Blob` have no atom representation and are rejected by the
/// encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bool(bool),
    Blob(Vec<u8>),
}

impl Arg {
    /// Short type name used in encoder diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Arg::Int(_) => "int",
            Arg::Float(_) => "float",
            Arg::Double(_) => "double",
            Arg::Str(_) => "string",
            Arg::Bool(_) => "bool",
            Arg::Blob(_) => "blob",
        }
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v as i64)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Float(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Double(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_accessors() {
        assert_eq!(Atom::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Atom::Float(1.5).as_symbol(), None);
        assert_eq!(Atom::Symbol("x".into()).as_symbol(), Some("x"));
    }

    #[test]
    fn atom_list_displays_space_separated() {
        let list: AtomList = vec![Atom::Float(1.0), Atom::Symbol("foo".into()), Atom::Float(2.5)].into();
        assert_eq!(list.to_string(), "1 foo 2.5");
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn empty_list_has_no_atoms() {
        assert!(AtomList::empty().is_empty());
        assert_eq!(AtomList::empty(), AtomList::default());
    }

    #[test]
    fn arg_conversions_pick_variant() {
        assert_eq!(Arg::from(3), Arg::Int(3));
        assert_eq!(Arg::from(2.5f64), Arg::Double(2.5));
        assert_eq!(Arg::from("foo"), Arg::Str("foo".into()));
        assert_eq!(Arg::from(true).type_name(), "bool");
    }
}
