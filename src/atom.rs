//! Atom table: interning of names to unique, identity-comparable handles.
//!
//! The source (`atom.c`) chains names into a fixed-size bucket array and
//! never frees an entry. The contract (`spec.md` §4.A) only requires O(1)
//! identity equality, so this reimplementation interns into a `HashMap` and
//! keeps a side vector for the reverse (debug-dump) lookup, rather than
//! reproducing the bucket-array layout.

use std::collections::HashMap;

/// A unique identity for an interned name. Equality is identity (`PartialEq`
/// on the wrapped index, never on the string contents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

/// Process-wide table of interned names. Atoms are never reclaimed, matching
/// the source's lifetime contract.
#[derive(Debug, Default)]
pub struct AtomTable {
    by_name: HashMap<Box<str>, Atom>,
    names: Vec<Box<str>>,
}

impl AtomTable {
    pub fn new() -> Self {
        AtomTable {
            by_name: HashMap::new(),
            names: Vec::new(),
        }
    }

    /// Returns the unique atom for `name`, interning it on first sight.
    pub fn intern(&mut self, name: &str) -> Atom {
        if let Some(&atom) = self.by_name.get(name) {
            return atom;
        }
        let atom = Atom(self.names.len() as u32);
        self.names.push(name.into());
        self.by_name.insert(name.into(), atom);
        atom
    }

    pub fn name(&self, atom: Atom) -> &str {
        &self.names[atom.0 as usize]
    }
}

impl Atom {
    /// Constructs an atom with an arbitrary identity, for tests that only
    /// need distinct handles and have no `AtomTable` at hand.
    #[cfg(test)]
    pub fn for_test(n: u32) -> Atom {
        Atom(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_intern_to_the_same_atom() {
        let mut table = AtomTable::new();
        let a = table.intern("Main");
        let b = table.intern("Main");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_intern_to_distinct_atoms() {
        let mut table = AtomTable::new();
        let a = table.intern("Main");
        let b = table.intern("Rd");
        assert_ne!(a, b);
    }

    #[test]
    fn name_round_trips() {
        let mut table = AtomTable::new();
        let a = table.intern("x");
        assert_eq!(table.name(a), "x");
    }
}
