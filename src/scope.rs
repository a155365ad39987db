//! Scope stack: name → entity mapping with mark/restore (`spec.md` §4.D),
//! grounded on `scope.c`. A linear top-down scan matches the source; the
//! contract never requires better than O(depth) lookup, and LIM programs
//! nest shallowly.

use crate::atom::Atom;

/// One binding's payload. Mirrors the source's `entity` union (`LOCAL`,
/// `GLOBAL`, `PROCEDURE`); the `MARK` sentinel variant is kept out of band
/// on `ScopeEntry` instead, since it never carries a name. Built-ins are
/// not bound in this scope at all -- they are fixed, unshadowable-by-default
/// names looked up by the annotator only once a user-scope lookup misses
/// (`tree::builtin_signature`/`tree::builtin_mark` are the source of truth
/// for their fixed mark and signature).
#[derive(Debug, Clone, Copy)]
pub enum Entity {
    /// Local variable; working (pre-final) index, always its final index
    /// once assigned -- locals never get reindexed in pass 3.
    Local(usize),
    /// Global variable; *raw* index assigned during pass 1/2, before pass
    /// 3's mutable/immutable partition reindexes it.
    Global(usize),
    /// User procedure; index into `Program::procs`.
    Procedure(usize),
}

enum ScopeEntry {
    Mark,
    Binding(Atom, Entity),
}

#[derive(Default)]
pub struct Scope {
    stack: Vec<ScopeEntry>,
}

impl Scope {
    pub fn new() -> Self {
        Scope { stack: Vec::new() }
    }

    pub fn bind(&mut self, name: Atom, entity: Entity) {
        self.stack.push(ScopeEntry::Binding(name, entity));
    }

    /// Innermost-first lookup.
    pub fn lookup(&self, name: Atom) -> Option<&Entity> {
        for entry in self.stack.iter().rev() {
            if let ScopeEntry::Binding(n, e) = entry {
                if *n == name {
                    return Some(e);
                }
            }
        }
        None
    }

    /// True if `name` is bound in the *innermost* bracket only (used by
    /// pass 1's multiple-definition check, which must not see bindings from
    /// an enclosing bracket as a conflict -- though at top level there is
    /// only ever one bracket).
    pub fn lookup_innermost(&self, name: Atom) -> Option<&Entity> {
        for entry in self.stack.iter().rev() {
            match entry {
                ScopeEntry::Mark => return None,
                ScopeEntry::Binding(n, e) if *n == name => return Some(e),
                ScopeEntry::Binding(_, _) => {}
            }
        }
        None
    }

    pub fn save(&mut self) {
        self.stack.push(ScopeEntry::Mark);
    }

    /// Pops bindings until and including the last `MARK`. Aborts (an
    /// internal invariant violation, matching `scope.c`'s `abort()`) if the
    /// stack runs out first.
    pub fn restore(&mut self) {
        loop {
            match self.stack.pop() {
                Some(ScopeEntry::Mark) => return,
                Some(ScopeEntry::Binding(_, _)) => continue,
                None => panic!("scope: restore() with no matching save()"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(n: u32) -> Atom {
        Atom::for_test(n)
    }

    #[test]
    fn lookup_finds_innermost_binding() {
        let mut s = Scope::new();
        s.bind(atom(1), Entity::Local(0));
        s.save();
        s.bind(atom(1), Entity::Local(1));
        match s.lookup(atom(1)) {
            Some(Entity::Local(1)) => {}
            other => panic!("expected innermost Local(1), got {:?}", other.is_some()),
        }
    }

    #[test]
    fn restore_pops_back_to_mark() {
        let mut s = Scope::new();
        s.bind(atom(1), Entity::Local(0));
        s.save();
        s.bind(atom(2), Entity::Local(1));
        s.restore();
        assert!(s.lookup(atom(2)).is_none());
        assert!(s.lookup(atom(1)).is_some());
    }

    #[test]
    #[should_panic]
    fn restore_without_save_panics() {
        let mut s = Scope::new();
        s.restore();
    }

    #[test]
    fn procedure_binding_round_trips() {
        let mut s = Scope::new();
        s.bind(atom(9), Entity::Procedure(3));
        match s.lookup(atom(9)) {
            Some(Entity::Procedure(3)) => {}
            _ => panic!("expected Procedure(3) binding"),
        }
    }
}
