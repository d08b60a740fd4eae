//! Refcounted string interning.
//!
//! Symbol and label names recur constantly while linking; interning them
//! means one allocation per distinct name and cheap clones everywhere else.
//! Interned strings are reference counted and the whole table is dropped at
//! tool shutdown along with the interner.

use std::collections::HashSet;
use std::rc::Rc;

#[derive(Default)]
pub struct Interner {
    strings: HashSet<Rc<str>>,
}

impl Interner {
    pub fn new() -> Interner {
        Default::default()
    }

    /// Returns the shared handle for `name`, allocating it on first use.
    pub fn intern(&mut self, name: &str) -> Rc<str> {
        if let Some(existing) = self.strings.get(name) {
            return Rc::clone(existing);
        }
        let handle: Rc<str> = Rc::from(name);
        self.strings.insert(Rc::clone(&handle));
        handle
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn intern_shares_storage() {
        let mut interner = Interner::new();
        let a = interner.intern("__start");
        let b = interner.intern("__start");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn intern_distinct_names() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 2);
    }
}
