//! Shared mutable storage locations

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::Value;

/// A storage location several names can denote
///
/// Cloning the handle shares the location; writing through any handle is
/// visible through all of them.
#[derive(Clone, Default)]
pub struct AliasCell(Rc<RefCell<Value>>);

impl AliasCell {
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }

    /// Make this handle denote the same location as `other`
    pub fn rebind(&mut self, other: &AliasCell) {
        self.0 = Rc::clone(&other.0);
    }

    pub fn ptr_eq(&self, other: &AliasCell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn borrow(&self) -> Ref<'_, Value> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Value> {
        self.0.borrow_mut()
    }

    /// Number of handles sharing the location
    pub fn share_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl fmt::Debug for AliasCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AliasCell({:p})", Rc::as_ptr(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_writes() {
        let a = AliasCell::new(Value::Long(1));
        let b = a.clone();
        b.set(Value::Long(2));
        assert_eq!(a.get(), Value::Long(2));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_rebind() {
        let mut a = AliasCell::new(Value::Long(1));
        let b = AliasCell::new(Value::Long(2));
        let old = a.clone();
        a.rebind(&b);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.get(), Value::Long(2));
        assert_eq!(old.get(), Value::Long(1));
    }
}
