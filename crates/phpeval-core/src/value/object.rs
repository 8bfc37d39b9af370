//! Objects with handle semantics

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::array::{ArrayKey, PhpArray};
use super::alias::AliasCell;
use super::Value;

thread_local! {
    static NEXT_OBJECT_ID: std::cell::Cell<u64> = const { std::cell::Cell::new(1) };
}

fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// Object state: class name and dynamic fields
#[derive(Debug)]
pub struct PhpObject {
    pub class_name: String,
    pub id: u64,
    pub fields: PhpArray,
}

/// Handle to a shared object; copying a value copies the handle
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<PhpObject>>);

impl ObjectRef {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self::with_fields(class_name, PhpArray::new())
    }

    pub fn with_fields(class_name: impl Into<String>, fields: PhpArray) -> Self {
        Self(Rc::new(RefCell::new(PhpObject {
            class_name: class_name.into(),
            id: next_object_id(),
            fields,
        })))
    }

    /// A fresh `stdClass` instance
    pub fn std_class() -> Self {
        Self::new("stdClass")
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn class_name(&self) -> String {
        self.0.borrow().class_name.clone()
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.0.borrow().fields.get(&ArrayKey::from(name))
    }

    pub fn set_field(&self, name: &str, value: Value) {
        self.0.borrow_mut().fields.insert(ArrayKey::from(name), value);
    }

    pub fn field_ref(&self, name: &str) -> AliasCell {
        self.0.borrow_mut().fields.get_ref(ArrayKey::from(name))
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn borrow(&self) -> Ref<'_, PhpObject> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, PhpObject> {
        self.0.borrow_mut()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(object) => write!(f, "{}#{}", object.class_name, object.id),
            Err(_) => write!(f, "object(busy)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_fields() {
        let a = ObjectRef::std_class();
        let b = a.clone();
        b.set_field("x", Value::Long(1));
        assert_eq!(a.get_field("x"), Some(Value::Long(1)));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(ObjectRef::std_class().id(), ObjectRef::std_class().id());
    }
}
