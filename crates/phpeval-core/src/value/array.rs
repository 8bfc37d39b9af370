//! Ordered hash map with PHP key normalization

use std::collections::HashMap;
use std::fmt;

use super::alias::AliasCell;
use super::string::PhpString;
use super::Value;

/// Normalized array key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(PhpString),
}

impl ArrayKey {
    /// Key for a string, folding canonical decimal integers
    pub fn from_string(s: PhpString) -> Self {
        match s.as_canonical_int() {
            Some(n) => ArrayKey::Int(n),
            None => ArrayKey::Str(s),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ArrayKey::Int(n) => Value::Long(*n),
            ArrayKey::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(n) => write!(f, "{}", n),
            ArrayKey::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for ArrayKey {
    fn from(n: i64) -> Self {
        ArrayKey::Int(n)
    }
}

impl From<&str> for ArrayKey {
    fn from(s: &str) -> Self {
        ArrayKey::from_string(PhpString::from(s))
    }
}

/// A stored element: a plain value or a shared alias cell
#[derive(Debug, Clone)]
pub enum Entry {
    Value(Value),
    Ref(AliasCell),
}

impl Entry {
    /// The element's current value
    pub fn value(&self) -> Value {
        match self {
            Entry::Value(v) => v.clone(),
            Entry::Ref(cell) => cell.get(),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Entry::Ref(_))
    }
}

/// Mutable access to an element
pub enum EntryMut<'a> {
    Value(&'a mut Value),
    Ref(AliasCell),
}

/// PHP array: insertion-ordered map from [`ArrayKey`] to [`Entry`]
///
/// Removed elements leave holes in `slots` that are compacted lazily.
#[derive(Debug, Clone, Default)]
pub struct PhpArray {
    slots: Vec<Option<(ArrayKey, Entry)>>,
    index: HashMap<ArrayKey, usize>,
    next_index: i64,
}

impl PhpArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &ArrayKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn get_entry(&self, key: &ArrayKey) -> Option<&Entry> {
        let slot = *self.index.get(key)?;
        self.slots[slot].as_ref().map(|(_, entry)| entry)
    }

    /// Value stored under `key`, dereferencing alias cells
    pub fn get(&self, key: &ArrayKey) -> Option<Value> {
        self.get_entry(key).map(Entry::value)
    }

    fn note_key(&mut self, key: &ArrayKey) {
        if let ArrayKey::Int(n) = key {
            if *n >= self.next_index {
                self.next_index = n.saturating_add(1);
            }
        }
    }

    fn insert_entry(&mut self, key: ArrayKey, entry: Entry) -> usize {
        self.note_key(&key);
        let slot = self.slots.len();
        self.index.insert(key.clone(), slot);
        self.slots.push(Some((key, entry)));
        slot
    }

    fn slot_entry_mut(&mut self, slot: usize) -> &mut Entry {
        match &mut self.slots[slot] {
            Some((_, entry)) => entry,
            None => unreachable!("index points at a removed slot"),
        }
    }

    /// Store `value` under `key`; an existing alias cell is written through
    pub fn insert(&mut self, key: ArrayKey, value: Value) {
        match self.index.get(&key) {
            Some(&slot) => match self.slot_entry_mut(slot) {
                Entry::Ref(cell) => cell.set(value),
                entry => *entry = Entry::Value(value),
            },
            None => {
                self.insert_entry(key, Entry::Value(value));
            }
        }
    }

    /// Next integer key, or `None` once the key space is exhausted
    pub fn next_key(&self) -> Option<ArrayKey> {
        if self.next_index == i64::MAX && self.contains_key(&ArrayKey::Int(i64::MAX)) {
            None
        } else {
            Some(ArrayKey::Int(self.next_index))
        }
    }

    /// Append under the next integer key
    pub fn push(&mut self, value: Value) -> Option<ArrayKey> {
        let key = self.next_key()?;
        self.insert_entry(key.clone(), Entry::Value(value));
        Some(key)
    }

    pub fn push_ref(&mut self, cell: AliasCell) -> Option<ArrayKey> {
        let key = self.next_key()?;
        self.insert_entry(key.clone(), Entry::Ref(cell));
        Some(key)
    }

    /// Bind `key` to `cell`, replacing whatever was there
    pub fn set_ref(&mut self, key: ArrayKey, cell: AliasCell) {
        match self.index.get(&key) {
            Some(&slot) => *self.slot_entry_mut(slot) = Entry::Ref(cell),
            None => {
                self.insert_entry(key, Entry::Ref(cell));
            }
        }
    }

    /// Alias cell for `key`, converting the element into a reference
    ///
    /// A missing element is created as null.
    pub fn get_ref(&mut self, key: ArrayKey) -> AliasCell {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => self.insert_entry(key, Entry::Value(Value::Null)),
        };
        let entry = self.slot_entry_mut(slot);
        match entry {
            Entry::Ref(cell) => cell.clone(),
            Entry::Value(v) => {
                let cell = AliasCell::new(std::mem::take(v));
                *entry = Entry::Ref(cell.clone());
                cell
            }
        }
    }

    /// Mutable access to an element, creating it as null when `create` is set
    pub fn entry_mut(&mut self, key: ArrayKey, create: bool) -> Option<EntryMut<'_>> {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None if create => self.insert_entry(key, Entry::Value(Value::Null)),
            None => return None,
        };
        Some(match self.slot_entry_mut(slot) {
            Entry::Value(v) => EntryMut::Value(v),
            Entry::Ref(cell) => EntryMut::Ref(cell.clone()),
        })
    }

    pub fn remove(&mut self, key: &ArrayKey) -> Option<Entry> {
        let slot = self.index.remove(key)?;
        let removed = self.slots[slot].take().map(|(_, entry)| entry);
        if self.slots.len() > 8 && self.slots.len() > self.index.len() * 2 {
            self.compact();
        }
        removed
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, item) in self.slots.iter().enumerate() {
            if let Some((key, _)) = item {
                self.index.insert(key.clone(), slot);
            }
        }
    }

    /// Elements in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Entry)> {
        self.slots
            .iter()
            .filter_map(|item| item.as_ref().map(|(k, e)| (k, e)))
    }

    pub fn keys(&self) -> Vec<ArrayKey> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Values in order, dereferencing alias cells
    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, e)| e.value()).collect()
    }

    /// `$a + $b`: keys of `self` win
    pub fn union(&self, other: &PhpArray) -> PhpArray {
        let mut result = self.clone();
        for (key, entry) in other.iter() {
            if !result.contains_key(key) {
                result.insert_entry(key.clone(), entry.clone());
            }
        }
        result
    }

    /// Re-key integer keys from zero, keeping string keys
    pub fn reindex(&mut self) {
        let items: Vec<(ArrayKey, Entry)> = self.slots.drain(..).flatten().collect();
        self.index.clear();
        self.next_index = 0;
        for (key, entry) in items {
            let key = match key {
                ArrayKey::Int(_) => ArrayKey::Int(self.next_index),
                other => other,
            };
            self.insert_entry(key, entry);
        }
    }
}

impl FromIterator<Value> for PhpArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut array = PhpArray::new();
        for value in iter {
            array.push(value);
        }
        array
    }
}

impl FromIterator<(ArrayKey, Value)> for PhpArray {
    fn from_iter<I: IntoIterator<Item = (ArrayKey, Value)>>(iter: I) -> Self {
        let mut array = PhpArray::new();
        for (key, value) in iter {
            array.insert(key, value);
        }
        array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_get() {
        let mut arr = PhpArray::new();
        arr.push(Value::Long(10));
        arr.push(Value::Long(20));
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.get(&ArrayKey::Int(0)), Some(Value::Long(10)));
        assert_eq!(arr.get(&ArrayKey::Int(1)), Some(Value::Long(20)));
    }

    #[test]
    fn test_numeric_string_keys_fold() {
        let mut arr = PhpArray::new();
        arr.insert(ArrayKey::from("5"), Value::Long(1));
        assert!(arr.contains_key(&ArrayKey::Int(5)));
        assert_eq!(arr.push(Value::Long(2)), Some(ArrayKey::Int(6)));
        arr.insert(ArrayKey::from("05"), Value::Long(3));
        assert_eq!(arr.len(), 3);
    }

    #[test]
    fn test_insertion_order_survives_removal() {
        let mut arr = PhpArray::new();
        for i in 0..20 {
            arr.push(Value::Long(i));
        }
        for i in 0..15 {
            arr.remove(&ArrayKey::Int(i));
        }
        assert_eq!(
            arr.values(),
            (15..20).map(Value::Long).collect::<Vec<_>>()
        );
        // next index is not reset by removals
        assert_eq!(arr.push(Value::Null), Some(ArrayKey::Int(20)));
    }

    #[test]
    fn test_get_ref_converts_entry() {
        let mut arr = PhpArray::new();
        arr.insert(ArrayKey::from("a"), Value::Long(1));
        let cell = arr.get_ref(ArrayKey::from("a"));
        cell.set(Value::Long(2));
        assert_eq!(arr.get(&ArrayKey::from("a")), Some(Value::Long(2)));

        arr.insert(ArrayKey::from("a"), Value::Long(3));
        assert_eq!(cell.get(), Value::Long(3));
    }

    #[test]
    fn test_copies_share_reference_entries() {
        let mut arr = PhpArray::new();
        let cell = arr.get_ref(ArrayKey::Int(0));
        let copy = arr.clone();
        cell.set(Value::Long(7));
        assert_eq!(copy.get(&ArrayKey::Int(0)), Some(Value::Long(7)));
    }

    #[test]
    fn test_union_keeps_left_keys() {
        let left: PhpArray = vec![Value::Long(1)].into_iter().collect();
        let right: PhpArray = vec![Value::Long(9), Value::Long(2)].into_iter().collect();
        let union = left.union(&right);
        assert_eq!(union.values(), vec![Value::Long(1), Value::Long(2)]);
    }
}
