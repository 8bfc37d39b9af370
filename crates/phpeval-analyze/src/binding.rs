//! Variable Binding Table
//!
//! One [`VariableBinding`] per variable name of a function, stored in an
//! arena and addressed by [`VarId`]. Bindings are created on first reference
//! and only ever gain flags while the function is analyzed; [`BindingTable::seal`]
//! then derives each variable's [`StorageClass`] and the table becomes
//! read-only.

use std::collections::HashMap;

use serde::Serialize;

use crate::facet::TypeFacet;

/// Handle of a binding within its function's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Physical representation chosen for a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StorageClass {
    PrimitiveLong,
    PrimitiveDouble,
    PrimitiveBoolean,
    PrimitiveString,
    /// A private `Value` slot
    BoxedValue,
    /// A slot holding an alias cell other names may share
    AliasCell,
    /// Resolved by name in the runtime's symbol table on every access
    DynamicLookup,
}

impl StorageClass {
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            StorageClass::PrimitiveLong
                | StorageClass::PrimitiveDouble
                | StorageClass::PrimitiveBoolean
                | StorageClass::PrimitiveString
        )
    }

    /// Whether the storage can be bound to a shared alias cell
    pub fn holds_reference(self) -> bool {
        matches!(self, StorageClass::AliasCell | StorageClass::DynamicLookup)
    }

    /// Facet of values read straight from this storage
    pub fn facet(self) -> TypeFacet {
        match self {
            StorageClass::PrimitiveLong => TypeFacet::Long,
            StorageClass::PrimitiveDouble => TypeFacet::Double,
            StorageClass::PrimitiveBoolean => TypeFacet::Boolean,
            StorageClass::PrimitiveString => TypeFacet::String,
            _ => TypeFacet::Value,
        }
    }

    fn for_facet(facet: TypeFacet) -> StorageClass {
        match facet {
            TypeFacet::Long => StorageClass::PrimitiveLong,
            TypeFacet::Double => StorageClass::PrimitiveDouble,
            TypeFacet::Boolean => StorageClass::PrimitiveBoolean,
            TypeFacet::String => StorageClass::PrimitiveString,
            TypeFacet::Value => StorageClass::BoxedValue,
        }
    }
}

impl std::fmt::Display for StorageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageClass::PrimitiveLong => "long",
            StorageClass::PrimitiveDouble => "double",
            StorageClass::PrimitiveBoolean => "boolean",
            StorageClass::PrimitiveString => "string",
            StorageClass::BoxedValue => "boxed",
            StorageClass::AliasCell => "alias-cell",
            StorageClass::DynamicLookup => "dynamic",
        };
        f.write_str(name)
    }
}

/// Everything analysis learned about one variable
#[derive(Debug, Clone, Serialize)]
pub struct VariableBinding {
    pub id: VarId,
    pub name: String,
    /// Parameter position, for arguments
    pub argument: Option<usize>,
    pub is_reference_argument: bool,
    pub is_assigned: bool,
    pub is_aliased: bool,
    pub is_global: bool,
    /// Read while possibly undefined, or used as a container
    pub needs_value: bool,
    /// Forced to boxed storage by a restart
    pub pinned: bool,
    /// Join of the facets of all values assigned
    pub assigned_facet: Option<TypeFacet>,
    /// Join of the facets reads observed
    pub read_facet: Option<TypeFacet>,
    pub storage: StorageClass,
}

impl VariableBinding {
    fn new(id: VarId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            argument: None,
            is_reference_argument: false,
            is_assigned: false,
            is_aliased: false,
            is_global: false,
            needs_value: false,
            pinned: false,
            assigned_facet: None,
            read_facet: None,
            storage: StorageClass::BoxedValue,
        }
    }

    pub fn is_argument(&self) -> bool {
        self.argument.is_some()
    }

    fn must_box(&self, dynamic_scope: bool) -> bool {
        dynamic_scope
            || self.pinned
            || self.needs_value
            || self.is_aliased
            || self.is_global
            || self.is_argument()
    }

    /// Facet a read of this variable yields under the current flags
    pub fn effective_facet(&self, dynamic_scope: bool) -> TypeFacet {
        if self.must_box(dynamic_scope) {
            TypeFacet::Value
        } else {
            self.assigned_facet.unwrap_or(TypeFacet::Value)
        }
    }

    fn derive_storage(&self, dynamic_scope: bool) -> StorageClass {
        if dynamic_scope || self.is_global {
            StorageClass::DynamicLookup
        } else if self.is_aliased || self.is_argument() {
            StorageClass::AliasCell
        } else {
            StorageClass::for_facet(self.effective_facet(false))
        }
    }
}

/// Per-function arena of variable bindings
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: Vec<VariableBinding>,
    by_name: HashMap<String, VarId>,
    uses_dynamic_scope: bool,
    sealed: bool,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `name`, creating the binding on first reference
    pub fn lookup(&mut self, name: &str) -> VarId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        debug_assert!(!self.sealed, "new variable after sealing");
        let id = VarId(self.bindings.len() as u32);
        self.bindings.push(VariableBinding::new(id, name));
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn find(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: VarId) -> &VariableBinding {
        &self.bindings[id.index()]
    }

    fn get_mut(&mut self, id: VarId) -> &mut VariableBinding {
        debug_assert!(!self.sealed, "binding changed after sealing");
        &mut self.bindings[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn mark_argument(&mut self, id: VarId, index: usize, by_reference: bool) {
        let binding = self.get_mut(id);
        binding.argument = Some(index);
        binding.is_reference_argument |= by_reference;
        binding.is_assigned = true;
    }

    pub fn mark_aliased(&mut self, id: VarId) {
        self.get_mut(id).is_aliased = true;
    }

    pub fn mark_assigned(&mut self, id: VarId, facet: TypeFacet) {
        let binding = self.get_mut(id);
        binding.is_assigned = true;
        binding.assigned_facet = Some(match binding.assigned_facet {
            Some(prior) => prior.join(facet),
            None => facet,
        });
    }

    pub fn mark_global(&mut self, id: VarId) {
        self.get_mut(id).is_global = true;
    }

    pub fn mark_needs_value(&mut self, id: VarId) {
        self.get_mut(id).needs_value = true;
    }

    pub fn mark_uses_dynamic_scope(&mut self) {
        debug_assert!(!self.sealed, "binding changed after sealing");
        self.uses_dynamic_scope = true;
    }

    /// Force boxed storage for a variable
    pub fn pin(&mut self, id: VarId) {
        self.get_mut(id).pinned = true;
    }

    pub fn uses_dynamic_scope(&self) -> bool {
        self.uses_dynamic_scope
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Record a read and return the facet it yields
    pub fn record_read(&mut self, id: VarId) -> TypeFacet {
        let dynamic = self.uses_dynamic_scope;
        let binding = self.get_mut(id);
        let facet = binding.effective_facet(dynamic);
        binding.read_facet = Some(match binding.read_facet {
            Some(prior) => prior.join(facet),
            None => facet,
        });
        facet
    }

    /// Facet reads of `id` yield under the current flags
    pub fn effective_facet(&self, id: VarId) -> TypeFacet {
        self.get(id).effective_facet(self.uses_dynamic_scope)
    }

    /// Variables some read observed with a facet other than their final one
    pub fn modified(&self) -> Vec<VarId> {
        self.bindings
            .iter()
            .filter(|b| match b.read_facet {
                Some(read) => read != b.effective_facet(self.uses_dynamic_scope),
                None => false,
            })
            .map(|b| b.id)
            .collect()
    }

    /// Derive storage classes and freeze the table
    pub fn seal(&mut self) {
        let dynamic = self.uses_dynamic_scope;
        for binding in &mut self.bindings {
            binding.storage = binding.derive_storage(dynamic);
        }
        self.sealed = true;
    }

    pub fn storage(&self, id: VarId) -> StorageClass {
        self.get(id).storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_stable() {
        let mut table = BindingTable::new();
        let a = table.lookup("a");
        let b = table.lookup("b");
        assert_ne!(a, b);
        assert_eq!(table.lookup("a"), a);
        assert_eq!(table.find("b"), Some(b));
        assert_eq!(table.find("A"), None);
    }

    #[test]
    fn test_primitive_storage() {
        let mut table = BindingTable::new();
        let n = table.lookup("n");
        let s = table.lookup("s");
        table.mark_assigned(n, TypeFacet::Long);
        table.mark_assigned(n, TypeFacet::Long);
        table.mark_assigned(s, TypeFacet::String);
        table.seal();
        assert_eq!(table.storage(n), StorageClass::PrimitiveLong);
        assert_eq!(table.storage(s), StorageClass::PrimitiveString);
    }

    #[test]
    fn test_mixed_facets_box() {
        let mut table = BindingTable::new();
        let x = table.lookup("x");
        table.mark_assigned(x, TypeFacet::Long);
        table.mark_assigned(x, TypeFacet::Double);
        table.seal();
        assert_eq!(table.storage(x), StorageClass::BoxedValue);
    }

    #[test]
    fn test_aliased_and_arguments_use_cells() {
        let mut table = BindingTable::new();
        let a = table.lookup("a");
        let p = table.lookup("p");
        let g = table.lookup("g");
        table.mark_assigned(a, TypeFacet::Long);
        table.mark_aliased(a);
        table.mark_argument(p, 0, false);
        table.mark_global(g);
        table.seal();
        assert_eq!(table.storage(a), StorageClass::AliasCell);
        assert_eq!(table.storage(p), StorageClass::AliasCell);
        assert_eq!(table.storage(g), StorageClass::DynamicLookup);
    }

    #[test]
    fn test_dynamic_scope_overrides_everything() {
        let mut table = BindingTable::new();
        let x = table.lookup("x");
        table.mark_assigned(x, TypeFacet::Long);
        table.mark_uses_dynamic_scope();
        table.seal();
        assert_eq!(table.storage(x), StorageClass::DynamicLookup);
    }

    #[test]
    fn test_storage_invariant() {
        let mut table = BindingTable::new();
        let names = ["a", "b", "c", "d"];
        for (i, name) in names.iter().enumerate() {
            let id = table.lookup(name);
            table.mark_assigned(id, TypeFacet::Long);
            match i {
                0 => table.mark_aliased(id),
                1 => table.mark_argument(id, 0, true),
                2 => table.mark_global(id),
                _ => {}
            }
        }
        table.seal();
        for binding in table.iter() {
            if binding.is_aliased || binding.is_argument() || binding.is_global {
                assert!(binding.storage.holds_reference(), "{}", binding.name);
            }
        }
    }

    #[test]
    fn test_read_before_aliasing_is_modified() {
        let mut table = BindingTable::new();
        let x = table.lookup("x");
        table.mark_assigned(x, TypeFacet::Long);
        assert_eq!(table.record_read(x), TypeFacet::Long);
        assert!(table.modified().is_empty());
        table.mark_aliased(x);
        assert_eq!(table.modified(), vec![x]);
    }

    #[test]
    fn test_pinned_reads_are_boxed() {
        let mut table = BindingTable::new();
        let x = table.lookup("x");
        table.pin(x);
        table.mark_assigned(x, TypeFacet::Long);
        assert_eq!(table.record_read(x), TypeFacet::Value);
        table.seal();
        assert_eq!(table.storage(x), StorageClass::BoxedValue);
        assert!(table.modified().is_empty());
    }
}
