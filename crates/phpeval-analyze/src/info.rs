//! Analysis results for one function

use std::collections::HashMap;

use phpeval_core::ast::NodeId;
use phpeval_core::InternalError;

use crate::binding::{BindingTable, StorageClass, VarId, VariableBinding};
use crate::facet::TypeFacet;
use crate::issue::Issue;
use crate::state::VarState;

/// What analysis recorded for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeFacts {
    /// Join of the facets of every visit
    pub facet: TypeFacet,
    /// For variable nodes: join of the states the variable had when visited
    pub state: VarState,
    pub var: Option<VarId>,
}

/// Lifecycle of a node with respect to code generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Unanalyzed,
    Analyzed,
    Generated,
}

/// Sealed binding table plus per-node facts of a function
#[derive(Debug)]
pub struct FunctionInfo {
    pub name: String,
    pub is_main: bool,
    pub bindings: BindingTable,
    /// Variables of the parameters, by position
    pub params: Vec<VarId>,
    pub issues: Vec<Issue>,
    /// Conservative restarts the analysis needed
    pub restarts: u32,
    facts: HashMap<NodeId, NodeFacts>,
}

impl FunctionInfo {
    pub(crate) fn new(
        name: String,
        is_main: bool,
        bindings: BindingTable,
        params: Vec<VarId>,
        facts: HashMap<NodeId, NodeFacts>,
    ) -> Self {
        Self {
            name,
            is_main,
            bindings,
            params,
            issues: Vec::new(),
            restarts: 0,
            facts,
        }
    }

    /// Facts of a node; generating a node without them is a consistency error
    pub fn facts(&self, id: NodeId) -> Result<NodeFacts, InternalError> {
        self.facts
            .get(&id)
            .copied()
            .ok_or(InternalError::NotAnalyzed(id))
    }

    pub fn facet(&self, id: NodeId) -> Result<TypeFacet, InternalError> {
        self.facts(id).map(|f| f.facet)
    }

    pub fn state(&self, id: NodeId) -> VarState {
        self.facts
            .get(&id)
            .map(|f| f.state)
            .unwrap_or(VarState::Uninitialized)
    }

    pub fn phase(&self, id: NodeId) -> NodePhase {
        if self.facts.contains_key(&id) {
            NodePhase::Analyzed
        } else {
            NodePhase::Unanalyzed
        }
    }

    pub fn analyzed_nodes(&self) -> usize {
        self.facts.len()
    }

    pub fn uses_dynamic_scope(&self) -> bool {
        self.bindings.uses_dynamic_scope()
    }

    pub fn binding(&self, id: VarId) -> &VariableBinding {
        self.bindings.get(id)
    }

    pub fn storage(&self, id: VarId) -> StorageClass {
        self.bindings.storage(id)
    }

    /// Storage class of a variable by name
    pub fn storage_of(&self, name: &str) -> Option<StorageClass> {
        self.bindings.find(name).map(|id| self.storage(id))
    }
}
