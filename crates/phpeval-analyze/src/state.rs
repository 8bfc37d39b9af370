//! Flow-sensitive variable state
//!
//! [`VarState`] records what is known about a variable's definedness at one
//! program point. [`StateMap`] holds the state of every variable of a
//! function and is cloned at branches and merged at join points.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::binding::VarId;

/// Definedness of a variable at a program point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VarState {
    /// Not analyzed yet; the identity of [`VarState::merge`]
    Uninitialized,
    /// Definitely not defined
    Unset,
    /// Definitely defined
    Valid,
    /// Defined on some paths only
    Unknown,
}

impl VarState {
    /// Join of two states
    pub fn merge(self, other: VarState) -> VarState {
        match (self, other) {
            (VarState::Uninitialized, s) | (s, VarState::Uninitialized) => s,
            (a, b) if a == b => a,
            _ => VarState::Unknown,
        }
    }

    pub fn is_valid(self) -> bool {
        self == VarState::Valid
    }
}

impl std::fmt::Display for VarState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VarState::Uninitialized => "uninitialized",
            VarState::Unset => "unset",
            VarState::Valid => "valid",
            VarState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// State of every variable at one program point
///
/// A variable without an entry is `Unset`, or `Unknown` once the function
/// has touched its scope dynamically. An unreachable map is the identity of
/// [`StateMap::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMap {
    states: BTreeMap<VarId, VarState>,
    dynamic: bool,
    unreachable: bool,
}

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The state after a jump: nothing flows out of it
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn get(&self, id: VarId) -> VarState {
        match self.states.get(&id) {
            Some(state) => *state,
            None if self.dynamic => VarState::Unknown,
            None => VarState::Unset,
        }
    }

    pub fn set(&mut self, id: VarId, state: VarState) {
        self.states.insert(id, state);
    }

    /// Forget everything after the scope was read or written by name
    pub fn invalidate(&mut self) {
        for state in self.states.values_mut() {
            *state = VarState::Unknown;
        }
        self.dynamic = true;
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn mark_unreachable(&mut self) {
        self.unreachable = true;
    }

    pub fn is_reachable(&self) -> bool {
        !self.unreachable
    }

    /// Join `other` into `self`
    pub fn merge(&mut self, other: &StateMap) {
        if other.unreachable {
            return;
        }
        if self.unreachable {
            *self = other.clone();
            return;
        }
        let keys: Vec<VarId> = self
            .states
            .keys()
            .chain(other.states.keys())
            .copied()
            .collect();
        let mut merged = BTreeMap::new();
        for id in keys {
            merged.insert(id, self.get(id).merge(other.get(id)));
        }
        self.states = merged;
        self.dynamic |= other.dynamic;
    }

    pub fn merged(mut self, other: &StateMap) -> StateMap {
        self.merge(other);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [VarState; 4] = [
        VarState::Uninitialized,
        VarState::Unset,
        VarState::Valid,
        VarState::Unknown,
    ];

    #[test]
    fn test_merge_is_semilattice() {
        for a in ALL {
            assert_eq!(a.merge(a), a);
            for b in ALL {
                assert_eq!(a.merge(b), b.merge(a));
                for c in ALL {
                    assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
                }
            }
        }
    }

    #[test]
    fn test_uninitialized_is_identity() {
        for a in ALL {
            assert_eq!(VarState::Uninitialized.merge(a), a);
        }
        assert_eq!(VarState::Valid.merge(VarState::Unset), VarState::Unknown);
    }

    #[test]
    fn test_map_merge_treats_missing_as_unset() {
        let x = VarId(0);
        let mut then = StateMap::new();
        then.set(x, VarState::Valid);
        let otherwise = StateMap::new();
        then.merge(&otherwise);
        assert_eq!(then.get(x), VarState::Unknown);
    }

    #[test]
    fn test_unreachable_is_identity() {
        let x = VarId(0);
        let mut returned = StateMap::new();
        returned.mark_unreachable();
        let mut live = StateMap::new();
        live.set(x, VarState::Valid);

        let merged = returned.clone().merged(&live);
        assert_eq!(merged.get(x), VarState::Valid);
        assert!(merged.is_reachable());
        live.merge(&returned);
        assert_eq!(live.get(x), VarState::Valid);
    }

    #[test]
    fn test_invalidate() {
        let x = VarId(0);
        let mut map = StateMap::new();
        map.set(x, VarState::Valid);
        map.invalidate();
        assert_eq!(map.get(x), VarState::Unknown);
        assert_eq!(map.get(VarId(9)), VarState::Unknown);
    }
}
