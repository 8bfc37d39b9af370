//! Scoped error suppression for `@expr`

use phpeval_core::Runtime;

/// Disables error reporting until dropped, then restores the prior setting
///
/// Restoration happens on every exit path, including errors propagated
/// with `?` out of the suppressed evaluation.
pub struct SuppressGuard<'r> {
    rt: &'r mut dyn Runtime,
    prior: bool,
}

impl<'r> SuppressGuard<'r> {
    pub fn new(rt: &'r mut dyn Runtime) -> Self {
        let prior = rt.set_error_reporting(false);
        Self { rt, prior }
    }

    /// The runtime, for evaluation inside the scope
    pub fn runtime(&mut self) -> &mut dyn Runtime {
        &mut *self.rt
    }
}

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.rt.set_error_reporting(self.prior);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpeval_core::{Env, SemanticError};

    #[test]
    fn test_guard_restores_on_drop() {
        let mut env = Env::new();
        {
            let mut guard = SuppressGuard::new(&mut env);
            assert!(!guard.runtime().error_reporting());
            guard
                .runtime()
                .report(SemanticError::undefined_variable("x", 1))
                .unwrap();
        }
        assert!(env.error_reporting());
        assert!(env.diagnostics().is_empty());
    }

    #[test]
    fn test_nested_guards() {
        let mut env = Env::new();
        env.set_error_reporting(false);
        {
            let mut outer = SuppressGuard::new(&mut env);
            let inner = SuppressGuard::new(outer.runtime());
            drop(inner);
            assert!(!outer.runtime().error_reporting());
        }
        assert!(!env.error_reporting());
    }
}
