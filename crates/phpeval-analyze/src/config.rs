//! Analysis settings
//!
//! Read from the `[analyze]` table of `.phpeval.toml`.

use serde::{Deserialize, Serialize};

/// Functions that read or write their caller's variables by name
pub const DEFAULT_DYNAMIC_SCOPE_FUNCTIONS: &[&str] =
    &["extract", "compact", "get_defined_vars", "parse_str"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeConfig {
    /// Calls to these functions put the caller in dynamic-scope mode
    pub dynamic_scope_functions: Vec<String>,
    /// Report reads of variables defined on some paths only
    pub report_maybe_undefined: bool,
    /// Restarts before every read variable is boxed outright
    pub max_restarts: u32,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            dynamic_scope_functions: DEFAULT_DYNAMIC_SCOPE_FUNCTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            report_maybe_undefined: true,
            max_restarts: 8,
        }
    }
}

impl AnalyzeConfig {
    pub fn is_dynamic_scope_function(&self, name: &str) -> bool {
        self.dynamic_scope_functions
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzeConfig::default();
        assert!(config.is_dynamic_scope_function("EXTRACT"));
        assert!(!config.is_dynamic_scope_function("strlen"));
        assert!(config.report_maybe_undefined);
    }

    #[test]
    fn test_partial_toml() {
        let config: AnalyzeConfig = toml::from_str(
            r#"
            dynamic_scope_functions = ["my_extract"]
            "#,
        )
        .unwrap();
        assert!(config.is_dynamic_scope_function("my_extract"));
        assert!(!config.is_dynamic_scope_function("extract"));
        assert_eq!(config.max_restarts, 8);
    }
}
