//! Configuration file support for phpeval
//!
//! Loads `.phpeval.toml` from the current directory or its parents.

use anyhow::{Context, Result};
use phpeval_analyze::AnalyzeConfig;
use phpeval_engine::Strategy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = ".phpeval.toml";

/// Contents of `.phpeval.toml`; every section is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyze: AnalyzeConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Execution strategy: "interpret" or "compile"
    pub strategy: Strategy,
    /// Maximum number of calls a run may make
    pub budget: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// "text" or "json"; `--format` wins
    pub format: Option<String>,
}

impl Config {
    /// Nearest `.phpeval.toml` at or above the working directory
    pub fn load() -> Result<Option<(Config, PathBuf)>> {
        Self::load_from(std::env::current_dir()?)
    }

    pub fn load_from(start_dir: PathBuf) -> Result<Option<(Config, PathBuf)>> {
        let found = start_dir
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|candidate| candidate.is_file());
        match found {
            Some(path) => Ok(Some((Self::load_path(&path)?, path))),
            None => Ok(None),
        }
    }

    pub fn load_path(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_parent_directory() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join(CONFIG_FILE),
            r#"
[analyze]
report_maybe_undefined = false

[run]
strategy = "compile"
budget = 1000

[output]
format = "json"
"#,
        )
        .unwrap();
        let nested = root.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = Config::load_from(nested).unwrap().unwrap();
        assert_eq!(path, root.path().join(CONFIG_FILE));
        assert!(!config.analyze.report_maybe_undefined);
        assert_eq!(config.analyze.max_restarts, AnalyzeConfig::default().max_restarts);
        assert_eq!(config.run.strategy, Strategy::Compile);
        assert_eq!(config.run.budget, Some(1000));
        assert_eq!(config.output.format.as_deref(), Some("json"));
    }

    #[test]
    fn test_missing_config() {
        let root = TempDir::new().unwrap();
        assert!(Config::load_from(root.path().to_path_buf()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_strategy_is_reported() {
        let root = TempDir::new().unwrap();
        let path = root.path().join(CONFIG_FILE);
        fs::write(&path, "[run]\nstrategy = \"jit\"\n").unwrap();
        let err = Config::load_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.run.strategy, Strategy::Interpret);
        assert!(config.run.budget.is_none());
        assert!(config.analyze.is_dynamic_scope_function("compact"));
    }
}
