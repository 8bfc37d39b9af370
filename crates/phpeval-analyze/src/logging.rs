//! Debug logging for phpeval
//!
//! Records per-function analysis, restarts, derived storage classes and
//! compilation events to a file, for tracing why a variable ended up boxed or
//! why a call went through the generic path.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::binding::BindingTable;

static LOGGER: Mutex<Option<DebugLogger>> = Mutex::new(None);

/// Logger writing timestamped lines to a file
pub struct DebugLogger {
    file: File,
    path: PathBuf,
}

impl DebugLogger {
    /// Truncates an existing file at `path`
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, message: &str) {
        let now = chrono::Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(self.file, "{} {}", now, message);
        let _ = self.file.flush();
    }

    /// A title framed by rules of `width` copies of `rule`
    fn banner(&mut self, rule: char, width: usize, title: &str) {
        let line: String = std::iter::repeat(rule).take(width).collect();
        self.log(&line);
        self.log(title);
        self.log(&line);
    }

    pub fn section(&mut self, title: &str) {
        self.banner('=', 60, title);
    }

    pub fn subsection(&mut self, title: &str) {
        self.banner('-', 40, title);
    }
}

fn with_logger(f: impl FnOnce(&mut DebugLogger)) {
    if let Ok(mut guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_mut() {
            f(logger);
        }
    }
}

/// Start logging to `log_path`, or to a timestamped file in the temp dir
pub fn init_logger(log_path: Option<&Path>) -> std::io::Result<PathBuf> {
    let path = match log_path {
        Some(path) => path.to_path_buf(),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            std::env::temp_dir().join(format!("phpeval-{}.log", stamp))
        }
    };
    let logger = DebugLogger::new(&path)?;
    if let Ok(mut guard) = LOGGER.lock() {
        *guard = Some(logger);
    }
    Ok(path)
}

/// Stop logging and close the file
pub fn shutdown() {
    if let Ok(mut guard) = LOGGER.lock() {
        guard.take();
    }
}

pub fn log(message: &str) {
    with_logger(|logger| logger.log(message));
}

pub fn section(title: &str) {
    with_logger(|logger| logger.section(title));
}

pub fn subsection(title: &str) {
    with_logger(|logger| logger.subsection(title));
}

pub fn is_enabled() -> bool {
    LOGGER.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

pub fn log_config_load(path: &Path) {
    section("CONFIG");
    log(&format!("Using {}", path.display()));
}

pub fn log_function_start(name: &str, params: usize) {
    subsection(&format!("ANALYZING {}", name));
    log(&format!("Parameters: {}", params));
}

/// Log a conservative restart and the variables it pins
pub fn log_restart(name: &str, round: u32, pinned: &[String]) {
    log(&format!(
        "[{}] restart {}: boxing ${}",
        name,
        round,
        pinned.join(", $")
    ));
}

/// Log the storage class derived for every variable
pub fn log_storage(name: &str, table: &BindingTable) {
    if !is_enabled() {
        return;
    }
    if table.uses_dynamic_scope() {
        log(&format!("[{}] uses dynamic scope", name));
    }
    for binding in table.iter() {
        log(&format!("  ${} -> {}", binding.name, binding.storage));
    }
}

pub fn log_translation(name: &str, ops: usize) {
    log(&format!("Translated {} into {} ops", name, ops));
}

/// Log a call left on the generic path because its callee is mid-compilation
pub fn log_compile_cycle(caller: &str, callee: &str) {
    log(&format!(
        "[{}] {} is being compiled; calling it by name",
        caller, callee
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_writes_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug.log");
        let mut logger = DebugLogger::new(&path).unwrap();
        logger.section("HEADER");
        logger.log("hello");
        drop(logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("HEADER"));
        assert!(contents.lines().any(|line| line.ends_with(" hello")));
        assert_eq!(contents.lines().count(), 4);
    }
}
