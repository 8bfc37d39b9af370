//! Output formatting for phpeval
//!
//! Supports text (colored terminal) and JSON output formats.

use colored::*;
use phpeval_analyze::{FunctionBody, FunctionInfo, Issue, IssueCollection, Severity, StorageClass};
use phpeval_core::{CallCollector, NodeCounter, SemanticError, Value, Visitor};
use serde::Serialize;

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<OutputFormat> {
        match s.to_lowercase().as_str() {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// A runtime diagnostic as reported to the user
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticInfo {
    pub level: &'static str,
    pub message: String,
    pub line: u32,
}

impl From<&SemanticError> for DiagnosticInfo {
    fn from(error: &SemanticError) -> Self {
        Self {
            level: error.kind.label(),
            message: error.message.clone(),
            line: error.line,
        }
    }
}

/// Result of one program run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub strategy: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub diagnostics: Vec<DiagnosticInfo>,
}

impl RunReport {
    pub fn new(strategy: String, output: String, diagnostics: &[SemanticError]) -> Self {
        Self {
            strategy,
            output,
            result: None,
            error: None,
            diagnostics: diagnostics.iter().map(DiagnosticInfo::from).collect(),
        }
    }

    pub fn with_result(mut self, value: &Value) -> Self {
        if !value.is_null() {
            self.result = Some(value.to_display_string());
        }
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Storage decision for one variable
#[derive(Debug, Clone, Serialize)]
pub struct BindingInfo {
    pub name: String,
    pub storage: StorageClass,
}

/// Analysis summary of one function
#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    pub name: String,
    pub restarts: u32,
    /// Expression nodes in the body
    pub nodes: usize,
    /// Functions called by name, first call first
    pub calls: Vec<String>,
    pub bindings: Vec<BindingInfo>,
}

impl FunctionReport {
    pub fn new(info: &FunctionInfo, body: FunctionBody<'_>) -> Self {
        let mut counter = NodeCounter::default();
        counter.traverse_block(body.body);
        let mut collector = CallCollector::default();
        collector.traverse_block(body.body);

        Self {
            name: info.name.clone(),
            restarts: info.restarts,
            nodes: counter.exprs,
            calls: collector.calls.iter().map(|c| c.to_string()).collect(),
            bindings: info
                .bindings
                .iter()
                .map(|b| BindingInfo {
                    name: b.name.clone(),
                    storage: b.storage,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalysisOutput<'a> {
    functions: &'a [FunctionReport],
    issues: &'a IssueCollection,
}

#[derive(Debug, Serialize)]
struct ListingOutput<'a> {
    function: &'a str,
    listing: &'a str,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{}: Failed to serialize output: {}", "Error".red(), e),
    }
}

fn severity_label(severity: Severity) -> ColoredString {
    match severity {
        Severity::Error => "error".red(),
        Severity::Warning => "warning".yellow(),
    }
}

fn print_issue(issue: &Issue) {
    println!(
        "  {}:{} {} {}",
        issue.function,
        issue.line,
        severity_label(issue.severity),
        issue.message
    );
    if let Some(tip) = &issue.tip {
        println!("    {} {}", "tip:".dimmed(), tip);
    }
}

pub fn print_run(format: OutputFormat, report: &RunReport) {
    match format {
        OutputFormat::Text => {
            print!("{}", report.output);
            if !report.output.is_empty() && !report.output.ends_with('\n') {
                println!();
            }
            for diagnostic in &report.diagnostics {
                eprintln!(
                    "{}: {} on line {}",
                    diagnostic.level.yellow(),
                    diagnostic.message,
                    diagnostic.line
                );
            }
            if let Some(result) = &report.result {
                println!("{} {}", "=>".green(), result);
            }
            if let Some(error) = &report.error {
                eprintln!("{}", error.red());
            }
        }
        OutputFormat::Json => print_json(report),
    }
}

pub fn print_listings(format: OutputFormat, listings: &[(String, String)]) {
    match format {
        OutputFormat::Text => {
            for (function, listing) in listings {
                println!("{}", format!("function {}:", function).bold());
                print!("{}", listing);
                println!();
            }
        }
        OutputFormat::Json => {
            let entries: Vec<ListingOutput<'_>> = listings
                .iter()
                .map(|(function, listing)| ListingOutput { function, listing })
                .collect();
            print_json(&entries);
        }
    }
}

pub fn print_analysis(format: OutputFormat, functions: &[FunctionReport], issues: &IssueCollection) {
    match format {
        OutputFormat::Text => {
            for function in functions {
                let restarts = if function.restarts > 0 {
                    format!(" ({} restart(s))", function.restarts)
                } else {
                    String::new()
                };
                println!("{}{}", function.name.bold(), restarts.dimmed());
                println!("  {} node(s)", function.nodes);
                if !function.calls.is_empty() {
                    println!("  calls {}", function.calls.join(", "));
                }
                for binding in &function.bindings {
                    println!("  ${:<16} {}", binding.name, binding.storage);
                }
            }
            println!();
            if issues.is_empty() {
                println!("{}", "No issues found".green());
            } else {
                for issue in issues.issues() {
                    print_issue(issue);
                }
                println!();
                println!(
                    "{} error(s), {} warning(s)",
                    issues.error_count(),
                    issues.warning_count()
                );
            }
        }
        OutputFormat::Json => print_json(&AnalysisOutput { functions, issues }),
    }
}
