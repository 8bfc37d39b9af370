//! Diagnostics the analysis pass reports

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The read yields null on every path
    Error,
    /// The read yields null on some paths
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        })
    }
}

/// One finding, located by function and line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Stable identifier, e.g. `variable.undefined`
    pub check_id: String,
    pub severity: Severity,
    pub message: String,
    pub function: String,
    /// 0 when the node carries no line
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

impl Issue {
    fn new(check_id: &str, severity: Severity, message: String, function: &str, line: u32) -> Self {
        Self {
            check_id: check_id.to_string(),
            severity,
            message,
            function: function.to_string(),
            line,
            tip: None,
        }
    }

    /// Read of a variable no path has assigned
    pub fn undefined_variable(variable: &str, function: &str, line: u32) -> Self {
        let mut issue = Self::new(
            "variable.undefined",
            Severity::Error,
            format!("Undefined variable ${}", variable),
            function,
            line,
        );
        issue.tip = Some(format!("Assign ${} before reading it", variable));
        issue
    }

    /// Read of a variable only some paths assign
    pub fn maybe_undefined_variable(variable: &str, function: &str, line: u32) -> Self {
        Self::new(
            "variable.maybeUndefined",
            Severity::Warning,
            format!("Variable ${} might not be defined", variable),
            function,
            line,
        )
    }

    /// `break` or `continue` with no enclosing loop
    pub fn jump_outside_loop(keyword: &str, function: &str) -> Self {
        Self::new(
            "loop.outside",
            Severity::Error,
            format!("'{}' not in a loop context", keyword),
            function,
            0,
        )
    }
}

/// Issues of a whole program, ordered by function then line
#[derive(Debug, Default, Clone, Serialize)]
#[serde(transparent)]
pub struct IssueCollection {
    issues: Vec<Issue>,
}

impl IssueCollection {
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }
}

impl FromIterator<Issue> for IssueCollection {
    fn from_iter<I: IntoIterator<Item = Issue>>(iter: I) -> Self {
        let mut issues: Vec<Issue> = iter.into_iter().collect();
        issues.sort_by(|a, b| {
            (&a.function, a.line, a.severity, &a.message).cmp(&(
                &b.function,
                b.line,
                b.severity,
                &b.message,
            ))
        });
        Self { issues }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_variable_carries_tip() {
        let issue = Issue::undefined_variable("foo", "f", 10);
        assert_eq!(issue.check_id, "variable.undefined");
        assert_eq!(issue.severity, Severity::Error);
        assert_eq!(issue.message, "Undefined variable $foo");
        assert_eq!(issue.tip.as_deref(), Some("Assign $foo before reading it"));
    }

    #[test]
    fn test_collection_orders_and_counts() {
        let issues: IssueCollection = vec![
            Issue::maybe_undefined_variable("a", "g", 2),
            Issue::jump_outside_loop("break", "{main}"),
            Issue::undefined_variable("b", "f", 7),
            Issue::undefined_variable("c", "f", 3),
        ]
        .into_iter()
        .collect();

        assert_eq!(issues.len(), 4);
        assert_eq!(issues.error_count(), 3);
        assert_eq!(issues.warning_count(), 1);
        let order: Vec<(&str, u32)> = issues
            .issues()
            .iter()
            .map(|i| (i.function.as_str(), i.line))
            .collect();
        assert_eq!(order, vec![("f", 3), ("f", 7), ("g", 2), ("{main}", 0)]);
    }

    #[test]
    fn test_tip_omitted_from_json_when_absent() {
        let json = serde_json::to_value(Issue::maybe_undefined_variable("x", "f", 1)).unwrap();
        assert!(json.get("tip").is_none());
        assert_eq!(json["severity"], "warning");
    }
}
