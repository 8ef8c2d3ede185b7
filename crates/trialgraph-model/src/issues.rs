//! Severity-classified integrity issues.
//!
//! Issues are accumulated, never thrown. The caller decides whether a
//! `Blocking` issue halts downstream publishing.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Blocking => "blocking",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    /// Location in the design the issue points at, e.g. `/encounters/enc_3`.
    pub path: String,
    #[serde(default)]
    pub affected_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            path: path.into(),
            affected_ids: Vec::new(),
            suggestion: None,
        }
    }

    pub fn blocking(
        category: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Blocking, category, path, message)
    }

    pub fn warning(
        category: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, category, path, message)
    }

    pub fn info(
        category: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Info, category, path, message)
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Opaque position of an issue inside an [`IssueLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueRef(usize);

/// Append-only issue accumulator.
///
/// Every push is mirrored as a `tracing` event so a pass can be followed from
/// the logs without dumping the report.
#[derive(Debug, Clone, Default)]
pub struct IssueLog {
    issues: Vec<Issue>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, issue: Issue) -> IssueRef {
        match issue.severity {
            Severity::Blocking => tracing::error!(
                category = %issue.category,
                path = %issue.path,
                "{}",
                issue.message
            ),
            Severity::Warning => tracing::warn!(
                category = %issue.category,
                path = %issue.path,
                "{}",
                issue.message
            ),
            Severity::Info => tracing::info!(
                category = %issue.category,
                path = %issue.path,
                "{}",
                issue.message
            ),
        }
        self.issues.push(issue);
        IssueRef(self.issues.len() - 1)
    }

    /// Add another affected ID to an issue that was already logged.
    pub fn add_affected_id(&mut self, at: IssueRef, id: impl Into<String>) {
        if let Some(issue) = self.issues.get_mut(at.0) {
            let id = id.into();
            if !issue.affected_ids.contains(&id) {
                issue.affected_ids.push(id);
            }
        }
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        for issue in issues {
            self.push(issue);
        }
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_blocking(&self) -> bool {
        self.count(Severity::Blocking) > 0
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Issue> + 'a {
        self.issues.iter().filter(move |i| i.category == category)
    }
}
