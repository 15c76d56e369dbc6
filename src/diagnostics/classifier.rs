// src/diagnostics/classifier.rs

//! Maps a failed operation to an error kind, a severity and a resolution.
//!
//! Kind and severity come from a static table keyed by operation id. The
//! error message is only inspected to pick a human-readable suggestion; it
//! never changes severity or whether recovery runs.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::OperationError;

use super::taxonomy::{ErrorKind, Resolution, Severity};

/// One row of the classification table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Base resolution text and whether recovery is automated.
    pub resolution: Option<(String, bool)>,
}

impl ClassificationRule {
    pub fn new(kind: ErrorKind, severity: Severity) -> Self {
        Self {
            kind,
            severity,
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, description: impl Into<String>, automated: bool) -> Self {
        self.resolution = Some((description.into(), automated));
        self
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub resolution: Option<Resolution>,
}

impl Classification {
    /// Whether the attached recovery action should be invoked.
    pub fn wants_recovery(&self) -> bool {
        self.resolution.as_ref().is_some_and(|r| r.automated)
    }
}

static SUGGESTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"(?i)timed? ?out|timeout|ETIMEDOUT",
            "The step took too long; retry or raise its timeout.",
        ),
        (
            r"(?i)permission denied|EACCES|EPERM|operation not permitted",
            "Check file ownership and permissions in the project volume.",
        ),
        (
            r"(?i)ECONNREFUSED|ECONNRESET|ENOTFOUND|network|dns|connection refused",
            "Check network connectivity and registry availability.",
        ),
        (
            r"(?i)ENOSPC|no space left",
            "Free up disk space in the container.",
        ),
        (
            r"(?i)EADDRINUSE|address already in use|port .* in use",
            "Another process holds the port; stop it or pick a different port.",
        ),
        (
            r"(?i)not found|no such (file|container)|ENOENT",
            "A required file or container is missing; re-create it.",
        ),
    ]
    .into_iter()
    .map(|(pattern, hint)| {
        (
            Regex::new(pattern).expect("suggestion patterns are valid regexes"),
            hint,
        )
    })
    .collect()
});

/// Pick an advisory hint for an error message.
pub fn suggestion_for(message: &str) -> Option<&'static str> {
    SUGGESTIONS
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, hint)| *hint)
}

/// Static table from operation id to classification.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: HashMap<String, ClassificationRule>,
    fallback: ClassificationRule,
}

impl Default for Classifier {
    /// The table for the standard project build pipeline.
    fn default() -> Self {
        Self::empty()
            .with_rule(
                "ensure-container-running",
                ClassificationRule::new(ErrorKind::Container, Severity::Critical)
                    .with_resolution("Restart the project container.", true),
            )
            .with_rule(
                "install-dependencies",
                ClassificationRule::new(ErrorKind::Dependency, Severity::Critical)
                    .with_resolution("Clear the package cache and reinstall dependencies.", true),
            )
            .with_rule(
                "container-status-check",
                ClassificationRule::new(ErrorKind::Container, Severity::Warning)
                    .with_resolution("Container status is unknown; it will be started if needed.", false),
            )
            .with_rule(
                "sync-project-files",
                ClassificationRule::new(ErrorKind::Build, Severity::Warning)
                    .with_resolution("Some files were not synced; the preview may be stale.", false),
            )
            .with_rule(
                "start-dev-server",
                ClassificationRule::new(ErrorKind::Build, Severity::Info),
            )
            .with_rule(
                "publish-preview-url",
                ClassificationRule::new(ErrorKind::Network, Severity::Info),
            )
    }
}

impl Classifier {
    /// A classifier with no rules; everything maps to the fallback.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
            fallback: ClassificationRule::new(ErrorKind::Unknown, Severity::Info),
        }
    }

    pub fn with_rule(mut self, operation_id: impl Into<String>, rule: ClassificationRule) -> Self {
        self.rules.insert(operation_id.into(), rule);
        self
    }

    pub fn rule_for(&self, operation_id: &str) -> &ClassificationRule {
        self.rules.get(operation_id).unwrap_or(&self.fallback)
    }

    /// Classify a failure of `operation_id`.
    ///
    /// A timeout overrides the table's kind with [`ErrorKind::Timeout`];
    /// severity always comes from the table.
    pub fn classify(&self, operation_id: &str, error: &OperationError) -> Classification {
        let rule = self.rule_for(operation_id);

        let kind = match error {
            OperationError::TimedOut(_) => ErrorKind::Timeout,
            _ => rule.kind,
        };

        let message = error.to_string();
        let suggestion = suggestion_for(&message).map(str::to_string);

        let resolution = match (&rule.resolution, suggestion) {
            (Some((description, automated)), suggestion) => Some(Resolution {
                description: description.clone(),
                automated: *automated,
                suggestion,
            }),
            (None, Some(hint)) => Some(Resolution {
                description: hint,
                automated: false,
                suggestion: None,
            }),
            (None, None) => None,
        };

        Classification {
            kind,
            severity: rule.severity,
            resolution,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn severity_is_keyed_by_operation_id() {
        let classifier = Classifier::default();
        let err = OperationError::failed("exit status 1");

        let c = classifier.classify("ensure-container-running", &err);
        assert_eq!((c.kind, c.severity), (ErrorKind::Container, Severity::Critical));
        assert!(c.wants_recovery());

        let c = classifier.classify("install-dependencies", &err);
        assert_eq!((c.kind, c.severity), (ErrorKind::Dependency, Severity::Critical));

        let c = classifier.classify("container-status-check", &err);
        assert_eq!(c.severity, Severity::Warning);
        assert!(!c.wants_recovery());

        let c = classifier.classify("sync-project-files", &err);
        assert_eq!(c.severity, Severity::Warning);

        let c = classifier.classify("notify-ui", &err);
        assert_eq!((c.kind, c.severity), (ErrorKind::Unknown, Severity::Info));
        assert!(c.resolution.is_none());
    }

    #[test]
    fn message_text_never_changes_severity() {
        let classifier = Classifier::default();
        let err = OperationError::failed("permission denied while writing node_modules");

        let c = classifier.classify("notify-ui", &err);
        assert_eq!(c.severity, Severity::Info);
        let resolution = c.resolution.expect("suggestion from message");
        assert!(!resolution.automated);
        assert!(resolution.description.contains("permissions"));
    }

    #[test]
    fn timeouts_override_the_kind() {
        let classifier = Classifier::default();
        let err = OperationError::TimedOut(Duration::from_secs(30));

        let c = classifier.classify("install-dependencies", &err);
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert_eq!(c.severity, Severity::Critical);
        let resolution = c.resolution.unwrap();
        assert!(resolution.automated);
        assert!(resolution.suggestion.is_some());
    }

    #[test]
    fn custom_rules_extend_the_table() {
        let classifier = Classifier::default().with_rule(
            "run-migrations",
            ClassificationRule::new(ErrorKind::Build, Severity::Critical),
        );
        let c = classifier.classify("run-migrations", &OperationError::failed("boom"));
        assert_eq!(c.severity, Severity::Critical);
    }
}
