// src/diagnostics/taxonomy.rs

use std::fmt;

use serde::Serialize;

/// What broke, at the level of the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Container,
    Dependency,
    Build,
    Network,
    Permission,
    Timeout,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Container => "container",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Build => "build",
            ErrorKind::Network => "network",
            ErrorKind::Permission => "permission",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// How bad a failure is. Decided by *which* operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// Advice attached to a reported error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub description: String,
    /// Whether a registered recovery action should be invoked automatically.
    pub automated: bool,
    /// Extra hint picked from the error message, if any matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}
