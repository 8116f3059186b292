//! Static validation results
//!
//! Validation never stops at the first problem: every violated rule is
//! collected so a caller sees all defects of a migration file at once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule a migration can violate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    /// Version is not of the form `V<n>`
    InvalidVersion,
    /// Name is blank
    EmptyName,
    /// Body is blank
    EmptyBody,
    /// Body contains no recognized DDL/DML operation
    MissingOperation,
    /// Body contains a destructive operation
    DangerousOperation,
    /// Body cannot be parsed
    SyntaxError,
}

/// One violated rule with a human-readable explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub rule: ValidationRule,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(rule: ValidationRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Aggregated validation failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(pub Vec<ValidationIssue>);

impl ValidationErrors {
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any issue violates the given rule
    pub fn has_rule(&self, rule: ValidationRule) -> bool {
        self.0.iter().any(|issue| issue.rule == rule)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|issue| issue.message.clone()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Outcome of parser validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    /// Advisory findings that do not block execution
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&mut self, rule: ValidationRule, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(rule, message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Convert into a `Result`, keeping every error
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_collects_everything() {
        let mut report = ValidationReport::new();
        assert!(report.is_valid());

        report.error(ValidationRule::EmptyName, "Migration name must not be empty");
        report.error(ValidationRule::EmptyBody, "Migration body must not be empty");
        report.warning("advisory");
        assert!(!report.is_valid());

        let errors = report.into_result().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.has_rule(ValidationRule::EmptyBody));
        assert_eq!(
            errors.to_string(),
            "Migration name must not be empty; Migration body must not be empty"
        );
    }
}
