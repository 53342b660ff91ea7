//! Error types for rule validation, action dispatch and engine execution.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

// =============================================================================
// VALIDATION
// =============================================================================

/// Stable code attached to every validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidNode,
    MaxDepthExceeded,
    EmptyGroup,
    GroupTooLarge,
    NotArity,
    UnknownLogicalOperator,
    InvalidFieldPath,
    FieldPathTooLong,
    UnknownOperator,
    OperandConflict,
    MissingOperand,
    UnexpectedOperand,
    InvalidOperand,
    InvalidPattern,
    ListTooLarge,
    InvalidActionList,
    TooManyActions,
    UnknownActionType,
    InvalidActionConfig,
    MessageTooLong,
    InvalidRule,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::InvalidNode => "invalid_node",
            IssueCode::MaxDepthExceeded => "max_depth_exceeded",
            IssueCode::EmptyGroup => "empty_group",
            IssueCode::GroupTooLarge => "group_too_large",
            IssueCode::NotArity => "not_arity",
            IssueCode::UnknownLogicalOperator => "unknown_logical_operator",
            IssueCode::InvalidFieldPath => "invalid_field_path",
            IssueCode::FieldPathTooLong => "field_path_too_long",
            IssueCode::UnknownOperator => "unknown_operator",
            IssueCode::OperandConflict => "operand_conflict",
            IssueCode::MissingOperand => "missing_operand",
            IssueCode::UnexpectedOperand => "unexpected_operand",
            IssueCode::InvalidOperand => "invalid_operand",
            IssueCode::InvalidPattern => "invalid_pattern",
            IssueCode::ListTooLarge => "list_too_large",
            IssueCode::InvalidActionList => "invalid_action_list",
            IssueCode::TooManyActions => "too_many_actions",
            IssueCode::UnknownActionType => "unknown_action_type",
            IssueCode::InvalidActionConfig => "invalid_action_config",
            IssueCode::MessageTooLong => "message_too_long",
            IssueCode::InvalidRule => "invalid_rule",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single problem found while validating a condition, action list or rule.
///
/// `path` is a JSON path rooted at `$`, e.g. `$.rules[2].field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub code: IssueCode,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

/// Every issue found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: &str, code: IssueCode, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.to_string(),
            code,
            message: message.into(),
        });
    }

    /// Merge another report, re-rooting its `$`-relative paths under `prefix`.
    pub fn absorb(&mut self, prefix: &str, other: ValidationReport) {
        for mut issue in other.issues {
            issue.path = match issue.path.strip_prefix('$') {
                Some(rest) => format!("{}{}", prefix, rest),
                None => format!("{}.{}", prefix, issue.path),
            };
            self.issues.push(issue);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn has_code(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// `Ok(value)` when no issues were recorded, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationReport> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n  {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

pub(crate) fn child_key(path: &str, key: &str) -> String {
    format!("{}.{}", path, key)
}

pub(crate) fn child_index(path: &str, index: usize) -> String {
    format!("{}[{}]", path, index)
}

// =============================================================================
// ACTIONS
// =============================================================================

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action type '{0}'")]
    UnknownType(String),

    #[error("invalid config for {action_type}: {message}")]
    InvalidConfig {
        action_type: String,
        message: String,
    },

    #[error("dispatch failed for {action_type}: {source}")]
    Dispatch {
        action_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("field '{field}' cannot be set on the entity data")]
    FieldUpdate { field: String },

    #[error("webhook {method} {url} failed: {message}")]
    Webhook {
        method: String,
        url: String,
        message: String,
    },
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationReport),

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("rule set not found: {0}")]
    RuleSetNotFound(String),

    #[error("rule '{rule_id}' timed out after {timeout_ms} ms")]
    Timeout { rule_id: String, timeout_ms: u64 },

    #[error("rule '{rule_id}': {source}")]
    Action {
        rule_id: String,
        #[source]
        source: ActionError,
    },

    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}
