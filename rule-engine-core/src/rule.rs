//! Business rule records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, ActionRegistry};
use crate::condition::ConditionExpression;
use crate::config::ValidationLimits;
use crate::context::TenantScope;
use crate::error::{IssueCode, ValidationReport};

pub const MAX_RULE_ID_LEN: usize = 50;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_ENTITY_TYPE_LEN: usize = 50;
pub const MAX_PRIORITY: i32 = 9999;

/// What a rule is for. GUARD rules gate a transition: a false condition
/// makes the execution result disallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Guard,
    Validation,
    Calculation,
    Action,
    Assignment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRule {
    pub id: Uuid,
    /// Human-facing code, unique within a scope.
    pub rule_id: String,
    pub name: String,
    pub description: Option<String>,
    pub rule_type: RuleType,
    pub rule_category: Option<String>,
    pub entity_type: String,
    /// `None` matches every event of the entity type.
    pub event_type: Option<String>,
    pub condition: ConditionExpression,
    pub success_actions: Vec<Action>,
    pub failure_actions: Vec<Action>,
    pub enabled: bool,
    pub priority: i32,
    pub version: u32,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub scope: TenantScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BusinessRule {
    /// Check every field against the limits and the registered action types.
    pub fn validate(&self, registry: &ActionRegistry, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();

        check_code(&mut report, "$.ruleId", &self.rule_id);
        check_len(&mut report, "$.name", &self.name, MAX_NAME_LEN);
        check_len(&mut report, "$.entityType", &self.entity_type, MAX_ENTITY_TYPE_LEN);
        if let Some(event) = &self.event_type {
            check_len(&mut report, "$.eventType", event, MAX_ENTITY_TYPE_LEN);
        }

        if !(0..=MAX_PRIORITY).contains(&self.priority) {
            report.push(
                "$.priority",
                IssueCode::InvalidRule,
                format!("priority {} is outside 0..={}", self.priority, MAX_PRIORITY),
            );
        }

        if let (Some(from), Some(to)) = (self.effective_from, self.effective_to) {
            if to <= from {
                report.push(
                    "$.effectiveTo",
                    IssueCode::InvalidRule,
                    "effective window ends before it starts",
                );
            }
        }

        if self.success_actions.is_empty() && self.failure_actions.is_empty() {
            report.push(
                "$",
                IssueCode::InvalidRule,
                "rule must define at least one success or failure action",
            );
        }

        if let Err(condition_report) = self.condition.check_limits(limits) {
            report.absorb("$.condition", condition_report);
        }
        report.absorb(
            "$.successActions",
            registry.validate_actions(&self.success_actions, limits),
        );
        report.absorb(
            "$.failureActions",
            registry.validate_actions(&self.failure_actions, limits),
        );

        report
    }

    /// Whether the rule is active at `now`. `effective_to` is exclusive.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        let started = self.effective_from.is_none_or(|from| from <= now);
        let not_ended = self.effective_to.is_none_or(|to| now < to);
        started && not_ended
    }

    /// Enabled, same scope and entity, matching event, inside the window.
    pub fn applies_to(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        event_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        self.enabled
            && self.scope == *scope
            && self.entity_type == entity_type
            && match (&self.event_type, event_type) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
            }
            && self.is_effective(now)
    }
}

fn check_code(report: &mut ValidationReport, path: &str, code: &str) {
    check_len(report, path, code, MAX_RULE_ID_LEN);
    if code
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        report.push(
            path,
            IssueCode::InvalidRule,
            format!("'{}' may only contain letters, digits, '_', '-' and '.'", code),
        );
    }
}

fn check_len(report: &mut ValidationReport, path: &str, value: &str, max: usize) {
    let len = value.chars().count();
    if value.trim().is_empty() {
        report.push(path, IssueCode::InvalidRule, "must not be empty");
    } else if len > max {
        report.push(
            path,
            IssueCode::InvalidRule,
            format!("{} characters, maximum is {}", len, max),
        );
    }
}
