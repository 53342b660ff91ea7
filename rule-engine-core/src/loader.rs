//! Load rule definitions from YAML or JSON files
//!
//! ```yaml
//! rules:
//!   - ruleId: order-credit-hold
//!     name: Credit hold
//!     ruleType: GUARD
//!     entityType: Order
//!     eventType: beforeSave
//!     priority: 100
//!     condition:
//!       field: total
//!       operator: "<="
//!       valueField: customer.credit_limit
//!     failureActions:
//!       - type: SHOW_ERROR
//!         config: { message: "Order exceeds credit limit" }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

use crate::action::{Action, ActionRegistry};
use crate::condition::parse_condition;
use crate::config::ValidationLimits;
use crate::context::TenantScope;
use crate::error::{child_index, child_key, IssueCode, ValidationReport};
use crate::rule::{BusinessRule, RuleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Yaml,
    Json,
}

impl RuleFormat {
    /// `.json` files are JSON, everything else is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// A rule as written in a rules file: no id, scope or bookkeeping fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RuleDefinition {
    rule_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    rule_type: RuleType,
    #[serde(default)]
    rule_category: Option<String>,
    entity_type: String,
    #[serde(default)]
    event_type: Option<String>,
    condition: Value,
    #[serde(default)]
    success_actions: Vec<Action>,
    #[serde(default)]
    failure_actions: Vec<Action>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    effective_to: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

/// Load and validate every rule in a file.
pub fn load_rules(
    path: &Path,
    scope: TenantScope,
    registry: &ActionRegistry,
    limits: &ValidationLimits,
) -> Result<Vec<BusinessRule>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read rules file {}", path.display()))?;
    let rules = load_rules_from_str(&content, RuleFormat::from_path(path), scope, registry, limits)
        .with_context(|| format!("Invalid rules file {}", path.display()))?;

    tracing::info!("Loaded {} rules from {:?}", rules.len(), path);
    Ok(rules)
}

/// Parse and validate rule definitions. All problems are reported at once,
/// with paths like `$.rules[2].condition.rules[0].field`.
pub fn load_rules_from_str(
    source: &str,
    format: RuleFormat,
    scope: TenantScope,
    registry: &ActionRegistry,
    limits: &ValidationLimits,
) -> Result<Vec<BusinessRule>, ValidationReport> {
    let mut report = ValidationReport::new();

    let document: Value = match format {
        RuleFormat::Yaml => serde_yaml::from_str(source).map_err(|e| e.to_string()),
        RuleFormat::Json => serde_json::from_str(source).map_err(|e| e.to_string()),
    }
    .map_err(|message| {
        let mut report = ValidationReport::new();
        report.push("$", IssueCode::InvalidRule, message);
        report
    })?;

    let Some(items) = document.get("rules").and_then(Value::as_array) else {
        report.push("$.rules", IssueCode::InvalidRule, "expected a 'rules' array");
        return Err(report);
    };

    let now = Utc::now();
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let path = child_index("$.rules", i);

        let definition: RuleDefinition = match serde_json::from_value(item.clone()) {
            Ok(definition) => definition,
            Err(e) => {
                report.push(&path, IssueCode::InvalidRule, e.to_string());
                continue;
            }
        };

        if !seen.insert(definition.rule_id.clone()) {
            report.push(
                &child_key(&path, "ruleId"),
                IssueCode::InvalidRule,
                format!("duplicate rule id '{}'", definition.rule_id),
            );
        }

        let condition = match parse_condition(&definition.condition, limits) {
            Ok(condition) => condition,
            Err(condition_report) => {
                report.absorb(&child_key(&path, "condition"), condition_report);
                report.absorb(
                    &child_key(&path, "successActions"),
                    registry.validate_actions(&definition.success_actions, limits),
                );
                report.absorb(
                    &child_key(&path, "failureActions"),
                    registry.validate_actions(&definition.failure_actions, limits),
                );
                continue;
            }
        };

        let rule = BusinessRule {
            id: Uuid::new_v4(),
            rule_id: definition.rule_id,
            name: definition.name,
            description: definition.description,
            rule_type: definition.rule_type,
            rule_category: definition.rule_category,
            entity_type: definition.entity_type,
            event_type: definition.event_type,
            condition,
            success_actions: definition.success_actions,
            failure_actions: definition.failure_actions,
            enabled: definition.enabled,
            priority: definition.priority,
            version: 1,
            effective_from: definition.effective_from,
            effective_to: definition.effective_to,
            scope,
            created_at: now,
            updated_at: now,
        };
        report.absorb(&path, rule.validate(registry, limits));
        rules.push(rule);
    }

    report.into_result(rules)
}
