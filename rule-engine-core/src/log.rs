use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::TenantScope;

/// How a single rule evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Condition true, success actions ran.
    Success,
    /// Condition false, failure actions ran.
    Failure,
    /// An action failed or the rule timed out.
    Error,
}

/// Audit record written for every evaluated rule (never for dry runs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleExecutionLog {
    pub id: Uuid,
    /// Store id of the rule, not its code.
    pub rule: Uuid,
    pub rule_id: String,
    pub scope: TenantScope,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub event_type: Option<String>,
    pub status: ExecutionStatus,
    pub condition_result: Option<bool>,
    pub actions_executed: usize,
    pub error_message: Option<String>,
    pub executed_by: Option<String>,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_wire_format() {
        let log = RuleExecutionLog {
            id: Uuid::nil(),
            rule: Uuid::nil(),
            rule_id: "order-credit-limit".into(),
            scope: TenantScope::new(Uuid::nil(), Uuid::nil()),
            entity_type: "Order".into(),
            entity_id: Some("ORD-1".into()),
            event_type: None,
            status: ExecutionStatus::Failure,
            condition_result: Some(false),
            actions_executed: 1,
            error_message: None,
            executed_by: None,
            duration_ms: 3,
            executed_at: Utc::now(),
        };

        let value = serde_json::to_value(&log).unwrap();
        assert_eq!(value["status"], json!("FAILURE"));
        assert_eq!(value["ruleId"], json!("order-credit-limit"));
        assert_eq!(value["conditionResult"], json!(false));

        let back: RuleExecutionLog = serde_json::from_value(value).unwrap();
        assert_eq!(back, log);
    }
}
