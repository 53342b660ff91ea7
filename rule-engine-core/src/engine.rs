//! Rule execution
//!
//! [`RuleEngine::execute`] loads the rules that apply to an entity event,
//! runs them highest priority first against a working copy of the entity
//! data, and folds every action outcome into a [`RuleEngineResult`].
//!
//! Field updates made by one rule are visible to every rule that runs after
//! it. Conditions are evaluated up front; only a rule's actions run against
//! its time budget, and whatever they produced before the deadline stands.
//! A GUARD rule that ends in an error never allows the transition.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{ActionContext, ActionOutcome, ActionRegistry, Effect, Severity};
use crate::condition::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::context::{EvaluationContext, TenantScope};
use crate::error::{ActionError, EngineError, ValidationReport};
use crate::log::{ExecutionStatus, RuleExecutionLog};
use crate::rule::{BusinessRule, RuleType};
use crate::store::RuleStore;
use crate::value::FieldPath;

// =============================================================================
// REQUEST / RESULT
// =============================================================================

/// One entity event to run rules for.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub scope: TenantScope,
    pub entity_type: String,
    pub event_type: Option<String>,
    pub entity_id: Option<String>,
    pub context: EvaluationContext,
    /// Evaluate and resolve actions without sending effects or writing logs.
    pub dry_run: bool,
    pub executed_by: Option<String>,
}

impl ExecutionRequest {
    pub fn new(scope: TenantScope, entity_type: impl Into<String>, context: EvaluationContext) -> Self {
        Self {
            scope,
            entity_type: entity_type.into(),
            event_type: None,
            entity_id: None,
            context,
            dry_run: false,
            executed_by: None,
        }
    }

    pub fn event(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn executed_by(mut self, user: impl Into<String>) -> Self {
        self.executed_by = Some(user.into());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub rule: Uuid,
    pub rule_id: String,
    pub name: String,
    pub rule_type: RuleType,
    pub status: ExecutionStatus,
    pub condition_result: bool,
    pub outcomes: Vec<ActionOutcome>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Messages {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
}

impl Messages {
    pub fn push(&mut self, severity: Severity, text: String) {
        match severity {
            Severity::Error => self.errors.push(text),
            Severity::Warning => self.warnings.push(text),
            Severity::Info => self.info.push(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty() && self.info.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldUpdate {
    pub rule_id: String,
    pub field: FieldPath,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleError {
    pub rule_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEngineResult {
    /// False when a GUARD rule failed or a BLOCK_TRANSITION action ran.
    pub allowed: bool,
    pub dry_run: bool,
    pub rules: Vec<RuleOutcome>,
    pub messages: Messages,
    pub field_updates: Vec<FieldUpdate>,
    /// Dispatched effects, or the effects that would have been sent on a dry run.
    pub effects: Vec<Effect>,
    pub errors: Vec<RuleError>,
    /// Entity data after all field updates.
    pub data: Value,
    pub duration_ms: u64,
}

impl RuleEngineResult {
    fn new(dry_run: bool) -> Self {
        Self {
            allowed: true,
            dry_run,
            rules: Vec::new(),
            messages: Messages::default(),
            field_updates: Vec::new(),
            effects: Vec::new(),
            errors: Vec::new(),
            data: Value::Null,
            duration_ms: 0,
        }
    }

    pub fn rule(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn absorb(&mut self, rule_id: &str, outcomes: &[ActionOutcome]) {
        for outcome in outcomes {
            match outcome {
                ActionOutcome::Blocked { message } => {
                    self.allowed = false;
                    if let Some(message) = message {
                        self.messages.push(Severity::Error, message.clone());
                    }
                }
                ActionOutcome::Message { severity, text } => self.messages.push(*severity, text.clone()),
                ActionOutcome::FieldSet { field, value } => self.field_updates.push(FieldUpdate {
                    rule_id: rule_id.to_string(),
                    field: field.clone(),
                    value: value.clone(),
                }),
                ActionOutcome::Dispatched { effect } | ActionOutcome::Skipped { effect } => {
                    self.effects.push(effect.clone())
                }
                ActionOutcome::Allowed { .. }
                | ActionOutcome::Logged { .. }
                | ActionOutcome::WebhookCalled { .. } => {}
            }
        }
    }
}

/// What running one rule to completion produced.
struct RuleRun {
    matched: bool,
    outcomes: Vec<ActionOutcome>,
    failure: Option<EngineError>,
    context: EvaluationContext,
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    registry: Arc<ActionRegistry>,
    evaluator: ConditionEvaluator,
    config: EngineConfig,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>, registry: Arc<ActionRegistry>, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn validate_rule(&self, rule: &BusinessRule) -> ValidationReport {
        rule.validate(&self.registry, &self.config.limits)
    }

    /// Validate, then persist. Returns the stored record.
    pub async fn save_rule(&self, rule: &BusinessRule) -> Result<BusinessRule, EngineError> {
        self.validate_rule(rule).into_result(())?;
        let saved = self.store.save_rule(rule).await.map_err(EngineError::Store)?;
        info!(rule_id = %saved.rule_id, version = saved.version, "Saved rule");
        Ok(saved)
    }

    /// Run every rule that applies to the request's entity event.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<RuleEngineResult, EngineError> {
        let mut rules = self
            .store
            .applicable_rules(
                &request.scope,
                &request.entity_type,
                request.event_type.as_deref(),
                request.context.now,
            )
            .await
            .map_err(EngineError::Store)?;

        let cap = self.config.execution.max_rules_per_execution;
        if rules.len() > cap {
            warn!(
                entity_type = %request.entity_type,
                applicable = rules.len(),
                cap,
                "Too many applicable rules, running the first {}",
                cap
            );
            rules.truncate(cap);
        }

        debug!(
            entity_type = %request.entity_type,
            event_type = ?request.event_type,
            rules = rules.len(),
            dry_run = request.dry_run,
            "Executing rules"
        );
        self.run(&rules, request).await
    }

    /// Run one rule directly, regardless of event or effective window.
    pub async fn execute_rule(
        &self,
        scope: &TenantScope,
        id: Uuid,
        context: EvaluationContext,
    ) -> Result<RuleEngineResult, EngineError> {
        let rule = self
            .store
            .get_rule(scope, id)
            .await
            .map_err(EngineError::Store)?
            .ok_or_else(|| EngineError::RuleNotFound(id.to_string()))?;

        let mut request = ExecutionRequest::new(*scope, rule.entity_type.clone(), context);
        request.event_type = rule.event_type.clone();
        self.run(std::slice::from_ref(&rule), request).await
    }

    /// Run the enabled members of a rule set in sequence order. Disabled or
    /// out-of-window member rules are skipped, and nothing runs for a disabled
    /// set. Execution logs carry each member rule's own entity and event type.
    pub async fn execute_rule_set(
        &self,
        scope: &TenantScope,
        set_id: &str,
        context: EvaluationContext,
    ) -> Result<RuleEngineResult, EngineError> {
        let set = self
            .store
            .get_rule_set(scope, set_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or_else(|| EngineError::RuleSetNotFound(set_id.to_string()))?;

        let mut rules = Vec::new();
        if set.enabled {
            for member in set.active_members() {
                match self.store.get_rule(scope, member.rule).await.map_err(EngineError::Store)? {
                    Some(rule) if rule.enabled && rule.is_effective(context.now) => rules.push(rule),
                    Some(rule) => debug!(set_id, rule_id = %rule.rule_id, "Skipping inactive rule"),
                    None => warn!(set_id, rule = %member.rule, "Rule set member no longer exists"),
                }
            }
        } else {
            debug!(set_id, "Rule set is disabled");
        }

        let entity_type = rules.first().map(|r| r.entity_type.clone()).unwrap_or_default();
        self.run(&rules, ExecutionRequest::new(*scope, entity_type, context)).await
    }

    async fn run(&self, rules: &[BusinessRule], request: ExecutionRequest) -> Result<RuleEngineResult, EngineError> {
        let started = Instant::now();
        let ExecutionRequest {
            scope,
            entity_type,
            event_type,
            entity_id,
            mut context,
            dry_run,
            executed_by,
        } = request;
        context.scope = Some(scope);

        let settings = &self.config.execution;
        let budget = Duration::from_millis(settings.rule_timeout_ms);
        let mut result = RuleEngineResult::new(dry_run);

        for rule in rules {
            let rule_started = Instant::now();
            let deadline = tokio::time::Instant::now() + budget;
            let RuleRun {
                matched: condition_result,
                outcomes,
                failure,
                context: updated,
            } = self.run_rule(rule, context, dry_run, deadline).await;
            context = updated;
            let duration_ms = elapsed_ms(rule_started);

            let status = match (&failure, condition_result) {
                (Some(_), _) => ExecutionStatus::Error,
                (None, true) => ExecutionStatus::Success,
                (None, false) => ExecutionStatus::Failure,
            };
            if rule.rule_type == RuleType::Guard && (!condition_result || failure.is_some()) {
                result.allowed = false;
            }
            result.absorb(&rule.rule_id, &outcomes);

            let error_message = failure.as_ref().map(|e| e.to_string());
            match &error_message {
                Some(message) => warn!(rule_id = %rule.rule_id, duration_ms, "Rule failed: {}", message),
                None => debug!(rule_id = %rule.rule_id, ?status, duration_ms, "Rule evaluated"),
            }

            if !dry_run {
                let log = RuleExecutionLog {
                    id: Uuid::new_v4(),
                    rule: rule.id,
                    rule_id: rule.rule_id.clone(),
                    scope,
                    entity_type: rule.entity_type.clone(),
                    entity_id: entity_id.clone(),
                    event_type: event_type.clone().or_else(|| rule.event_type.clone()),
                    status,
                    condition_result: Some(condition_result),
                    actions_executed: outcomes.len(),
                    error_message: error_message.clone(),
                    executed_by: executed_by.clone(),
                    duration_ms,
                    executed_at: Utc::now(),
                };
                self.store.append_log(&log).await.map_err(EngineError::Store)?;
            }

            result.rules.push(RuleOutcome {
                rule: rule.id,
                rule_id: rule.rule_id.clone(),
                name: rule.name.clone(),
                rule_type: rule.rule_type,
                status,
                condition_result,
                outcomes,
                error: error_message.clone(),
                duration_ms,
            });

            if let Some(err) = failure {
                if !settings.continue_on_error {
                    return Err(err);
                }
                result.errors.push(RuleError {
                    rule_id: rule.rule_id.clone(),
                    message: err.to_string(),
                });
            }
        }

        result.data = context.data;
        result.duration_ms = elapsed_ms(started);
        info!(
            entity_type = %entity_type,
            rules = result.rules.len(),
            allowed = result.allowed,
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Rule execution finished"
        );
        Ok(result)
    }

    /// Evaluate the condition and run the matching action list until the
    /// deadline. Stops at the first failing action.
    async fn run_rule(
        &self,
        rule: &BusinessRule,
        mut context: EvaluationContext,
        dry_run: bool,
        deadline: tokio::time::Instant,
    ) -> RuleRun {
        let matched = self.evaluator.evaluate(&rule.condition, &context);
        let actions = if matched {
            &rule.success_actions
        } else {
            &rule.failure_actions
        };

        let mut outcomes = Vec::with_capacity(actions.len());
        let mut failure = None;
        for action in actions {
            let executed = {
                let ctx = ActionContext {
                    rule_id: &rule.rule_id,
                    eval: &context,
                    dry_run,
                };
                tokio::time::timeout_at(deadline, self.registry.execute(action, &ctx)).await
            };
            let outcome = match executed {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(source)) => {
                    failure = Some(EngineError::Action {
                        rule_id: rule.rule_id.clone(),
                        source,
                    });
                    break;
                }
                Err(_) => {
                    failure = Some(EngineError::Timeout {
                        rule_id: rule.rule_id.clone(),
                        timeout_ms: self.config.execution.rule_timeout_ms,
                    });
                    break;
                }
            };
            if let ActionOutcome::FieldSet { field, value } = &outcome {
                if !context.set(field, value.clone()) {
                    failure = Some(EngineError::Action {
                        rule_id: rule.rule_id.clone(),
                        source: ActionError::FieldUpdate {
                            field: field.to_string(),
                        },
                    });
                    break;
                }
            }
            outcomes.push(outcome);
        }

        RuleRun {
            matched,
            outcomes,
            failure,
            context,
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionHandler, MemorySink};
    use crate::condition::ConditionExpression;
    use crate::config::{ExecutionSettings, ValidationLimits};
    use crate::error::IssueCode;
    use crate::rule::fixtures::{rule, scope};
    use crate::store::MemoryRuleStore;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Slow;

    #[async_trait]
    impl ActionHandler for Slow {
        fn action_type(&self) -> &str {
            "SLOW"
        }

        fn validate(&self, _config: &Map<String, Value>, _limits: &ValidationLimits) -> ValidationReport {
            ValidationReport::new()
        }

        async fn execute(
            &self,
            _config: &Map<String, Value>,
            _ctx: &ActionContext<'_>,
        ) -> Result<ActionOutcome, ActionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ActionOutcome::Allowed { message: None })
        }
    }

    fn engine_with(config: EngineConfig) -> RuleEngine {
        let mut registry = ActionRegistry::with_builtins(Arc::new(MemorySink::new()), &config.execution);
        registry.register(Arc::new(Slow));
        RuleEngine::new(Arc::new(MemoryRuleStore::new()), Arc::new(registry), config)
    }

    fn request(data: Value) -> ExecutionRequest {
        ExecutionRequest::new(scope(), "Order", EvaluationContext::new(data)).event("beforeSave")
    }

    #[tokio::test]
    async fn test_save_rule_validates() {
        let engine = engine_with(EngineConfig::default());
        let mut bad = rule("bad", 1);
        bad.success_actions = vec![Action::new("TELEPORT", json!({}))];

        match engine.save_rule(&bad).await {
            Err(EngineError::Validation(report)) => assert!(report.has_code(IssueCode::UnknownActionType)),
            other => panic!("expected validation error, got {:?}", other.map(|r| r.rule_id)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_rule_error() {
        let engine = engine_with(EngineConfig::default());
        let mut slow = rule("slow", 10);
        slow.success_actions = vec![
            Action::new("SET_FIELD", json!({"field": "touched", "value": true})),
            Action::new("SLOW", json!({})),
        ];
        engine.save_rule(&slow).await.unwrap();

        let result = engine.execute(request(json!({"status": "new"}))).await.unwrap();
        let outcome = result.rule("slow").unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome.condition_result);
        assert_eq!(outcome.outcomes.len(), 1);
        assert!(result.errors[0].message.contains("timed out"));
        // Updates made before the deadline stand
        assert_eq!(result.data, json!({"status": "new", "touched": true}));
        assert_eq!(result.field_updates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_guard_still_blocks() {
        let engine = engine_with(EngineConfig::default());
        let mut guard = rule("needs-customer", 10);
        guard.rule_type = RuleType::Guard;
        guard.condition =
            ConditionExpression::from_json(&json!({"field": "customer", "operator": "IS_NOT_EMPTY"})).unwrap();
        guard.success_actions = vec![];
        guard.failure_actions = vec![
            Action::new("BLOCK_TRANSITION", json!({"message": "Customer required"})),
            Action::new("SLOW", json!({})),
        ];
        engine.save_rule(&guard).await.unwrap();

        let result = engine.execute(request(json!({}))).await.unwrap();
        let outcome = result.rule("needs-customer").unwrap();
        assert!(!result.allowed);
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(!outcome.condition_result);
        assert_eq!(result.messages.errors, vec!["Customer required"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_that_errors_fails_closed() {
        let engine = engine_with(EngineConfig::default());
        let mut guard = rule("slow-guard", 10);
        guard.rule_type = RuleType::Guard;
        guard.success_actions = vec![Action::new("SLOW", json!({}))];
        engine.save_rule(&guard).await.unwrap();

        let result = engine.execute(request(json!({"status": "new"}))).await.unwrap();
        assert!(result.rule("slow-guard").unwrap().condition_result);
        assert!(!result.allowed);
        assert!(result.has_errors());
    }

    #[tokio::test]
    async fn test_unassignable_field_is_an_action_error() {
        let engine = engine_with(EngineConfig::default());
        let mut setter = rule("setter", 10);
        setter.success_actions = vec![
            Action::new("SET_FIELD", json!({"field": "status.code", "value": 1})),
            Action::new("SHOW_INFO", json!({"message": "unreachable"})),
        ];
        engine.save_rule(&setter).await.unwrap();

        let result = engine.execute(request(json!({"status": "new"}))).await.unwrap();
        let outcome = result.rule("setter").unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome.outcomes.is_empty());
        assert!(result.field_updates.is_empty());
        assert!(result.messages.info.is_empty());
        assert_eq!(result.data, json!({"status": "new"}));
        assert!(result.errors[0].message.contains("status.code"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_on_error_when_configured() {
        let config = EngineConfig {
            execution: ExecutionSettings {
                continue_on_error: false,
                ..ExecutionSettings::default()
            },
            ..EngineConfig::default()
        };
        let engine = engine_with(config);
        let mut slow = rule("slow", 10);
        slow.success_actions = vec![Action::new("SLOW", json!({}))];
        engine.save_rule(&slow).await.unwrap();

        let err = engine.execute(request(json!({"status": "new"}))).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout { ref rule_id, timeout_ms: 5000 } if rule_id == "slow"));
    }

    #[tokio::test]
    async fn test_rule_cap() {
        let config = EngineConfig {
            execution: ExecutionSettings {
                max_rules_per_execution: 2,
                ..ExecutionSettings::default()
            },
            ..EngineConfig::default()
        };
        let engine = engine_with(config);
        for (code, priority) in [("a", 3), ("b", 2), ("c", 1)] {
            engine.save_rule(&rule(code, priority)).await.unwrap();
        }

        let result = engine.execute(request(json!({"status": "new"}))).await.unwrap();
        let ran: Vec<&str> = result.rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ran, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_execute_rule_not_found() {
        let engine = engine_with(EngineConfig::default());
        let err = engine
            .execute_rule(&scope(), Uuid::new_v4(), EvaluationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuleNotFound(_)));

        let err = engine
            .execute_rule_set(&scope(), "missing", EvaluationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuleSetNotFound(_)));
    }

    #[test]
    fn test_absorb_collects_by_kind() {
        let mut result = RuleEngineResult::new(false);
        result.absorb(
            "r",
            &[
                ActionOutcome::Message {
                    severity: Severity::Warning,
                    text: "check stock".into(),
                },
                ActionOutcome::Blocked {
                    message: Some("credit hold".into()),
                },
                ActionOutcome::FieldSet {
                    field: FieldPath::parse("status").unwrap(),
                    value: json!("held"),
                },
            ],
        );
        assert!(!result.allowed);
        assert_eq!(result.messages.warnings, vec!["check stock"]);
        assert_eq!(result.messages.errors, vec!["credit hold"]);
        assert_eq!(result.field_updates[0].rule_id, "r");
    }
}
