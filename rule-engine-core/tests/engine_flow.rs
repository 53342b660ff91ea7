//! End-to-end rule execution against the in-memory store.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use rule_engine_core::{
    load_rules_from_str, ActionOutcome, ActionRegistry, BusinessRule, Effect, EngineConfig, EvaluationContext,
    ExecutionRequest, ExecutionStatus, MemoryRuleStore, MemorySink, RuleEngine, RuleFormat, RuleSet, RuleSetMember,
    RuleStore, TenantScope, UserContext,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const ORDER_RULES: &str = r#"
rules:
  - ruleId: order-credit-limit
    name: Credit limit
    ruleType: GUARD
    entityType: Order
    eventType: beforeSave
    priority: 100
    condition:
      field: total
      operator: "<="
      valueField: customer.credit_limit
    failureActions:
      - type: SHOW_ERROR
        config: { message: "Order total {{total}} exceeds credit limit" }

  - ruleId: order-large-review
    name: Flag large orders
    ruleType: ASSIGNMENT
    entityType: Order
    eventType: beforeSave
    priority: 50
    condition:
      field: total
      operator: ">"
      value: 1000
    successActions:
      - type: SET_FIELD
        config: { field: status, value: review }

  - ruleId: order-review-notify
    name: Notify reviewers
    ruleType: ACTION
    entityType: Order
    eventType: beforeSave
    priority: 10
    condition:
      field: status
      operator: "="
      value: review
    successActions:
      - type: NOTIFY
        config:
          recipients: ["{{user.email}}"]
          subject: "Order {{id}} needs review"
          message: "Total {{total}}"
      - type: SHOW_INFO
        config: { message: "Sent for review" }

  - ruleId: invoice-only
    name: Invoice rule
    ruleType: VALIDATION
    entityType: Invoice
    condition: { field: amount, operator: IS_NOT_EMPTY }
    successActions:
      - type: LOG
        config: { message: "invoice seen" }
"#;

struct Harness {
    engine: RuleEngine,
    store: Arc<MemoryRuleStore>,
    sink: Arc<MemorySink>,
    rules: Vec<BusinessRule>,
}

fn scope() -> TenantScope {
    TenantScope::new(Uuid::from_u128(0xA1), Uuid::from_u128(0xB1))
}

async fn harness(yaml: &str) -> Harness {
    let config = EngineConfig::default();
    let sink = Arc::new(MemorySink::new());
    let registry = Arc::new(ActionRegistry::with_builtins(sink.clone(), &config.execution));
    let store = Arc::new(MemoryRuleStore::new());

    let rules = load_rules_from_str(yaml, RuleFormat::Yaml, scope(), &registry, &config.limits).unwrap();
    let engine = RuleEngine::new(store.clone(), registry, config);
    for rule in &rules {
        engine.save_rule(rule).await.unwrap();
    }

    Harness {
        engine,
        store,
        sink,
        rules,
    }
}

fn order(data: Value) -> ExecutionRequest {
    let ctx = EvaluationContext::new(data).with_user(UserContext {
        id: Some("u-7".into()),
        email: Some("reviewer@example.com".into()),
        role: Some("sales".into()),
    });
    ExecutionRequest::new(scope(), "Order", ctx)
        .event("beforeSave")
        .entity_id("ORD-1")
        .executed_by("u-7")
}

#[tokio::test]
async fn guard_failure_blocks_and_reports() {
    let h = harness(ORDER_RULES).await;
    let result = h
        .engine
        .execute(order(json!({"id": "ORD-1", "total": 500, "customer": {"credit_limit": 200}})))
        .await
        .unwrap();

    assert!(!result.allowed);
    assert_eq!(
        result.messages.errors,
        vec!["Order total 500 exceeds credit limit".to_string()]
    );
    assert_eq!(
        result.rule("order-credit-limit").unwrap().status,
        ExecutionStatus::Failure
    );
}

#[tokio::test]
async fn field_updates_flow_to_lower_priority_rules() {
    let h = harness(ORDER_RULES).await;
    let result = h
        .engine
        .execute(order(json!({
            "id": "ORD-1",
            "total": 2500,
            "status": "new",
            "customer": {"credit_limit": 5000}
        })))
        .await
        .unwrap();

    assert!(result.allowed);
    let order: Vec<&str> = result.rules.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(
        order,
        vec!["order-credit-limit", "order-large-review", "order-review-notify"]
    );

    assert_eq!(result.data["status"], json!("review"));
    assert_eq!(result.field_updates.len(), 1);
    assert_eq!(result.field_updates[0].field.as_str(), "status");
    assert_eq!(result.messages.info, vec!["Sent for review".to_string()]);

    let sent = h.sink.effects().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "order-review-notify");
    assert_eq!(
        sent[0].1,
        Effect::Notification {
            recipients: vec!["reviewer@example.com".into()],
            subject: Some("Order ORD-1 needs review".into()),
            message: "Total 2500".into(),
            template: None,
        }
    );
}

#[tokio::test]
async fn execution_logs_one_entry_per_rule() {
    let h = harness(ORDER_RULES).await;
    h.engine
        .execute(order(json!({"id": "ORD-1", "total": 10, "customer": {"credit_limit": 100}})))
        .await
        .unwrap();

    let logs = h.store.list_logs(&scope(), None).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.entity_id.as_deref() == Some("ORD-1")));
    assert!(logs.iter().all(|l| l.executed_by.as_deref() == Some("u-7")));

    let statuses: Vec<(&str, ExecutionStatus)> = logs.iter().map(|l| (l.rule_id.as_str(), l.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("order-credit-limit", ExecutionStatus::Success),
            ("order-large-review", ExecutionStatus::Failure),
            ("order-review-notify", ExecutionStatus::Failure),
        ]
    );
}

#[tokio::test]
async fn dry_run_sends_nothing_and_writes_no_logs() {
    let h = harness(ORDER_RULES).await;
    let result = h
        .engine
        .execute(
            order(json!({"id": "ORD-1", "total": 2500, "customer": {"credit_limit": 5000}})).dry_run(),
        )
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.effects.len(), 1);
    let notify = result.rule("order-review-notify").unwrap();
    assert!(matches!(notify.outcomes[0], ActionOutcome::Skipped { .. }));

    assert!(h.sink.effects().unwrap().is_empty());
    assert!(h.store.list_logs(&scope(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn rules_from_other_tenants_never_run() {
    let h = harness(ORDER_RULES).await;
    let other = TenantScope::new(Uuid::from_u128(0xA2), Uuid::from_u128(0xB1));

    let request = ExecutionRequest::new(other, "Order", EvaluationContext::new(json!({"total": 1})))
        .event("beforeSave");
    let result = h.engine.execute(request).await.unwrap();
    assert!(result.rules.is_empty());
    assert!(result.allowed);
}

#[tokio::test]
async fn block_transition_wins_over_allow() {
    let yaml = r#"
rules:
  - ruleId: allow-all
    name: Allow
    ruleType: ACTION
    entityType: Ticket
    priority: 20
    condition: { field: state, operator: IS_NOT_EMPTY }
    successActions: [{ type: ALLOW_TRANSITION }]
  - ruleId: block-closed
    name: Block closed
    ruleType: ACTION
    entityType: Ticket
    priority: 10
    condition: { field: state, operator: "=", value: closed }
    successActions:
      - type: BLOCK_TRANSITION
        config: { message: "Closed tickets are read-only" }
"#;
    let h = harness(yaml).await;
    let request = ExecutionRequest::new(scope(), "Ticket", EvaluationContext::new(json!({"state": "closed"})))
        .event("beforeUpdate");
    let result = h.engine.execute(request).await.unwrap();

    assert!(!result.allowed);
    assert_eq!(result.messages.errors, vec!["Closed tickets are read-only".to_string()]);
}

#[tokio::test]
async fn date_tokens_use_evaluation_clock() {
    let yaml = r#"
rules:
  - ruleId: overdue
    name: Overdue
    ruleType: VALIDATION
    entityType: Invoice
    condition: { field: due_date, operator: "<", value: "{{today}}" }
    successActions:
      - type: SHOW_WARNING
        config: { message: "Invoice overdue since {{due_date}}" }
"#;
    let h = harness(yaml).await;
    let now = Utc.with_ymd_and_hms(2025, 3, 15, 9, 0, 0).unwrap();

    let ctx = EvaluationContext::new(json!({"due_date": "2025-03-01"})).at(now);
    let result = h
        .engine
        .execute(ExecutionRequest::new(scope(), "Invoice", ctx))
        .await
        .unwrap();
    assert_eq!(result.messages.warnings, vec!["Invoice overdue since 2025-03-01".to_string()]);

    let ctx = EvaluationContext::new(json!({"due_date": "2025-04-01"})).at(now);
    let result = h
        .engine
        .execute(ExecutionRequest::new(scope(), "Invoice", ctx))
        .await
        .unwrap();
    assert!(result.messages.is_empty());
}

#[tokio::test]
async fn execute_single_rule_and_rule_set() {
    let h = harness(ORDER_RULES).await;
    let review = h.rules.iter().find(|r| r.rule_id == "order-large-review").unwrap();
    let notify = h.rules.iter().find(|r| r.rule_id == "order-review-notify").unwrap();

    let result = h
        .engine
        .execute_rule(&scope(), review.id, EvaluationContext::new(json!({"total": 5000})))
        .await
        .unwrap();
    assert_eq!(result.rules.len(), 1);
    assert_eq!(result.data["status"], json!("review"));

    // Sequence order overrides priority inside a set
    let set = RuleSet {
        id: Uuid::new_v4(),
        set_id: "order-review".into(),
        name: "Order review".into(),
        description: None,
        enabled: true,
        members: vec![
            RuleSetMember {
                rule: notify.id,
                sequence: 1,
                enabled: true,
            },
            RuleSetMember {
                rule: review.id,
                sequence: 2,
                enabled: true,
            },
        ],
        scope: scope(),
    };
    h.store.save_rule_set(&set).await.unwrap();

    let result = h
        .engine
        .execute_rule_set(&scope(), "order-review", EvaluationContext::new(json!({"total": 5000})))
        .await
        .unwrap();
    let ran: Vec<(&str, ExecutionStatus)> = result.rules.iter().map(|r| (r.rule_id.as_str(), r.status)).collect();
    assert_eq!(
        ran,
        vec![
            ("order-review-notify", ExecutionStatus::Failure),
            ("order-large-review", ExecutionStatus::Success),
        ]
    );
}

fn review_set(set_id: &str, enabled: bool, members: &[(Uuid, bool)]) -> RuleSet {
    RuleSet {
        id: Uuid::new_v4(),
        set_id: set_id.into(),
        name: set_id.into(),
        description: None,
        enabled,
        members: members
            .iter()
            .enumerate()
            .map(|(i, &(rule, enabled))| RuleSetMember {
                rule,
                sequence: i as u32 + 1,
                enabled,
            })
            .collect(),
        scope: scope(),
    }
}

#[tokio::test]
async fn disabled_rule_set_runs_nothing() {
    let h = harness(ORDER_RULES).await;
    let members: Vec<(Uuid, bool)> = h.rules.iter().map(|r| (r.id, true)).collect();
    h.store.save_rule_set(&review_set("paused", false, &members)).await.unwrap();

    let data = json!({"total": 5000});
    let result = h
        .engine
        .execute_rule_set(&scope(), "paused", EvaluationContext::new(data.clone()))
        .await
        .unwrap();
    assert!(result.rules.is_empty());
    assert!(result.allowed);
    assert_eq!(result.data, data);
    assert!(h.store.list_logs(&scope(), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn rule_set_skips_inactive_members() {
    let h = harness(ORDER_RULES).await;
    let find = |rule_id: &str| h.rules.iter().find(|r| r.rule_id == rule_id).unwrap().clone();
    let guard = find("order-credit-limit");
    let invoice = find("invoice-only");

    let mut review = find("order-large-review");
    review.effective_from = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
    h.engine.save_rule(&review).await.unwrap();
    let mut notify = find("order-review-notify");
    notify.enabled = false;
    h.engine.save_rule(&notify).await.unwrap();

    let set = review_set(
        "mixed",
        true,
        &[(review.id, true), (notify.id, true), (invoice.id, false), (guard.id, true)],
    );
    h.store.save_rule_set(&set).await.unwrap();

    let ctx = EvaluationContext::new(json!({"total": 5000})).at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    let result = h.engine.execute_rule_set(&scope(), "mixed", ctx).await.unwrap();

    let ran: Vec<&str> = result.rules.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(ran, vec!["order-credit-limit"]);
    assert!(!result.allowed);
    assert_eq!(result.data, json!({"total": 5000}));

    // Logs carry the member rule's own event type
    let logs = h.store.list_logs(&scope(), Some(guard.id)).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].entity_type, "Order");
    assert_eq!(logs[0].event_type.as_deref(), Some("beforeSave"));
}
