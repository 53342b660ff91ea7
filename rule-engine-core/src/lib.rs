//! rule-engine-core: business rule evaluation for entity lifecycle events
//!
//! This crate holds the engine logic with NO database dependencies:
//! - Condition trees (AND / OR / NOT groups over field comparisons) with a
//!   collect-all validator
//! - Field paths and `{{token}}` resolution against an evaluation context
//! - Action handlers behind a dispatch table, with pluggable effect sinks
//! - Tenant-scoped rule store trait plus an in-memory implementation
//! - The execution engine, rule file loader and YAML configuration
//!
//! Persistence backends and transport layers live with the host.

pub mod action;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod loader;
pub mod log;
pub mod rule;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use action::{
    action_types, Action, ActionContext, ActionHandler, ActionOutcome, ActionRegistry, Effect, EffectSink,
    LogLevel, MemorySink, Severity, TracingSink,
};
pub use condition::{parse_condition, ComparisonOperator, ConditionEvaluator, ConditionExpression, LogicalOperator};
pub use config::{ConfigLoader, EngineConfig, ExecutionSettings, ValidationLimits};
pub use context::{EvaluationContext, TenantScope, UserContext};
pub use engine::{ExecutionRequest, FieldUpdate, Messages, RuleEngine, RuleEngineResult, RuleError, RuleOutcome};
pub use error::{ActionError, EngineError, IssueCode, ValidationIssue, ValidationReport};
pub use loader::{load_rules, load_rules_from_str, RuleFormat};
pub use log::{ExecutionStatus, RuleExecutionLog};
pub use rule::{BusinessRule, RuleType};
pub use store::{MemoryRuleStore, RuleFilter, RuleSet, RuleSetMember, RuleStore};
pub use value::FieldPath;
