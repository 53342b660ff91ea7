use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{builtin, Action, ActionContext, ActionHandler, ActionOutcome, EffectSink};
use crate::config::{ExecutionSettings, ValidationLimits};
use crate::error::{child_index, ActionError, IssueCode, ValidationReport};

/// Dispatch table from action type name to handler.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// An empty registry. Most callers want [`ActionRegistry::with_builtins`].
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_builtins(sink: Arc<dyn EffectSink>, settings: &ExecutionSettings) -> Self {
        let mut registry = Self::new();
        for handler in builtin::handlers(sink, settings) {
            registry.register(handler);
        }
        registry
    }

    /// Register a handler, returning the one it replaced (if any).
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) -> Option<Arc<dyn ActionHandler>> {
        let action_type = handler.action_type().to_string();
        debug!(action_type = %action_type, "Registering action handler");
        self.handlers.insert(action_type, handler)
    }

    pub fn get(&self, action_type: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_type)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Registered type names, sorted.
    pub fn action_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Validate one action. Paths are rooted at the action object.
    pub fn validate_action(&self, action: &Action, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        match self.get(&action.action_type) {
            Some(handler) => report.absorb("$.config", handler.validate(&action.config, limits)),
            None => report.push(
                "$.type",
                IssueCode::UnknownActionType,
                format!("unknown action type '{}'", action.action_type),
            ),
        }
        report
    }

    /// Validate an action list. Paths are rooted at the list (`$[i]...`).
    pub fn validate_actions(&self, actions: &[Action], limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if actions.len() > limits.max_actions {
            report.push(
                "$",
                IssueCode::TooManyActions,
                format!("{} actions, maximum is {}", actions.len(), limits.max_actions),
            );
            return report;
        }
        for (i, action) in actions.iter().enumerate() {
            report.absorb(&child_index("$", i), self.validate_action(action, limits));
        }
        report
    }

    /// Parse and validate a raw JSON action list.
    pub fn parse_actions(&self, json: &Value, limits: &ValidationLimits) -> Result<Vec<Action>, ValidationReport> {
        let mut report = ValidationReport::new();

        let items = match json {
            Value::Null => return Ok(Vec::new()),
            Value::Array(items) => items,
            _ => {
                report.push("$", IssueCode::InvalidActionList, "actions must be an array");
                return Err(report);
            }
        };

        let mut actions = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match serde_json::from_value::<Action>(item.clone()) {
                Ok(action) => actions.push(action),
                Err(e) => report.push(&child_index("$", i), IssueCode::InvalidActionConfig, e.to_string()),
            }
        }
        if !report.is_empty() {
            return Err(report);
        }

        self.validate_actions(&actions, limits).into_result(actions)
    }

    pub async fn execute(&self, action: &Action, ctx: &ActionContext<'_>) -> Result<ActionOutcome, ActionError> {
        let handler = self
            .get(&action.action_type)
            .ok_or_else(|| ActionError::UnknownType(action.action_type.clone()))?;
        handler.execute(&action.config, ctx).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
