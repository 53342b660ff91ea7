//! Actions
//!
//! An action is a typed side effect attached to a rule. The wire shape is a
//! type name plus a free-form config object:
//!
//! ```json
//! {"type": "SET_FIELD", "config": {"field": "status", "value": "on_hold"}}
//! ```
//!
//! Each type is served by an [`ActionHandler`] that validates the config
//! shape and executes it. Handlers live in an [`ActionRegistry`], which is
//! the dispatch table the engine uses. Hosts can register their own types
//! next to the built-ins.

pub mod builtin;
mod registry;
mod sink;

pub use registry::ActionRegistry;
pub use sink::{EffectSink, MemorySink, TracingSink};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::ValidationLimits;
use crate::context::EvaluationContext;
use crate::error::{ActionError, ValidationReport};
use crate::value::FieldPath;

/// Built-in action type names.
pub mod action_types {
    pub const ALLOW_TRANSITION: &str = "ALLOW_TRANSITION";
    pub const BLOCK_TRANSITION: &str = "BLOCK_TRANSITION";
    pub const LOG: &str = "LOG";
    pub const SHOW_ERROR: &str = "SHOW_ERROR";
    pub const SHOW_WARNING: &str = "SHOW_WARNING";
    pub const SHOW_INFO: &str = "SHOW_INFO";
    pub const SET_FIELD: &str = "SET_FIELD";
    pub const NOTIFY: &str = "NOTIFY";
    pub const CALL_WEBHOOK: &str = "CALL_WEBHOOK";
    pub const EMIT_EVENT: &str = "EMIT_EVENT";
    pub const START_WORKFLOW: &str = "START_WORKFLOW";
    pub const CREATE_ACTIVITY: &str = "CREATE_ACTIVITY";
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,

    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Action {
    pub fn new(action_type: impl Into<String>, config: Value) -> Self {
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            action_type: action_type.into(),
            config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// An outbound side effect handed to an [`EffectSink`] (or sent over HTTP
/// for webhooks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Notification {
        recipients: Vec<String>,
        subject: Option<String>,
        message: String,
        template: Option<String>,
    },
    Event {
        event: String,
        payload: Value,
    },
    Workflow {
        workflow_code: String,
        initial_data: Value,
    },
    Activity {
        subject: String,
        activity_type: Option<String>,
        body: Option<String>,
        assignee: Option<String>,
    },
    Webhook {
        method: String,
        url: String,
        headers: BTreeMap<String, String>,
        body: Option<Value>,
    },
}

impl Effect {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::Event { .. } => "event",
            Self::Workflow { .. } => "workflow",
            Self::Activity { .. } => "activity",
            Self::Webhook { .. } => "webhook",
        }
    }
}

/// What executing one action produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    Allowed {
        message: Option<String>,
    },
    Blocked {
        message: Option<String>,
    },
    Message {
        severity: Severity,
        text: String,
    },
    FieldSet {
        field: FieldPath,
        value: Value,
    },
    Logged {
        level: LogLevel,
        message: String,
    },
    Dispatched {
        effect: Effect,
    },
    WebhookCalled {
        method: String,
        url: String,
        status: u16,
    },
    /// Dry run: the effect was resolved but not sent.
    Skipped {
        effect: Effect,
    },
}

/// Runtime inputs for one action execution.
pub struct ActionContext<'a> {
    pub rule_id: &'a str,
    pub eval: &'a EvaluationContext,
    pub dry_run: bool,
}

/// Dispatch contract for one action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Type name matched against `Action::action_type`.
    fn action_type(&self) -> &str;

    /// Check the config shape. Issue paths are rooted at `$` (the config
    /// object) and re-rooted by the caller.
    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport;

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError>;
}
