//! Built-in action handlers
//!
//! Every handler deserializes its config into a typed struct (unknown keys
//! are rejected) and then applies the semantic checks serde cannot express.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::action_types::*;
use super::{ActionContext, ActionHandler, ActionOutcome, Effect, EffectSink, LogLevel, Severity};
use crate::condition::check_field_path;
use crate::config::{ExecutionSettings, ValidationLimits};
use crate::error::{ActionError, IssueCode, ValidationReport};
use crate::value::{interpolate, interpolate_value, FieldPath};

const WEBHOOK_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

/// All built-in handlers. Effects go to `sink`; webhooks use their own client.
pub fn handlers(sink: Arc<dyn EffectSink>, settings: &ExecutionSettings) -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(TransitionHandler { allow: true }),
        Arc::new(TransitionHandler { allow: false }),
        Arc::new(LogHandler),
        Arc::new(MessageHandler {
            severity: Severity::Error,
        }),
        Arc::new(MessageHandler {
            severity: Severity::Warning,
        }),
        Arc::new(MessageHandler {
            severity: Severity::Info,
        }),
        Arc::new(SetFieldHandler),
        Arc::new(NotifyHandler { sink: sink.clone() }),
        Arc::new(EmitEventHandler { sink: sink.clone() }),
        Arc::new(StartWorkflowHandler { sink: sink.clone() }),
        Arc::new(CreateActivityHandler { sink }),
        Arc::new(WebhookHandler::new(Duration::from_millis(settings.webhook_timeout_ms))),
    ]
}

// =============================================================================
// CONFIG HELPERS
// =============================================================================

fn parse_config<T: DeserializeOwned>(config: &Map<String, Value>) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(config.clone()))
}

fn validated<T: DeserializeOwned>(config: &Map<String, Value>, report: &mut ValidationReport) -> Option<T> {
    match parse_config(config) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            report.push("$", IssueCode::InvalidActionConfig, e.to_string());
            None
        }
    }
}

fn typed<T: DeserializeOwned>(action_type: &str, config: &Map<String, Value>) -> Result<T, ActionError> {
    parse_config(config).map_err(|e| ActionError::InvalidConfig {
        action_type: action_type.to_string(),
        message: e.to_string(),
    })
}

fn check_text(report: &mut ValidationReport, path: &str, text: &str, limits: &ValidationLimits) {
    if text.trim().is_empty() {
        report.push(path, IssueCode::InvalidActionConfig, "must not be empty");
        return;
    }
    let len = text.chars().count();
    if len > limits.max_message_len {
        report.push(
            path,
            IssueCode::MessageTooLong,
            format!("{} characters, maximum is {}", len, limits.max_message_len),
        );
    }
}

async fn send(
    sink: &dyn EffectSink,
    action_type: &str,
    ctx: &ActionContext<'_>,
    effect: Effect,
) -> Result<ActionOutcome, ActionError> {
    if ctx.dry_run {
        return Ok(ActionOutcome::Skipped { effect });
    }
    sink.dispatch(ctx.rule_id, &effect)
        .await
        .map_err(|source| ActionError::Dispatch {
            action_type: action_type.to_string(),
            source,
        })?;
    Ok(ActionOutcome::Dispatched { effect })
}

// =============================================================================
// ALLOW_TRANSITION / BLOCK_TRANSITION
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TransitionConfig {
    message: Option<String>,
}

pub struct TransitionHandler {
    allow: bool,
}

#[async_trait]
impl ActionHandler for TransitionHandler {
    fn action_type(&self) -> &str {
        if self.allow {
            ALLOW_TRANSITION
        } else {
            BLOCK_TRANSITION
        }
    }

    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(TransitionConfig { message: Some(m) }) = validated(config, &mut report) {
            check_text(&mut report, "$.message", &m, limits);
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: TransitionConfig = typed(self.action_type(), config)?;
        let message = cfg.message.map(|m| interpolate(&m, ctx.eval));
        Ok(if self.allow {
            ActionOutcome::Allowed { message }
        } else {
            ActionOutcome::Blocked { message }
        })
    }
}

// =============================================================================
// LOG
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LogConfig {
    message: String,
    #[serde(default)]
    level: LogLevel,
}

pub struct LogHandler;

#[async_trait]
impl ActionHandler for LogHandler {
    fn action_type(&self) -> &str {
        LOG
    }

    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<LogConfig>(config, &mut report) {
            check_text(&mut report, "$.message", &cfg.message, limits);
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: LogConfig = typed(LOG, config)?;
        let message = interpolate(&cfg.message, ctx.eval);
        let rule_id = ctx.rule_id;

        match cfg.level {
            LogLevel::Debug => debug!(rule_id, "{}", message),
            LogLevel::Info => info!(rule_id, "{}", message),
            LogLevel::Warn => warn!(rule_id, "{}", message),
            LogLevel::Error => error!(rule_id, "{}", message),
        }

        Ok(ActionOutcome::Logged {
            level: cfg.level,
            message,
        })
    }
}

// =============================================================================
// SHOW_ERROR / SHOW_WARNING / SHOW_INFO
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MessageConfig {
    message: String,
}

pub struct MessageHandler {
    severity: Severity,
}

#[async_trait]
impl ActionHandler for MessageHandler {
    fn action_type(&self) -> &str {
        match self.severity {
            Severity::Error => SHOW_ERROR,
            Severity::Warning => SHOW_WARNING,
            Severity::Info => SHOW_INFO,
        }
    }

    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<MessageConfig>(config, &mut report) {
            check_text(&mut report, "$.message", &cfg.message, limits);
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: MessageConfig = typed(self.action_type(), config)?;
        Ok(ActionOutcome::Message {
            severity: self.severity,
            text: interpolate(&cfg.message, ctx.eval),
        })
    }
}

// =============================================================================
// SET_FIELD
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SetFieldConfig {
    field: String,
    value: Value,
}

pub struct SetFieldHandler;

#[async_trait]
impl ActionHandler for SetFieldHandler {
    fn action_type(&self) -> &str {
        SET_FIELD
    }

    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<SetFieldConfig>(config, &mut report) {
            check_field_path(&cfg.field, "$.field", limits, &mut report);
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: SetFieldConfig = typed(SET_FIELD, config)?;
        let field = FieldPath::parse(&cfg.field).map_err(|e| ActionError::InvalidConfig {
            action_type: SET_FIELD.to_string(),
            message: e.to_string(),
        })?;

        Ok(ActionOutcome::FieldSet {
            field,
            value: interpolate_value(&cfg.value, ctx.eval),
        })
    }
}

// =============================================================================
// NOTIFY
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NotifyConfig {
    recipients: Vec<String>,
    message: String,
    subject: Option<String>,
    template: Option<String>,
}

pub struct NotifyHandler {
    sink: Arc<dyn EffectSink>,
}

#[async_trait]
impl ActionHandler for NotifyHandler {
    fn action_type(&self) -> &str {
        NOTIFY
    }

    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<NotifyConfig>(config, &mut report) {
            if cfg.recipients.is_empty() {
                report.push(
                    "$.recipients",
                    IssueCode::InvalidActionConfig,
                    "at least one recipient is required",
                );
            }
            for (i, r) in cfg.recipients.iter().enumerate() {
                if r.trim().is_empty() {
                    report.push(
                        &format!("$.recipients[{}]", i),
                        IssueCode::InvalidActionConfig,
                        "recipient must not be empty",
                    );
                }
            }
            check_text(&mut report, "$.message", &cfg.message, limits);
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: NotifyConfig = typed(NOTIFY, config)?;
        let effect = Effect::Notification {
            recipients: cfg
                .recipients
                .iter()
                .map(|r| interpolate(r, ctx.eval))
                .filter(|r| !r.is_empty())
                .collect(),
            subject: cfg.subject.map(|s| interpolate(&s, ctx.eval)),
            message: interpolate(&cfg.message, ctx.eval),
            template: cfg.template,
        };
        send(&*self.sink, NOTIFY, ctx, effect).await
    }
}

// =============================================================================
// EMIT_EVENT
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct EmitEventConfig {
    event: String,
    #[serde(default)]
    payload: Value,
}

pub struct EmitEventHandler {
    sink: Arc<dyn EffectSink>,
}

#[async_trait]
impl ActionHandler for EmitEventHandler {
    fn action_type(&self) -> &str {
        EMIT_EVENT
    }

    fn validate(&self, config: &Map<String, Value>, _limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<EmitEventConfig>(config, &mut report) {
            if cfg.event.is_empty() || cfg.event.chars().any(char::is_whitespace) {
                report.push(
                    "$.event",
                    IssueCode::InvalidActionConfig,
                    "event name must be non-empty and contain no whitespace",
                );
            }
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: EmitEventConfig = typed(EMIT_EVENT, config)?;
        let effect = Effect::Event {
            event: cfg.event,
            payload: interpolate_value(&cfg.payload, ctx.eval),
        };
        send(&*self.sink, EMIT_EVENT, ctx, effect).await
    }
}

// =============================================================================
// START_WORKFLOW
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StartWorkflowConfig {
    workflow_code: String,
    #[serde(default)]
    initial_data: Value,
}

pub struct StartWorkflowHandler {
    sink: Arc<dyn EffectSink>,
}

#[async_trait]
impl ActionHandler for StartWorkflowHandler {
    fn action_type(&self) -> &str {
        START_WORKFLOW
    }

    fn validate(&self, config: &Map<String, Value>, _limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<StartWorkflowConfig>(config, &mut report) {
            if cfg.workflow_code.trim().is_empty() {
                report.push(
                    "$.workflowCode",
                    IssueCode::InvalidActionConfig,
                    "workflow code must not be empty",
                );
            }
            if !matches!(cfg.initial_data, Value::Null | Value::Object(_)) {
                report.push(
                    "$.initialData",
                    IssueCode::InvalidActionConfig,
                    "initial data must be an object",
                );
            }
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: StartWorkflowConfig = typed(START_WORKFLOW, config)?;
        let effect = Effect::Workflow {
            workflow_code: cfg.workflow_code,
            initial_data: interpolate_value(&cfg.initial_data, ctx.eval),
        };
        send(&*self.sink, START_WORKFLOW, ctx, effect).await
    }
}

// =============================================================================
// CREATE_ACTIVITY
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateActivityConfig {
    subject: String,
    activity_type: Option<String>,
    body: Option<String>,
    assignee: Option<String>,
}

pub struct CreateActivityHandler {
    sink: Arc<dyn EffectSink>,
}

#[async_trait]
impl ActionHandler for CreateActivityHandler {
    fn action_type(&self) -> &str {
        CREATE_ACTIVITY
    }

    fn validate(&self, config: &Map<String, Value>, limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<CreateActivityConfig>(config, &mut report) {
            check_text(&mut report, "$.subject", &cfg.subject, limits);
            if let Some(body) = &cfg.body {
                check_text(&mut report, "$.body", body, limits);
            }
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: CreateActivityConfig = typed(CREATE_ACTIVITY, config)?;
        let effect = Effect::Activity {
            subject: interpolate(&cfg.subject, ctx.eval),
            activity_type: cfg.activity_type,
            body: cfg.body.map(|b| interpolate(&b, ctx.eval)),
            assignee: cfg.assignee.map(|a| interpolate(&a, ctx.eval)),
        };
        send(&*self.sink, CREATE_ACTIVITY, ctx, effect).await
    }
}

// =============================================================================
// CALL_WEBHOOK
// =============================================================================

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WebhookConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: Option<Value>,
    timeout_ms: Option<u64>,
}

fn check_url(raw: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("'{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(format!("unsupported scheme '{}', expected http or https", other)),
    }
}

pub struct WebhookHandler {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl WebhookHandler {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout,
        }
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    fn action_type(&self) -> &str {
        CALL_WEBHOOK
    }

    fn validate(&self, config: &Map<String, Value>, _limits: &ValidationLimits) -> ValidationReport {
        let mut report = ValidationReport::new();
        if let Some(cfg) = validated::<WebhookConfig>(config, &mut report) {
            if let Err(e) = check_url(&cfg.url) {
                report.push("$.url", IssueCode::InvalidActionConfig, e);
            }
            let method = cfg.method.to_ascii_uppercase();
            if !WEBHOOK_METHODS.contains(&method.as_str()) {
                report.push(
                    "$.method",
                    IssueCode::InvalidActionConfig,
                    format!("unsupported method '{}'", cfg.method),
                );
            }
            if cfg.timeout_ms == Some(0) {
                report.push(
                    "$.timeoutMs",
                    IssueCode::InvalidActionConfig,
                    "timeout must be greater than zero",
                );
            }
        }
        report
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let cfg: WebhookConfig = typed(CALL_WEBHOOK, config)?;
        let method = cfg.method.to_ascii_uppercase();
        let url = interpolate(&cfg.url, ctx.eval);
        let headers: BTreeMap<String, String> = cfg
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), interpolate(v, ctx.eval)))
            .collect();
        let body = cfg.body.as_ref().map(|b| interpolate_value(b, ctx.eval));

        let effect = Effect::Webhook {
            method: method.clone(),
            url: url.clone(),
            headers: headers.clone(),
            body: body.clone(),
        };
        if ctx.dry_run {
            return Ok(ActionOutcome::Skipped { effect });
        }

        let webhook_error = |message: String| ActionError::Webhook {
            method: method.clone(),
            url: url.clone(),
            message,
        };

        let target = check_url(&url).map_err(&webhook_error)?;
        let http_method =
            reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| webhook_error(e.to_string()))?;
        let timeout = cfg
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let mut request = self.client.request(http_method, target).timeout(timeout);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| webhook_error(e.to_string()))?;
        let status = response.status();
        debug!(rule_id = ctx.rule_id, %url, status = status.as_u16(), "Webhook called");

        if !status.is_success() {
            return Err(webhook_error(format!("HTTP {}", status)));
        }

        Ok(ActionOutcome::WebhookCalled {
            method,
            url,
            status: status.as_u16(),
        })
    }
}
