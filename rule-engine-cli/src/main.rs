//! Rule engine command line interface
//!
//! Validate rule files and condition trees, and dry-run rules against entity
//! data without a database.
//!
//! # Usage
//!
//! ```bash
//! # Validate a rules file
//! rule-engine validate --file config/rules/orders.yaml
//!
//! # Check a single condition tree
//! echo '{"field":"total","operator":">","value":100}' | rule-engine check
//!
//! # Dry-run the rules for an entity event
//! rule-engine eval --rules config/rules/orders.yaml --data order.json \
//!     --entity Order --event beforeSave
//!
//! # List registered action types
//! rule-engine actions
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use rule_engine_core::{
    load_rules, load_rules_from_str, parse_condition, ActionOutcome, ActionRegistry, ConfigLoader, EngineConfig,
    EvaluationContext, ExecutionRequest, ExecutionStatus, MemoryRuleStore, RuleEngine, RuleEngineResult, RuleFormat,
    TenantScope, TracingSink, UserContext, ValidationReport,
};
use serde_json::{json, Value};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rule-engine")]
#[command(version = "0.1.0")]
#[command(about = "Validate and evaluate business rules")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: pretty (default) or json
    #[arg(long, short = 'o', global = true, default_value = "pretty", value_enum)]
    format: OutputFormat,

    /// Engine config file (defaults to $RULE_ENGINE_CONFIG, then config/rule-engine.yaml)
    #[arg(long, global = true, env = "RULE_ENGINE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a YAML or JSON rules file
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate a condition tree (reads stdin if no file is given)
    Check {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Run rules from a file against entity data
    Eval {
        /// Rules file
        #[arg(short, long)]
        rules: PathBuf,

        /// Entity data as JSON (reads stdin if not provided)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Entity type, e.g. Order
        #[arg(short, long)]
        entity: String,

        /// Lifecycle event, e.g. beforeSave
        #[arg(long)]
        event: Option<String>,

        #[arg(long)]
        entity_id: Option<String>,

        #[arg(long)]
        user_id: Option<String>,

        #[arg(long)]
        user_email: Option<String>,

        #[arg(long)]
        user_role: Option<String>,

        #[arg(long, default_value_t = Uuid::nil())]
        tenant: Uuid,

        #[arg(long, default_value_t = Uuid::nil())]
        organization: Uuid,

        /// Dispatch effects (to the log) instead of a dry run
        #[arg(long)]
        execute: bool,
    },

    /// List the registered action types
    Actions,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let format = cli.format;

    let result = match load_config(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Validate { file } => cmd_validate(&file, &config, format),
            Commands::Check { file } => cmd_check(file, &config, format),
            Commands::Eval {
                rules,
                data,
                entity,
                event,
                entity_id,
                user_id,
                user_email,
                user_role,
                tenant,
                organization,
                execute,
            } => {
                let user = (user_id.is_some() || user_email.is_some() || user_role.is_some()).then(|| UserContext {
                    id: user_id,
                    email: user_email,
                    role: user_role,
                });
                let target = EvalTarget {
                    entity,
                    event,
                    entity_id,
                    user,
                    scope: TenantScope::new(tenant, organization),
                    execute,
                };
                cmd_eval(&rules, data, target, config, format).await
            }
            Commands::Actions => cmd_actions(&config, format),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if format == OutputFormat::Json {
                println!("{}", json!({"error": format!("{:#}", e)}));
            } else {
                eprintln!("{}: {:#}", "error".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => ConfigLoader::new(path).load(),
        None => ConfigLoader::from_env().load(),
    }
}

fn registry(config: &EngineConfig) -> ActionRegistry {
    ActionRegistry::with_builtins(Arc::new(TracingSink), &config.execution)
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn cmd_validate(file: &Path, config: &EngineConfig, format: OutputFormat) -> Result<bool> {
    let source = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let scope = TenantScope::new(Uuid::nil(), Uuid::nil());

    let loaded = load_rules_from_str(
        &source,
        RuleFormat::from_path(file),
        scope,
        &registry(config),
        &config.limits,
    );

    match (&loaded, format) {
        (Ok(rules), OutputFormat::Json) => print_json(&json!({
            "valid": true,
            "rules": rules.iter().map(|r| r.rule_id.as_str()).collect::<Vec<_>>(),
        }))?,
        (Ok(rules), OutputFormat::Pretty) => {
            println!("{} {} rule(s) in {}", "OK".green().bold(), rules.len(), file.display());
            for rule in rules {
                println!(
                    "  {} {} [{:?}, {}] priority {}",
                    rule.rule_id.cyan(),
                    rule.name,
                    rule.rule_type,
                    rule.entity_type,
                    rule.priority
                );
            }
        }
        (Err(report), OutputFormat::Json) => print_json(&json!({"valid": false, "issues": report.issues}))?,
        (Err(report), OutputFormat::Pretty) => print_report(report),
    }

    Ok(loaded.is_ok())
}

fn cmd_check(file: Option<PathBuf>, config: &EngineConfig, format: OutputFormat) -> Result<bool> {
    let source = read_input(file)?;
    let condition: Value = serde_json::from_str(&source).context("Condition is not valid JSON")?;

    let parsed = parse_condition(&condition, &config.limits);
    match (&parsed, format) {
        (Ok(expr), OutputFormat::Json) => print_json(&json!({
            "valid": true,
            "depth": expr.depth(),
            "fields": expr.fields().iter().map(|f| f.as_str()).collect::<Vec<_>>(),
        }))?,
        (Ok(expr), OutputFormat::Pretty) => {
            let fields: Vec<&str> = expr.fields().iter().map(|f| f.as_str()).collect();
            println!(
                "{} Condition is valid (depth {}, fields: {})",
                "OK".green().bold(),
                expr.depth(),
                fields.join(", ")
            );
        }
        (Err(report), OutputFormat::Json) => print_json(&json!({"valid": false, "issues": report.issues}))?,
        (Err(report), OutputFormat::Pretty) => print_report(report),
    }

    Ok(parsed.is_ok())
}

struct EvalTarget {
    entity: String,
    event: Option<String>,
    entity_id: Option<String>,
    user: Option<UserContext>,
    scope: TenantScope,
    execute: bool,
}

async fn cmd_eval(
    rules_file: &Path,
    data: Option<PathBuf>,
    target: EvalTarget,
    config: EngineConfig,
    format: OutputFormat,
) -> Result<bool> {
    let registry = registry(&config);
    let rules = load_rules(rules_file, target.scope, &registry, &config.limits)?;

    let data: Value = serde_json::from_str(&read_input(data)?).context("Entity data is not valid JSON")?;
    let mut context = EvaluationContext::new(data);
    if let Some(user) = target.user {
        context = context.with_user(user);
    }

    let engine = RuleEngine::new(Arc::new(MemoryRuleStore::new()), Arc::new(registry), config);
    for rule in &rules {
        engine.save_rule(rule).await?;
    }

    let mut request = ExecutionRequest::new(target.scope, target.entity, context);
    request.event_type = target.event;
    request.entity_id = target.entity_id;
    request.dry_run = !target.execute;

    let result = engine.execute(request).await?;
    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Pretty => print_result(&result),
    }

    Ok(result.allowed && !result.has_errors())
}

fn cmd_actions(config: &EngineConfig, format: OutputFormat) -> Result<bool> {
    let registry = registry(config);
    let types = registry.action_types();
    match format {
        OutputFormat::Json => print_json(&types)?,
        OutputFormat::Pretty => {
            println!("{} action type(s):", types.len());
            for t in types {
                println!("  {}", t.green());
            }
        }
    }
    Ok(true)
}

// =============================================================================
// HELPERS
// =============================================================================

fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("JSON serialization failed")?
    );
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!("{} {} issue(s)", "INVALID".red().bold(), report.len());
    for issue in &report.issues {
        println!("  {} {} {}", format!("[{}]", issue.code).yellow(), issue.path.cyan(), issue.message);
    }
}

fn print_result(result: &RuleEngineResult) {
    let verdict = if result.allowed {
        "ALLOWED".green().bold()
    } else {
        "BLOCKED".red().bold()
    };
    let mode = if result.dry_run { " (dry run)" } else { "" };
    println!(
        "{}{} - {} rule(s) in {} ms",
        verdict,
        mode,
        result.rules.len(),
        result.duration_ms
    );

    for rule in &result.rules {
        let status = match rule.status {
            ExecutionStatus::Success => "PASS".green(),
            ExecutionStatus::Failure => "FAIL".yellow(),
            ExecutionStatus::Error => "ERROR".red(),
        };
        println!("  {:5} {} {}", status, rule.rule_id.cyan(), rule.name);
        for outcome in &rule.outcomes {
            println!("        {}", describe(outcome));
        }
        if let Some(error) = &rule.error {
            println!("        {}", error.red());
        }
    }

    for text in &result.messages.errors {
        println!("{} {}", "error:".red().bold(), text);
    }
    for text in &result.messages.warnings {
        println!("{} {}", "warning:".yellow().bold(), text);
    }
    for text in &result.messages.info {
        println!("{} {}", "info:".blue().bold(), text);
    }
    if !result.field_updates.is_empty() {
        println!("{}", "Field updates:".bold());
        for update in &result.field_updates {
            println!("  {} = {}", update.field, update.value);
        }
    }
}

fn describe(outcome: &ActionOutcome) -> String {
    match outcome {
        ActionOutcome::Allowed { .. } => "allow transition".to_string(),
        ActionOutcome::Blocked { message } => format!("block transition: {}", message.as_deref().unwrap_or("-")),
        ActionOutcome::Message { severity, text } => format!("{:?}: {}", severity, text),
        ActionOutcome::FieldSet { field, value } => format!("set {} = {}", field, value),
        ActionOutcome::Logged { level, message } => format!("log {:?}: {}", level, message),
        ActionOutcome::Dispatched { effect } => format!("sent {}", effect.kind()),
        ActionOutcome::WebhookCalled { method, url, status } => format!("{} {} -> {}", method, url, status),
        ActionOutcome::Skipped { effect } => format!("would send {}", effect.kind()),
    }
}
