//! Condition expressions
//!
//! A condition is a tree of logical groups (AND / OR / NOT) whose leaves are
//! field comparisons:
//!
//! ```json
//! {"operator": "AND", "rules": [
//!   {"field": "status", "operator": "=", "value": "active"},
//!   {"field": "total", "operator": ">", "valueField": "credit_limit"}
//! ]}
//! ```
//!
//! Trees are only built through [`parse_condition`], so a value of
//! [`ConditionExpression`] always satisfies the limits it was parsed with.

mod eval;
mod parse;

pub use eval::ConditionEvaluator;
pub use parse::parse_condition;
pub(crate) use parse::check_field_path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::config::ValidationLimits;
use crate::error::ValidationReport;
use crate::value::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl LogicalOperator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AND" => Some(Self::And),
            "OR" => Some(Self::Or),
            "NOT" => Some(Self::Not),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    IsEmpty,
    IsNotEmpty,
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 15] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::In,
        Self::NotIn,
        Self::Contains,
        Self::NotContains,
        Self::StartsWith,
        Self::EndsWith,
        Self::Matches,
        Self::IsEmpty,
        Self::IsNotEmpty,
    ];

    /// Accepts the canonical spelling plus `==`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            "IN" => Some(Self::In),
            "NOT_IN" => Some(Self::NotIn),
            "CONTAINS" => Some(Self::Contains),
            "NOT_CONTAINS" => Some(Self::NotContains),
            "STARTS_WITH" => Some(Self::StartsWith),
            "ENDS_WITH" => Some(Self::EndsWith),
            "MATCHES" => Some(Self::Matches),
            "IS_EMPTY" => Some(Self::IsEmpty),
            "IS_NOT_EMPTY" => Some(Self::IsNotEmpty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::StartsWith => "STARTS_WITH",
            Self::EndsWith => "ENDS_WITH",
            Self::Matches => "MATCHES",
            Self::IsEmpty => "IS_EMPTY",
            Self::IsNotEmpty => "IS_NOT_EMPTY",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled `MATCHES` pattern.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `IS_EMPTY` / `IS_NOT_EMPTY`
    None,
    /// `value`, possibly a `{{token}}`
    Literal(Value),
    /// `valueField`
    Field(FieldPath),
    /// `MATCHES`
    Pattern(Pattern),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: FieldPath,
    pub operator: ComparisonOperator,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCondition {
    pub operator: LogicalOperator,
    pub rules: Vec<ConditionExpression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConditionExpression {
    Group(GroupCondition),
    Comparison(Comparison),
}

impl ConditionExpression {
    /// Parse and validate with the default limits.
    pub fn from_json(json: &Value) -> Result<Self, ValidationReport> {
        parse_condition(json, &ValidationLimits::default())
    }

    /// Re-check an already parsed tree against (possibly stricter) limits.
    pub fn check_limits(&self, limits: &ValidationLimits) -> Result<(), ValidationReport> {
        parse_condition(&self.to_json(), limits).map(|_| ())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Group(group) => {
                let mut map = Map::new();
                map.insert("operator".into(), Value::String(group.operator.as_str().into()));
                map.insert(
                    "rules".into(),
                    Value::Array(group.rules.iter().map(|r| r.to_json()).collect()),
                );
                Value::Object(map)
            }
            Self::Comparison(cmp) => {
                let mut map = Map::new();
                map.insert("field".into(), Value::String(cmp.field.as_str().into()));
                map.insert("operator".into(), Value::String(cmp.operator.as_str().into()));
                match &cmp.operand {
                    Operand::None => {}
                    Operand::Literal(v) => {
                        map.insert("value".into(), v.clone());
                    }
                    Operand::Field(path) => {
                        map.insert("valueField".into(), Value::String(path.as_str().into()));
                    }
                    Operand::Pattern(p) => {
                        map.insert("value".into(), Value::String(p.as_str().into()));
                    }
                }
                Value::Object(map)
            }
        }
    }

    /// Nesting depth; a lone comparison has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Self::Group(group) => 1 + group.rules.iter().map(|r| r.depth()).max().unwrap_or(0),
            Self::Comparison(_) => 1,
        }
    }

    /// Every field path the condition reads, in tree order.
    pub fn fields(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            Self::Group(group) => group.rules.iter().for_each(|r| r.collect_fields(out)),
            Self::Comparison(cmp) => {
                out.push(&cmp.field);
                if let Operand::Field(path) = &cmp.operand {
                    out.push(path);
                }
            }
        }
    }
}

impl TryFrom<Value> for ConditionExpression {
    type Error = ValidationReport;

    fn try_from(json: Value) -> Result<Self, Self::Error> {
        Self::from_json(&json)
    }
}

impl From<ConditionExpression> for Value {
    fn from(expr: ConditionExpression) -> Self {
        expr.to_json()
    }
}
