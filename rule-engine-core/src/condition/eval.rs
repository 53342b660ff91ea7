//! Evaluate condition trees against an evaluation context

use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

use super::{Comparison, ComparisonOperator, ConditionExpression, GroupCondition, LogicalOperator, Operand};
use crate::context::EvaluationContext;
use crate::value::{as_datetime, as_number, is_empty, render_text, resolve_literal};

pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition against the context
    pub fn evaluate(&self, condition: &ConditionExpression, ctx: &EvaluationContext) -> bool {
        match condition {
            ConditionExpression::Group(group) => self.evaluate_group(group, ctx),
            ConditionExpression::Comparison(cmp) => self.evaluate_comparison(cmp, ctx),
        }
    }

    fn evaluate_group(&self, group: &GroupCondition, ctx: &EvaluationContext) -> bool {
        match group.operator {
            LogicalOperator::And => group.rules.iter().all(|r| self.evaluate(r, ctx)),
            LogicalOperator::Or => group.rules.iter().any(|r| self.evaluate(r, ctx)),
            // Parser guarantees exactly one child
            LogicalOperator::Not => !group.rules.iter().all(|r| self.evaluate(r, ctx)),
        }
    }

    fn evaluate_comparison(&self, cmp: &Comparison, ctx: &EvaluationContext) -> bool {
        let raw = cmp.field.resolve(&ctx.data);
        let actual = raw.filter(|v| !v.is_null());

        let expected: Option<Cow<'_, Value>> = match &cmp.operand {
            Operand::Literal(v) => Some(resolve_literal(v, ctx)),
            Operand::Field(path) => path.resolve(&ctx.data).map(Cow::Borrowed),
            Operand::Pattern(_) | Operand::None => None,
        };
        let expected = expected.filter(|v| !v.is_null());

        match cmp.operator {
            ComparisonOperator::Eq => self.equals(actual, expected.as_deref()),
            ComparisonOperator::Ne => !self.equals(actual, expected.as_deref()),

            ComparisonOperator::Gt
            | ComparisonOperator::Gte
            | ComparisonOperator::Lt
            | ComparisonOperator::Lte => {
                let (Some(a), Some(b)) = (actual, expected.as_deref()) else {
                    return false;
                };
                match self.compare(a, b) {
                    Some(ord) => match cmp.operator {
                        ComparisonOperator::Gt => ord == Ordering::Greater,
                        ComparisonOperator::Gte => ord != Ordering::Less,
                        ComparisonOperator::Lt => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            }

            ComparisonOperator::In => match actual {
                Some(a) => self.in_list(a, expected.as_deref()),
                None => false,
            },
            ComparisonOperator::NotIn => match actual {
                Some(a) => !self.in_list(a, expected.as_deref()),
                None => true,
            },

            ComparisonOperator::Contains => match (actual, expected.as_deref()) {
                (Some(a), Some(b)) => self.contains(a, b),
                _ => false,
            },
            ComparisonOperator::NotContains => match (actual, expected.as_deref()) {
                (Some(a), Some(b)) => !self.contains(a, b),
                _ => true,
            },

            ComparisonOperator::StartsWith => match (actual, expected.as_deref()) {
                (Some(Value::String(a)), Some(Value::String(b))) => a.starts_with(b.as_str()),
                _ => false,
            },
            ComparisonOperator::EndsWith => match (actual, expected.as_deref()) {
                (Some(Value::String(a)), Some(Value::String(b))) => a.ends_with(b.as_str()),
                _ => false,
            },

            ComparisonOperator::Matches => match (&cmp.operand, actual) {
                (Operand::Pattern(p), Some(v @ (Value::String(_) | Value::Number(_)))) => {
                    p.is_match(&render_text(v))
                }
                _ => false,
            },

            ComparisonOperator::IsEmpty => is_empty(raw),
            ComparisonOperator::IsNotEmpty => !is_empty(raw),
        }
    }

    /// Missing and null only equal null.
    fn equals(&self, actual: Option<&Value>, expected: Option<&Value>) -> bool {
        match (actual, expected) {
            (None, None) => true,
            (Some(a), Some(b)) => self.values_equal(a, b),
            _ => false,
        }
    }

    fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64(), x.as_u64(), y.as_u64()) {
                (Some(x), Some(y), _, _) => x == y,
                (_, _, Some(x), Some(y)) => x == y,
                // Mixed integer and float
                _ if x.is_f64() || y.is_f64() => as_number(a) == as_number(b),
                _ => false,
            },
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_)) => match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
            _ => a == b,
        }
    }

    /// Numeric, then chronological, then lexicographic.
    fn compare(&self, a: &Value, b: &Value) -> Option<Ordering> {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return x.partial_cmp(&y);
        }
        if let (Some(x), Some(y)) = (as_datetime(a), as_datetime(b)) {
            return Some(x.cmp(&y));
        }
        match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    /// A non-array right-hand side (from a `valueField`) acts as a one-item list.
    fn in_list(&self, actual: &Value, list: Option<&Value>) -> bool {
        match list {
            Some(Value::Array(items)) => items.iter().any(|item| self.values_equal(actual, item)),
            Some(single) => self.values_equal(actual, single),
            None => false,
        }
    }

    fn contains(&self, haystack: &Value, needle: &Value) -> bool {
        match (haystack, needle) {
            (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
            (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
            (Value::Array(items), _) => items.iter().any(|item| self.values_equal(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}
