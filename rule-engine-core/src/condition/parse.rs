//! Recursive descent validator for condition JSON.
//!
//! Walks the raw JSON once, records every problem it finds and only builds a
//! typed tree when the whole input is clean. Descent stops at the depth limit
//! and at oversized groups, so hostile input is bounded by the limits rather
//! than by its own size.

use serde_json::{Map, Value};

use super::{Comparison, ComparisonOperator, ConditionExpression, GroupCondition, LogicalOperator, Operand, Pattern};
use crate::config::ValidationLimits;
use crate::error::{child_index, child_key, IssueCode, ValidationReport};
use crate::value::FieldPath;

/// Validate `json` against `limits` and build the typed condition tree.
pub fn parse_condition(
    json: &Value,
    limits: &ValidationLimits,
) -> Result<ConditionExpression, ValidationReport> {
    let mut parser = ConditionParser {
        limits,
        report: ValidationReport::new(),
    };
    let expr = parser.node(json, "$", 1);

    match expr {
        Some(expr) if parser.report.is_empty() => Ok(expr),
        _ => {
            if parser.report.is_empty() {
                parser
                    .report
                    .push("$", IssueCode::InvalidNode, "condition could not be parsed");
            }
            Err(parser.report)
        }
    }
}

/// Validate a field path string. Shared with action configs that name fields.
pub(crate) fn check_field_path(
    raw: &str,
    path: &str,
    limits: &ValidationLimits,
    report: &mut ValidationReport,
) -> Option<FieldPath> {
    let len = raw.chars().count();
    if len > limits.max_field_path_len {
        report.push(
            path,
            IssueCode::FieldPathTooLong,
            format!(
                "field path is {} characters, maximum is {}",
                len, limits.max_field_path_len
            ),
        );
        return None;
    }

    match FieldPath::parse(raw) {
        Ok(field) => Some(field),
        Err(e) => {
            report.push(path, IssueCode::InvalidFieldPath, format!("'{}': {}", raw, e));
            None
        }
    }
}

struct ConditionParser<'a> {
    limits: &'a ValidationLimits,
    report: ValidationReport,
}

impl ConditionParser<'_> {
    fn node(&mut self, json: &Value, path: &str, depth: usize) -> Option<ConditionExpression> {
        if depth > self.limits.max_depth {
            self.report.push(
                path,
                IssueCode::MaxDepthExceeded,
                format!("condition nesting exceeds maximum depth of {}", self.limits.max_depth),
            );
            return None;
        }

        let Value::Object(map) = json else {
            self.report
                .push(path, IssueCode::InvalidNode, format!("expected an object, found {}", kind(json)));
            return None;
        };

        match (map.contains_key("rules"), map.contains_key("field")) {
            (true, true) => {
                self.report.push(
                    path,
                    IssueCode::InvalidNode,
                    "node has both 'rules' and 'field'; a node is either a group or a comparison",
                );
                None
            }
            (true, false) => self.group(map, path, depth),
            (false, true) => self.comparison(map, path),
            (false, false) => {
                self.report.push(
                    path,
                    IssueCode::InvalidNode,
                    "expected a group ('operator' + 'rules') or a comparison ('field' + 'operator')",
                );
                None
            }
        }
    }

    fn group(&mut self, map: &Map<String, Value>, path: &str, depth: usize) -> Option<ConditionExpression> {
        let op_path = child_key(path, "operator");
        let operator = match map.get("operator") {
            Some(Value::String(s)) => {
                let op = LogicalOperator::parse(s);
                if op.is_none() {
                    self.report.push(
                        &op_path,
                        IssueCode::UnknownLogicalOperator,
                        format!("unknown group operator '{}', expected AND, OR or NOT", s),
                    );
                }
                op
            }
            Some(other) => {
                self.report.push(
                    &op_path,
                    IssueCode::UnknownLogicalOperator,
                    format!("group operator must be a string, found {}", kind(other)),
                );
                None
            }
            None => {
                self.report
                    .push(&op_path, IssueCode::UnknownLogicalOperator, "group is missing 'operator'");
                None
            }
        };

        let rules_path = child_key(path, "rules");
        let Some(Value::Array(children)) = map.get("rules") else {
            self.report
                .push(&rules_path, IssueCode::InvalidNode, "'rules' must be an array");
            return None;
        };

        if children.is_empty() {
            self.report
                .push(&rules_path, IssueCode::EmptyGroup, "group must contain at least one rule");
            return None;
        }

        if children.len() > self.limits.max_group_size {
            self.report.push(
                &rules_path,
                IssueCode::GroupTooLarge,
                format!(
                    "group has {} rules, maximum is {}",
                    children.len(),
                    self.limits.max_group_size
                ),
            );
            return None;
        }

        if operator == Some(LogicalOperator::Not) && children.len() != 1 {
            self.report.push(
                &rules_path,
                IssueCode::NotArity,
                format!("NOT group must contain exactly one rule, found {}", children.len()),
            );
        }

        let mut rules = Vec::with_capacity(children.len());
        for (i, child) in children.iter().enumerate() {
            if let Some(rule) = self.node(child, &child_index(&rules_path, i), depth + 1) {
                rules.push(rule);
            }
        }

        let operator = operator?;
        if rules.len() != children.len() {
            return None;
        }

        Some(ConditionExpression::Group(GroupCondition { operator, rules }))
    }

    fn comparison(&mut self, map: &Map<String, Value>, path: &str) -> Option<ConditionExpression> {
        let field_path = child_key(path, "field");
        let field = match map.get("field") {
            Some(Value::String(raw)) => check_field_path(raw, &field_path, self.limits, &mut self.report),
            Some(other) => {
                self.report.push(
                    &field_path,
                    IssueCode::InvalidFieldPath,
                    format!("field must be a string, found {}", kind(other)),
                );
                None
            }
            None => None,
        };

        let op_path = child_key(path, "operator");
        let operator = match map.get("operator") {
            Some(Value::String(s)) => {
                let op = ComparisonOperator::parse(s);
                if op.is_none() {
                    self.report.push(
                        &op_path,
                        IssueCode::UnknownOperator,
                        format!("unknown comparison operator '{}'", s),
                    );
                }
                op
            }
            Some(other) => {
                self.report.push(
                    &op_path,
                    IssueCode::UnknownOperator,
                    format!("comparison operator must be a string, found {}", kind(other)),
                );
                None
            }
            None => {
                self.report
                    .push(&op_path, IssueCode::UnknownOperator, "comparison is missing 'operator'");
                None
            }
        };

        let value = map.get("value");
        let value_field = match map.get("valueField") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => {
                let vf_path = child_key(path, "valueField");
                match check_field_path(raw, &vf_path, self.limits, &mut self.report) {
                    Some(f) => Some(f),
                    None => return None,
                }
            }
            Some(other) => {
                self.report.push(
                    &child_key(path, "valueField"),
                    IssueCode::InvalidFieldPath,
                    format!("valueField must be a string, found {}", kind(other)),
                );
                return None;
            }
        };

        let field = field?;
        let operator = operator?;

        if value.is_some() && value_field.is_some() {
            self.report.push(
                path,
                IssueCode::OperandConflict,
                "'value' and 'valueField' are mutually exclusive",
            );
            return None;
        }

        let operand = self.operand(operator, value, value_field, path)?;
        Some(ConditionExpression::Comparison(Comparison {
            field,
            operator,
            operand,
        }))
    }

    fn operand(
        &mut self,
        operator: ComparisonOperator,
        value: Option<&Value>,
        value_field: Option<FieldPath>,
        path: &str,
    ) -> Option<Operand> {
        use ComparisonOperator::*;

        let value_path = child_key(path, "value");

        if let Some(field) = value_field {
            return match operator {
                IsEmpty | IsNotEmpty => {
                    self.unexpected_operand(operator, path);
                    None
                }
                Matches => {
                    self.report.push(
                        path,
                        IssueCode::InvalidOperand,
                        "MATCHES requires a literal pattern in 'value', not 'valueField'",
                    );
                    None
                }
                _ => Some(Operand::Field(field)),
            };
        }

        match operator {
            IsEmpty | IsNotEmpty => match value {
                None | Some(Value::Null) => Some(Operand::None),
                Some(_) => {
                    self.unexpected_operand(operator, &value_path);
                    None
                }
            },
            Matches => match value {
                Some(Value::String(pattern)) => match Pattern::new(pattern) {
                    Ok(p) => Some(Operand::Pattern(p)),
                    Err(e) => {
                        self.report.push(
                            &value_path,
                            IssueCode::InvalidPattern,
                            format!("invalid regular expression: {}", e),
                        );
                        None
                    }
                },
                Some(other) => self.invalid_operand(operator, "a string pattern", other, &value_path),
                None => self.missing_operand(operator, path),
            },
            In | NotIn => match value {
                Some(Value::Array(items)) if items.len() > self.limits.max_list_values => {
                    self.report.push(
                        &value_path,
                        IssueCode::ListTooLarge,
                        format!(
                            "{} list has {} values, maximum is {}",
                            operator,
                            items.len(),
                            self.limits.max_list_values
                        ),
                    );
                    None
                }
                Some(v @ Value::Array(_)) => Some(Operand::Literal(v.clone())),
                Some(other) => self.invalid_operand(operator, "an array", other, &value_path),
                None => self.missing_operand(operator, path),
            },
            Gt | Gte | Lt | Lte => match value {
                Some(v @ (Value::Number(_) | Value::String(_))) => Some(Operand::Literal(v.clone())),
                Some(other) => self.invalid_operand(operator, "a number, date or string", other, &value_path),
                None => self.missing_operand(operator, path),
            },
            StartsWith | EndsWith => match value {
                Some(v @ Value::String(_)) => Some(Operand::Literal(v.clone())),
                Some(other) => self.invalid_operand(operator, "a string", other, &value_path),
                None => self.missing_operand(operator, path),
            },
            Eq | Ne | Contains | NotContains => match value {
                Some(v) => Some(Operand::Literal(v.clone())),
                None => self.missing_operand(operator, path),
            },
        }
    }

    fn unexpected_operand(&mut self, operator: ComparisonOperator, path: &str) {
        self.report.push(
            path,
            IssueCode::UnexpectedOperand,
            format!("{} takes no value", operator),
        );
    }

    fn missing_operand(&mut self, operator: ComparisonOperator, path: &str) -> Option<Operand> {
        self.report.push(
            path,
            IssueCode::MissingOperand,
            format!("{} requires 'value' or 'valueField'", operator),
        );
        None
    }

    fn invalid_operand(
        &mut self,
        operator: ComparisonOperator,
        expected: &str,
        found: &Value,
        path: &str,
    ) -> Option<Operand> {
        self.report.push(
            path,
            IssueCode::InvalidOperand,
            format!("{} requires {}, found {}", operator, expected, kind(found)),
        );
        None
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
