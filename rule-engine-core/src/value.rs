//! Field paths, special value tokens and message interpolation.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::context::EvaluationContext;

// =============================================================================
// FIELD PATHS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldPathError {
    #[error("field path is empty")]
    Empty,

    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated index starting at position {0}")]
    UnterminatedIndex(usize),

    #[error("path ends after '.'")]
    TrailingDot,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A dotted path into entity data, e.g. `order.lines[0].sku`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Grammar: `ident ( "." ident | "[" digits "]" )*` where
    /// `ident = [A-Za-z_][A-Za-z0-9_]*`.
    pub fn parse(raw: &str) -> Result<Self, FieldPathError> {
        if raw.is_empty() {
            return Err(FieldPathError::Empty);
        }

        let chars: Vec<(usize, char)> = raw.char_indices().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        // Leading identifier
        let (ident, next) = read_ident(&chars, i)?;
        segments.push(PathSegment::Key(ident));
        i = next;

        while i < chars.len() {
            let (pos, c) = chars[i];
            match c {
                '.' => {
                    if i + 1 >= chars.len() {
                        return Err(FieldPathError::TrailingDot);
                    }
                    let (ident, next) = read_ident(&chars, i + 1)?;
                    segments.push(PathSegment::Key(ident));
                    i = next;
                }
                '[' => {
                    let start = i + 1;
                    let mut j = start;
                    while j < chars.len() && chars[j].1.is_ascii_digit() {
                        j += 1;
                    }
                    if j >= chars.len() {
                        return Err(FieldPathError::UnterminatedIndex(pos));
                    }
                    if chars[j].1 != ']' || j == start {
                        return Err(FieldPathError::UnexpectedChar(chars[j].1, chars[j].0));
                    }
                    let digits: String = chars[start..j].iter().map(|(_, c)| *c).collect();
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| FieldPathError::UnexpectedChar(chars[start].1, chars[start].0))?;
                    segments.push(PathSegment::Index(index));
                    i = j + 1;
                }
                other => return Err(FieldPathError::UnexpectedChar(other, pos)),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk `data` along the path.
    pub fn resolve<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        let mut current = data;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
                (PathSegment::Index(idx), Value::Array(items)) => items.get(*idx)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at the path. Missing or null intermediate keys become
    /// objects; array indexes must already exist. Returns false when the path
    /// runs through a scalar or past the end of an array.
    pub fn assign(&self, data: &mut Value, value: Value) -> bool {
        let mut current = data;
        let last = self.segments.len() - 1;

        for (pos, segment) in self.segments.iter().enumerate() {
            if current.is_null() && matches!(segment, PathSegment::Key(_)) {
                *current = Value::Object(Default::default());
            }

            let is_last = pos == last;
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => {
                    if is_last {
                        map.insert(key.clone(), value);
                        return true;
                    }
                    map.entry(key.clone()).or_insert(Value::Null)
                }
                (PathSegment::Index(idx), Value::Array(items)) => {
                    let Some(slot) = items.get_mut(*idx) else {
                        return false;
                    };
                    if is_last {
                        *slot = value;
                        return true;
                    }
                    slot
                }
                _ => return false,
            };
        }

        false
    }
}

fn read_ident(chars: &[(usize, char)], start: usize) -> Result<(String, usize), FieldPathError> {
    let Some(&(pos, first)) = chars.get(start) else {
        return Err(FieldPathError::TrailingDot);
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(FieldPathError::UnexpectedChar(first, pos));
    }

    let mut end = start + 1;
    while end < chars.len() && (chars[end].1.is_ascii_alphanumeric() || chars[end].1 == '_') {
        end += 1;
    }

    let ident = chars[start..end].iter().map(|(_, c)| *c).collect();
    Ok((ident, end))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = FieldPathError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        FieldPath::parse(&raw)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

/// Resolve a raw path string against `data`. Invalid paths resolve to `None`.
pub fn resolve_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    FieldPath::parse(path).ok()?.resolve(data)
}

// =============================================================================
// SPECIAL TOKENS
// =============================================================================

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("token pattern is valid"));

/// If `s` is exactly one `{{token}}`, return the trimmed token name.
pub fn whole_token(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    let inner = inner.trim();
    (!inner.is_empty()).then_some(inner)
}

/// Resolve a token name such as `today`, `user.id` or `order.total`.
///
/// Built-in names win over entity fields of the same name. Unknown fields
/// resolve to `null`.
pub fn resolve_token(name: &str, ctx: &EvaluationContext) -> Value {
    let user = ctx.user.as_ref();
    let opt_string = |v: Option<&String>| v.map(|s| Value::String(s.clone())).unwrap_or(Value::Null);

    match name {
        "today" => Value::String(ctx.now.date_naive().format("%Y-%m-%d").to_string()),
        "now" => Value::String(ctx.now.to_rfc3339()),
        "user.id" => opt_string(user.and_then(|u| u.id.as_ref())),
        "user.email" => opt_string(user.and_then(|u| u.email.as_ref())),
        "user.role" => opt_string(user.and_then(|u| u.role.as_ref())),
        "tenant.id" => ctx
            .scope
            .map(|s| Value::String(s.tenant_id.to_string()))
            .unwrap_or(Value::Null),
        "organization.id" => ctx
            .scope
            .map(|s| Value::String(s.organization_id.to_string()))
            .unwrap_or(Value::Null),
        field => FieldPath::parse(field)
            .ok()
            .and_then(|p| p.resolve(&ctx.data).cloned())
            .unwrap_or(Value::Null),
    }
}

/// Resolve a literal operand. Only whole-string tokens are substituted; any
/// other value is returned unchanged.
pub fn resolve_literal<'a>(value: &'a Value, ctx: &EvaluationContext) -> Cow<'a, Value> {
    match value {
        Value::String(s) => match whole_token(s) {
            Some(token) => Cow::Owned(resolve_token(token, ctx)),
            None => Cow::Borrowed(value),
        },
        _ => Cow::Borrowed(value),
    }
}

/// Replace every `{{token}}` in `template` with its rendered value.
pub fn interpolate(template: &str, ctx: &EvaluationContext) -> String {
    TOKEN_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            render_text(&resolve_token(&caps[1], ctx))
        })
        .into_owned()
}

/// Interpolate every string inside a JSON value. A string that is a single
/// token keeps the token's JSON type.
pub fn interpolate_value(value: &Value, ctx: &EvaluationContext) -> Value {
    match value {
        Value::String(s) => match whole_token(s) {
            Some(token) => resolve_token(token, ctx),
            None => Value::String(interpolate(s, ctx)),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Text form used in messages: strings raw, null empty, everything else JSON.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// =============================================================================
// COERCION
// =============================================================================

/// Numbers, and strings that parse as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// RFC 3339 timestamps and `YYYY-MM-DD` dates (midnight UTC).
pub fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let Value::String(s) = value else {
        return None;
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Missing, null, empty string, empty array and empty object are empty.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{TenantScope, UserContext};
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> EvaluationContext {
        EvaluationContext::new(json!({
            "order": {"number": "SO-1", "total": 125.5, "lines": [{"sku": "A"}, {"sku": "B"}]},
            "today": "shadowed"
        }))
        .with_user(UserContext {
            id: Some("u-1".into()),
            email: Some("ops@example.com".into()),
            role: None,
        })
        .at(Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap())
    }

    #[test]
    fn test_parse_valid_paths() {
        let path = FieldPath::parse("order.lines[1].sku").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("order".into()),
                PathSegment::Key("lines".into()),
                PathSegment::Index(1),
                PathSegment::Key("sku".into()),
            ]
        );
        assert!(FieldPath::parse("_private").is_ok());
        assert!(FieldPath::parse("matrix[0][2]").is_ok());
    }

    #[test]
    fn test_parse_invalid_paths() {
        assert_eq!(FieldPath::parse(""), Err(FieldPathError::Empty));
        assert_eq!(FieldPath::parse("order."), Err(FieldPathError::TrailingDot));
        assert!(matches!(
            FieldPath::parse("1order"),
            Err(FieldPathError::UnexpectedChar('1', 0))
        ));
        assert!(FieldPath::parse("order..total").is_err());
        assert!(FieldPath::parse("lines[x]").is_err());
        assert!(FieldPath::parse("lines[]").is_err());
        assert!(matches!(
            FieldPath::parse("lines[1"),
            Err(FieldPathError::UnterminatedIndex(5))
        ));
        assert!(FieldPath::parse("order total").is_err());
    }

    #[test]
    fn test_resolve() {
        let c = ctx();
        let path = FieldPath::parse("order.lines[1].sku").unwrap();
        assert_eq!(path.resolve(&c.data), Some(&json!("B")));
        let missing = FieldPath::parse("order.lines[5].sku").unwrap();
        assert_eq!(missing.resolve(&c.data), None);
        let through_scalar = FieldPath::parse("order.total.amount").unwrap();
        assert_eq!(through_scalar.resolve(&c.data), None);

        assert_eq!(resolve_path(&c.data, "order.lines[0].sku"), Some(&json!("A")));
        assert_eq!(resolve_path(&c.data, "order..sku"), None);
    }

    #[test]
    fn test_assign_into_array_and_scalar() {
        let mut data = json!({"lines": [{"qty": 1}], "name": "x"});
        let ok = FieldPath::parse("lines[0].qty").unwrap();
        assert!(ok.assign(&mut data, json!(3)));
        assert_eq!(data["lines"][0]["qty"], json!(3));

        let out_of_range = FieldPath::parse("lines[4].qty").unwrap();
        assert!(!out_of_range.assign(&mut data, json!(1)));

        let through_scalar = FieldPath::parse("name.first").unwrap();
        assert!(!through_scalar.assign(&mut data, json!("a")));
    }

    #[test]
    fn test_special_tokens() {
        let c = ctx();
        assert_eq!(resolve_token("today", &c), json!("2025-03-14"));
        assert_eq!(resolve_token("now", &c), json!("2025-03-14T09:30:00+00:00"));
        assert_eq!(resolve_token("user.id", &c), json!("u-1"));
        assert_eq!(resolve_token("user.role", &c), Value::Null);
        assert_eq!(resolve_token("tenant.id", &c), Value::Null);
        assert_eq!(resolve_token("order.total", &c), json!(125.5));
        assert_eq!(resolve_token("order.missing", &c), Value::Null);
    }

    #[test]
    fn test_scope_tokens() {
        let scope = TenantScope::new(Uuid::nil(), Uuid::nil());
        let c = ctx().with_scope(scope);
        assert_eq!(resolve_token("tenant.id", &c), json!(Uuid::nil().to_string()));
        assert_eq!(resolve_token("organization.id", &c), json!(Uuid::nil().to_string()));
    }

    #[test]
    fn test_whole_token() {
        assert_eq!(whole_token("{{ user.id }}"), Some("user.id"));
        assert_eq!(whole_token("{{a}} and {{b}}"), None);
        assert_eq!(whole_token("plain"), None);
        assert_eq!(whole_token("{{}}"), None);
    }

    #[test]
    fn test_resolve_literal_only_replaces_whole_tokens() {
        let c = ctx();
        let v = json!("{{today}}");
        assert_eq!(resolve_literal(&v, &c).into_owned(), json!("2025-03-14"));
        let v = json!("Due {{today}}");
        assert_eq!(resolve_literal(&v, &c).into_owned(), json!("Due {{today}}"));
    }

    #[test]
    fn test_interpolate() {
        let c = ctx();
        assert_eq!(
            interpolate("Order {{order.number}} totals {{ order.total }} ({{nope}})", &c),
            "Order SO-1 totals 125.5 ()"
        );
    }

    #[test]
    fn test_interpolate_value_keeps_types() {
        let c = ctx();
        let out = interpolate_value(
            &json!({"total": "{{order.total}}", "label": "#{{order.number}}", "n": 1}),
            &c,
        );
        assert_eq!(out, json!({"total": 125.5, "label": "#SO-1", "n": 1}));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(as_number(&json!("42.5")), Some(42.5));
        assert_eq!(as_number(&json!(" 7 ")), Some(7.0));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!("NaN")), None);
        assert_eq!(as_number(&json!(true)), None);

        let d = as_datetime(&json!("2025-01-02")).unwrap();
        assert_eq!(d, Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        assert!(as_datetime(&json!("2025-01-02T10:00:00+02:00")).is_some());
        assert!(as_datetime(&json!("yesterday")).is_none());
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(None));
        assert!(is_empty(Some(&json!(null))));
        assert!(is_empty(Some(&json!(""))));
        assert!(is_empty(Some(&json!([]))));
        assert!(is_empty(Some(&json!({}))));
        assert!(!is_empty(Some(&json!(0))));
        assert!(!is_empty(Some(&json!(" "))));
    }
}
