//! Runtime context a rule is evaluated against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::value::{resolve_path, FieldPath};

/// Tenant/organization boundary. Every rule read or write carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantScope {
    pub tenant_id: Uuid,
    pub organization_id: Uuid,
}

impl TenantScope {
    pub fn new(tenant_id: Uuid, organization_id: Uuid) -> Self {
        Self {
            tenant_id,
            organization_id,
        }
    }
}

/// The user on whose behalf rules run. Exposed to conditions and messages
/// through the `{{user.*}}` tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub id: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Entity data the field paths resolve against.
    pub data: Value,
    pub user: Option<UserContext>,
    pub scope: Option<TenantScope>,
    /// Clock used for `{{today}}`, `{{now}}` and effective-window checks.
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            user: None,
            scope: None,
            now: Utc::now(),
        }
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_scope(mut self, scope: TenantScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Look up a field of the entity data by path. Invalid paths yield `None`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.data, path)
    }

    /// Write a field of the entity data, creating intermediate objects.
    pub fn set(&mut self, path: &FieldPath, value: Value) -> bool {
        path.assign(&mut self.data, value)
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}
