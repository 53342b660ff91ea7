use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::context::TenantScope;
use crate::log::RuleExecutionLog;
use crate::rule::{BusinessRule, RuleType};

/// A rule's position inside a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetMember {
    pub rule: Uuid,
    pub sequence: u32,
    pub enabled: bool,
}

/// A named, ordered group of rules executed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub id: Uuid,
    pub set_id: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub members: Vec<RuleSetMember>,
    pub scope: TenantScope,
}

impl RuleSet {
    /// Enabled members in sequence order.
    pub fn active_members(&self) -> Vec<&RuleSetMember> {
        let mut members: Vec<&RuleSetMember> = self.members.iter().filter(|m| m.enabled).collect();
        members.sort_by_key(|m| m.sequence);
        members
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub entity_type: Option<String>,
    pub event_type: Option<String>,
    pub rule_type: Option<RuleType>,
    pub enabled: Option<bool>,
}

impl RuleFilter {
    fn matches(&self, rule: &BusinessRule) -> bool {
        if let Some(entity_type) = &self.entity_type {
            if &rule.entity_type != entity_type {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if rule.event_type.as_ref() != Some(event_type) {
                return false;
            }
        }
        if let Some(rule_type) = self.rule_type {
            if rule.rule_type != rule_type {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if rule.enabled != enabled {
                return false;
            }
        }
        true
    }
}

/// Highest priority first; ties broken by rule code so order is stable.
pub fn order_by_priority(rules: &mut [BusinessRule]) {
    rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.rule_id.cmp(&b.rule_id)));
}

/// Persistence contract for rules, rule sets and execution logs.
///
/// Every read and write is tenant-scoped: a record stored under one scope is
/// invisible to every other scope.
#[async_trait]
pub trait RuleStore: Send + Sync {
    // ── Rules ──

    /// Insert or update. Updates bump `version` and keep `created_at`.
    /// Returns the record as stored.
    async fn save_rule(&self, rule: &BusinessRule) -> Result<BusinessRule>;
    async fn get_rule(&self, scope: &TenantScope, id: Uuid) -> Result<Option<BusinessRule>>;
    async fn find_rule(&self, scope: &TenantScope, rule_id: &str) -> Result<Option<BusinessRule>>;
    async fn delete_rule(&self, scope: &TenantScope, id: Uuid) -> Result<bool>;
    async fn list_rules(&self, scope: &TenantScope, filter: &RuleFilter) -> Result<Vec<BusinessRule>>;

    /// Rules that apply to an entity/event at `now`, in execution order.
    async fn applicable_rules(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        event_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BusinessRule>>;

    // ── Rule sets ──

    async fn save_rule_set(&self, set: &RuleSet) -> Result<()>;
    async fn get_rule_set(&self, scope: &TenantScope, set_id: &str) -> Result<Option<RuleSet>>;

    // ── Execution log (append-only) ──

    async fn append_log(&self, log: &RuleExecutionLog) -> Result<()>;
    async fn list_logs(&self, scope: &TenantScope, rule: Option<Uuid>) -> Result<Vec<RuleExecutionLog>>;
}

// ── MemoryRuleStore ──

/// In-memory RuleStore for tests and tooling.
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<Uuid, BusinessRule>>,
    rule_sets: RwLock<HashMap<(TenantScope, String), RuleSet>>,
    logs: RwLock<Vec<RuleExecutionLog>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            rule_sets: RwLock::new(HashMap::new()),
            logs: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn save_rule(&self, rule: &BusinessRule) -> Result<BusinessRule> {
        let mut rules = self.rules.write().map_err(|e| anyhow!("Lock: {}", e))?;

        // Rule codes are unique per scope
        if let Some(clash) = rules
            .values()
            .find(|r| r.scope == rule.scope && r.rule_id == rule.rule_id && r.id != rule.id)
        {
            return Err(anyhow!(
                "Rule code '{}' already exists in this scope (id {})",
                rule.rule_id,
                clash.id
            ));
        }

        let mut stored = rule.clone();
        if let Some(existing) = rules.get(&rule.id) {
            if existing.scope != rule.scope {
                return Err(anyhow!("Rule {} belongs to a different scope", rule.id));
            }
            stored.version = existing.version + 1;
            stored.created_at = existing.created_at;
            stored.updated_at = Utc::now();
        } else {
            stored.version = stored.version.max(1);
        }

        rules.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_rule(&self, scope: &TenantScope, id: Uuid) -> Result<Option<BusinessRule>> {
        let rules = self.rules.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(rules.get(&id).filter(|r| r.scope == *scope).cloned())
    }

    async fn find_rule(&self, scope: &TenantScope, rule_id: &str) -> Result<Option<BusinessRule>> {
        let rules = self.rules.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(rules
            .values()
            .find(|r| r.scope == *scope && r.rule_id == rule_id)
            .cloned())
    }

    async fn delete_rule(&self, scope: &TenantScope, id: Uuid) -> Result<bool> {
        let mut rules = self.rules.write().map_err(|e| anyhow!("Lock: {}", e))?;
        match rules.get(&id) {
            Some(r) if r.scope == *scope => {
                rules.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_rules(&self, scope: &TenantScope, filter: &RuleFilter) -> Result<Vec<BusinessRule>> {
        let rules = self.rules.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut results: Vec<BusinessRule> = rules
            .values()
            .filter(|r| r.scope == *scope && filter.matches(r))
            .cloned()
            .collect();
        order_by_priority(&mut results);
        Ok(results)
    }

    async fn applicable_rules(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        event_type: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BusinessRule>> {
        let rules = self.rules.read().map_err(|e| anyhow!("Lock: {}", e))?;
        let mut results: Vec<BusinessRule> = rules
            .values()
            .filter(|r| r.applies_to(scope, entity_type, event_type, now))
            .cloned()
            .collect();
        order_by_priority(&mut results);
        Ok(results)
    }

    async fn save_rule_set(&self, set: &RuleSet) -> Result<()> {
        {
            let rules = self.rules.read().map_err(|e| anyhow!("Lock: {}", e))?;
            for member in &set.members {
                if !rules.get(&member.rule).is_some_and(|r| r.scope == set.scope) {
                    return Err(anyhow!(
                        "Rule set '{}' references unknown rule {}",
                        set.set_id,
                        member.rule
                    ));
                }
            }
        }

        let mut sets = self.rule_sets.write().map_err(|e| anyhow!("Lock: {}", e))?;
        sets.insert((set.scope, set.set_id.clone()), set.clone());
        Ok(())
    }

    async fn get_rule_set(&self, scope: &TenantScope, set_id: &str) -> Result<Option<RuleSet>> {
        let sets = self.rule_sets.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(sets.get(&(*scope, set_id.to_string())).cloned())
    }

    async fn append_log(&self, log: &RuleExecutionLog) -> Result<()> {
        let mut logs = self.logs.write().map_err(|e| anyhow!("Lock: {}", e))?;
        logs.push(log.clone());
        Ok(())
    }

    async fn list_logs(&self, scope: &TenantScope, rule: Option<Uuid>) -> Result<Vec<RuleExecutionLog>> {
        let logs = self.logs.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(logs
            .iter()
            .filter(|l| l.scope == *scope && rule.is_none_or(|id| l.rule == id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::fixtures::{rule, scope};

    #[tokio::test]
    async fn test_save_and_find() {
        let store = MemoryRuleStore::new();
        let r = rule("credit-check", 10);
        let saved = store.save_rule(&r).await.unwrap();
        assert_eq!(saved.version, 1);

        let found = store.find_rule(&scope(), "credit-check").await.unwrap().unwrap();
        assert_eq!(found.id, r.id);
        assert!(store.get_rule(&scope(), r.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryRuleStore::new();
        let mut r = rule("credit-check", 10);
        let first = store.save_rule(&r).await.unwrap();

        r.priority = 20;
        let second = store.save_rule(&r).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.priority, 20);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let store = MemoryRuleStore::new();
        store.save_rule(&rule("credit-check", 10)).await.unwrap();
        let err = store.save_rule(&rule("credit-check", 5)).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_scope_isolation() {
        let store = MemoryRuleStore::new();
        let r = rule("credit-check", 10);
        store.save_rule(&r).await.unwrap();

        let other = TenantScope::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(store.get_rule(&other, r.id).await.unwrap().is_none());
        assert!(store.find_rule(&other, "credit-check").await.unwrap().is_none());
        assert!(!store.delete_rule(&other, r.id).await.unwrap());
        assert!(store
            .list_rules(&other, &RuleFilter::default())
            .await
            .unwrap()
            .is_empty());

        // Same code is fine in another scope
        let mut foreign = rule("credit-check", 10);
        foreign.scope = other;
        assert!(store.save_rule(&foreign).await.is_ok());

        // An existing record cannot move scope
        let mut moved = r.clone();
        moved.scope = other;
        moved.rule_id = "moved".into();
        assert!(store.save_rule(&moved).await.is_err());
    }

    #[tokio::test]
    async fn test_applicable_rules_order() {
        let store = MemoryRuleStore::new();
        store.save_rule(&rule("b-low", 1)).await.unwrap();
        store.save_rule(&rule("z-high", 50)).await.unwrap();
        store.save_rule(&rule("a-high", 50)).await.unwrap();
        let mut disabled = rule("disabled", 99);
        disabled.enabled = false;
        store.save_rule(&disabled).await.unwrap();

        let rules = store
            .applicable_rules(&scope(), "Order", Some("beforeSave"), Utc::now())
            .await
            .unwrap();
        let codes: Vec<&str> = rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(codes, vec!["a-high", "z-high", "b-low"]);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let store = MemoryRuleStore::new();
        let mut guard = rule("guard", 5);
        guard.rule_type = RuleType::Guard;
        store.save_rule(&guard).await.unwrap();
        store.save_rule(&rule("plain", 5)).await.unwrap();

        let filter = RuleFilter {
            rule_type: Some(RuleType::Guard),
            ..RuleFilter::default()
        };
        let rules = store.list_rules(&scope(), &filter).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule_id, "guard");
    }

    #[tokio::test]
    async fn test_rule_set_members_must_exist() {
        let store = MemoryRuleStore::new();
        let r = rule("member", 1);
        store.save_rule(&r).await.unwrap();

        let mut set = RuleSet {
            id: Uuid::new_v4(),
            set_id: "checkout".into(),
            name: "Checkout".into(),
            description: None,
            enabled: true,
            members: vec![
                RuleSetMember {
                    rule: r.id,
                    sequence: 2,
                    enabled: true,
                },
                RuleSetMember {
                    rule: Uuid::new_v4(),
                    sequence: 1,
                    enabled: true,
                },
            ],
            scope: scope(),
        };
        assert!(store.save_rule_set(&set).await.is_err());

        set.members.pop();
        store.save_rule_set(&set).await.unwrap();
        let loaded = store.get_rule_set(&scope(), "checkout").await.unwrap().unwrap();
        assert_eq!(loaded.active_members().len(), 1);
    }

    #[test]
    fn test_active_members_sorted() {
        let set = RuleSet {
            id: Uuid::new_v4(),
            set_id: "s".into(),
            name: "S".into(),
            description: None,
            enabled: true,
            members: vec![
                RuleSetMember {
                    rule: Uuid::from_u128(3),
                    sequence: 30,
                    enabled: true,
                },
                RuleSetMember {
                    rule: Uuid::from_u128(1),
                    sequence: 10,
                    enabled: true,
                },
                RuleSetMember {
                    rule: Uuid::from_u128(2),
                    sequence: 20,
                    enabled: false,
                },
            ],
            scope: scope(),
        };
        let order: Vec<Uuid> = set.active_members().iter().map(|m| m.rule).collect();
        assert_eq!(order, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);
    }
}
