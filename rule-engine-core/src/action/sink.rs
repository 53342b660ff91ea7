use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::RwLock;
use tracing::info;

use super::Effect;

/// Receiver for outbound effects (notifications, events, workflows,
/// activities). The host wires this to its own messaging.
#[async_trait]
pub trait EffectSink: Send + Sync {
    async fn dispatch(&self, rule_id: &str, effect: &Effect) -> Result<()>;
}

/// Writes every effect to the tracing log and nothing else.
pub struct TracingSink;

#[async_trait]
impl EffectSink for TracingSink {
    async fn dispatch(&self, rule_id: &str, effect: &Effect) -> Result<()> {
        let payload = serde_json::to_string(effect)?;
        info!(rule_id, effect = %payload, "Rule effect dispatched");
        Ok(())
    }
}

/// In-memory sink for tests and dry tooling.
pub struct MemorySink {
    inner: RwLock<Vec<(String, Effect)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of everything dispatched so far, in order.
    pub fn effects(&self) -> Result<Vec<(String, Effect)>> {
        let effects = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(effects.clone())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EffectSink for MemorySink {
    async fn dispatch(&self, rule_id: &str, effect: &Effect) -> Result<()> {
        let mut effects = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        effects.push((rule_id.to_string(), effect.clone()));
        Ok(())
    }
}
