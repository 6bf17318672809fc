//! Narrow repository interfaces for persisted state.
//!
//! The gateway only ever talks to these traits; the SQLite-backed
//! implementations live with the embedding application. The in-memory
//! variants below back tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{probe::EndpointCapability, usage::UsageRecord};

/// Append-only store of usage records.
#[async_trait]
pub trait UsageRepository: Send + Sync {
    /// Append one record.
    async fn append(&self, record: UsageRecord) -> anyhow::Result<()>;

    /// Most recent records, newest first, up to `limit`.
    async fn list(&self, limit: usize) -> anyhow::Result<Vec<UsageRecord>>;
}

/// Store of endpoint-capability verdicts keyed by (provider, model).
#[async_trait]
pub trait CapabilityRepository: Send + Sync {
    /// Insert or replace the verdict for its (provider, model) key.
    async fn upsert(&self, capability: EndpointCapability) -> anyhow::Result<()>;

    /// Fetch the verdict for a key.
    async fn get(&self, provider: Uuid, model: &str) -> anyhow::Result<Option<EndpointCapability>>;
}

/// In-memory usage store.
#[derive(Default)]
pub struct MemoryUsageRepository {
    records: Mutex<Vec<UsageRecord>>,
}

#[async_trait]
impl UsageRepository for MemoryUsageRepository {
    async fn append(&self, record: UsageRecord) -> anyhow::Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn list(&self, limit: usize) -> anyhow::Result<Vec<UsageRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

/// In-memory capability store.
#[derive(Default)]
pub struct MemoryCapabilityRepository {
    capabilities: DashMap<(Uuid, String), EndpointCapability>,
}

#[async_trait]
impl CapabilityRepository for MemoryCapabilityRepository {
    async fn upsert(&self, capability: EndpointCapability) -> anyhow::Result<()> {
        self.capabilities
            .insert((capability.provider, capability.model.clone()), capability);
        Ok(())
    }

    async fn get(&self, provider: Uuid, model: &str) -> anyhow::Result<Option<EndpointCapability>> {
        Ok(self
            .capabilities
            .get(&(provider, model.to_string()))
            .map(|entry| entry.value().clone()))
    }
}
