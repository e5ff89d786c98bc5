//! Cache-consistency layer over the ban store and the set cache.
//!
//! The contract, for every operation:
//!
//! - Writes hit the store first; the store write is the durability point.
//!   A cache mirror follows, best-effort: its failure is logged, counted,
//!   and absorbed, never surfaced, because the store already holds the
//!   durable truth.
//! - Membership checks trust the cache asymmetrically. A positive hit
//!   short-circuits (the dominant "repeat offender" path stays fast); a
//!   miss or a cache error falls back to the authoritative count, because
//!   the cache may be lazily populated, evicted, or down, and cache-down
//!   must never read as "not banned".
//!
//! The coordinator holds no mutable state of its own; all state lives in
//! the store and cache, and a store connection is never held across a
//! cache call or vice versa.

use super::store::{BanStats, BanStore, NewBan};
use super::{validate_address, BanCache, BannedEntry};
use crate::error::Result;
use crate::metrics;
use crate::tenant::TenantId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a bulk operation: partial success by design, never an error
/// for individual failures.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BulkOutcome {
    /// Elements that were applied.
    pub applied: usize,
    /// Length of the input list.
    pub total: usize,
}

/// Orchestrates the ban store and the set cache.
#[derive(Clone)]
pub struct BanCoordinator {
    store: BanStore,
    cache: Option<Arc<dyn BanCache>>,
}

impl BanCoordinator {
    /// Builds a coordinator. `cache: None` means every check takes the
    /// authoritative path; correctness is unaffected.
    pub fn new(store: BanStore, cache: Option<Arc<dyn BanCache>>) -> Self {
        Self { store, cache }
    }

    /// Creates (or upserts) a ban, then best-effort mirrors it into the
    /// cache. Success is defined solely by the store write.
    pub async fn create(&self, ban: NewBan) -> Result<BannedEntry> {
        metrics::record_ban_operation("create");
        let entry = self.store.create(ban).await?;
        self.cache_add(entry.tenant_id, &entry.ip_address).await;
        Ok(entry)
    }

    /// Deletes a ban by id. The store reports the deleted row's address,
    /// which is then best-effort evicted from the cache. Zero rows deleted
    /// means `NotFound` and no eviction (nothing to evict).
    pub async fn delete(&self, id: Uuid, tenant_id: TenantId) -> Result<()> {
        metrics::record_ban_operation("delete");
        let address = self.store.delete(id, tenant_id).await?;
        self.cache_remove(tenant_id, &address).await;
        Ok(())
    }

    /// Deletes all bans for an address, then best-effort evicts it.
    pub async fn delete_by_address(&self, address: String, tenant_id: TenantId) -> Result<()> {
        metrics::record_ban_operation("delete");
        self.store
            .delete_by_address(address.clone(), tenant_id)
            .await?;
        self.cache_remove(tenant_id, &address).await;
        Ok(())
    }

    /// Bans a list of addresses. Each element is validated independently;
    /// invalid entries are skipped, as are store-level failures, so the
    /// batch always makes forward progress. Upsert semantics make blind
    /// retries of the same batch convergent.
    pub async fn bulk_create(
        &self,
        tenant_id: TenantId,
        addresses: Vec<String>,
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> BulkOutcome {
        metrics::record_ban_operation("bulk_create");
        let total = addresses.len();
        let mut applied = 0;

        for address in addresses {
            if validate_address(&address).is_err() {
                continue;
            }
            let ban = NewBan {
                tenant_id,
                site_id: None,
                ip_address: address.clone(),
                reason: reason.clone(),
                source: super::Source::Bulk,
                expires_at,
            };
            match self.store.create(ban).await {
                Ok(_) => {
                    applied += 1;
                    self.cache_add(tenant_id, &address).await;
                }
                Err(error) => {
                    tracing::warn!(%tenant_id, address, %error, "bulk ban element failed");
                }
            }
        }

        BulkOutcome { applied, total }
    }

    /// Deletes a list of bans by id. Per-id failures are skipped.
    pub async fn bulk_delete(&self, tenant_id: TenantId, ids: Vec<Uuid>) -> BulkOutcome {
        metrics::record_ban_operation("bulk_delete");
        let total = ids.len();
        let mut applied = 0;

        for id in ids {
            match self.store.delete(id, tenant_id).await {
                Ok(address) => {
                    applied += 1;
                    self.cache_remove(tenant_id, &address).await;
                }
                Err(crate::Error::NotFound(_)) => {}
                Err(error) => {
                    tracing::warn!(%tenant_id, %id, %error, "bulk unban element failed");
                }
            }
        }

        BulkOutcome { applied, total }
    }

    /// Answers "is this address banned under this tenant".
    ///
    /// A confident positive cache hit is trusted; everything else
    /// (confident miss, cache error, no cache) re-verifies against the
    /// store, so a partially warmed or unavailable cache can only cost
    /// latency, never a false negative.
    pub async fn check(&self, tenant_id: TenantId, address: &str) -> Result<bool> {
        metrics::record_ban_operation("check");
        if let Some(cache) = &self.cache {
            match cache.contains(tenant_id, address).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%tenant_id, address, %error, "ban cache lookup failed");
                    metrics::record_cache_failure("contains");
                }
            }
        }

        let count = self.store.count_active(address.to_string(), tenant_id).await?;
        Ok(count > 0)
    }

    pub async fn get(&self, id: Uuid, tenant_id: TenantId) -> Result<BannedEntry> {
        self.store.get(id, tenant_id).await
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        site_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<BannedEntry>, u64)> {
        self.store.list(tenant_id, site_id, page, limit).await
    }

    pub async fn stats(&self, tenant_id: TenantId) -> Result<BanStats> {
        metrics::record_ban_operation("stats");
        self.store.stats(tenant_id).await
    }

    async fn cache_add(&self, tenant_id: TenantId, address: &str) {
        if let Some(cache) = &self.cache {
            if let Err(error) = cache.add(tenant_id, address).await {
                tracing::warn!(%tenant_id, address, %error, "ban cache add failed");
                metrics::record_cache_failure("add");
            }
        }
    }

    async fn cache_remove(&self, tenant_id: TenantId, address: &str) {
        if let Some(cache) = &self.cache {
            if let Err(error) = cache.remove(tenant_id, address).await {
                tracing::warn!(%tenant_id, address, %error, "ban cache remove failed");
                metrics::record_cache_failure("remove");
            }
        }
    }
}
