//! Best-effort ban membership cache.
//!
//! A denormalized projection of active bans: per tenant, the set of address
//! strings currently understood to be banned. Never the source of truth.
//! The coordinator treats an `Err` from [`BanCache::contains`] as "cache
//! unavailable" and falls back to the database; only a confident `Ok(true)`
//! short-circuits a membership check.

use crate::tenant::TenantId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;

/// Set membership table. Keys are `tenant/address`; values carry nothing.
const BAN_SET: TableDefinition<'static, &'static str, ()> = TableDefinition::new("ban_set");

/// Per-tenant set membership for banned addresses.
///
/// `Err` means the cache could not answer, which callers must treat as
/// distinct from a confident "not a member" (`Ok(false)`).
#[async_trait]
pub trait BanCache: Send + Sync {
    /// Idempotent set-insert.
    async fn add(&self, tenant_id: TenantId, address: &str) -> Result<()>;

    /// Idempotent set-remove.
    async fn remove(&self, tenant_id: TenantId, address: &str) -> Result<()>;

    /// Set-membership test.
    async fn contains(&self, tenant_id: TenantId, address: &str) -> Result<bool>;
}

/// redb-backed [`BanCache`].
///
/// # Thread Safety
///
/// `SetCache` is `Clone` and can be shared across tasks; redb handles
/// concurrent access. Blocking calls are wrapped in `spawn_blocking`.
#[derive(Clone)]
pub struct SetCache {
    db: Arc<Database>,
}

impl SetCache {
    /// Opens or creates the cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create cache directory {}", parent.display())
                })?;
            }
        }

        let db = Database::create(path)
            .with_context(|| format!("failed to open ban cache {}", path.display()))?;

        // Initialize table on first open so reads never see a missing table.
        let write_txn = db
            .begin_write()
            .context("failed to begin cache initialization transaction")?;
        {
            let _table = write_txn
                .open_table(BAN_SET)
                .context("failed to initialize ban set table")?;
        }
        write_txn
            .commit()
            .context("failed to commit cache initialization transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Liveness probe used by the health endpoint.
    pub fn probe(&self) -> Result<()> {
        let read_txn = self.db.begin_read().context("cache read failed")?;
        read_txn.open_table(BAN_SET).context("cache table missing")?;
        Ok(())
    }

    fn key(tenant_id: TenantId, address: &str) -> String {
        format!("{tenant_id}/{address}")
    }

    fn add_sync(&self, key: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("failed to begin cache write")?;
        {
            let mut table = write_txn
                .open_table(BAN_SET)
                .context("failed to open ban set table")?;
            table
                .insert(key, ())
                .with_context(|| format!("failed to insert cache key '{key}'"))?;
        }
        write_txn.commit().context("failed to commit cache write")?;
        Ok(())
    }

    fn remove_sync(&self, key: &str) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("failed to begin cache write")?;
        {
            let mut table = write_txn
                .open_table(BAN_SET)
                .context("failed to open ban set table")?;
            table
                .remove(key)
                .with_context(|| format!("failed to remove cache key '{key}'"))?;
        }
        write_txn.commit().context("failed to commit cache write")?;
        Ok(())
    }

    fn contains_sync(&self, key: &str) -> Result<bool> {
        let read_txn = self
            .db
            .begin_read()
            .context("failed to begin cache read")?;
        let table = read_txn
            .open_table(BAN_SET)
            .context("failed to open ban set table")?;
        let hit = table
            .get(key)
            .with_context(|| format!("failed to read cache key '{key}'"))?
            .is_some();
        Ok(hit)
    }
}

#[async_trait]
impl BanCache for SetCache {
    async fn add(&self, tenant_id: TenantId, address: &str) -> Result<()> {
        let cache = self.clone();
        let key = Self::key(tenant_id, address);
        tokio::task::spawn_blocking(move || cache.add_sync(&key))
            .await
            .context("task join error")?
    }

    async fn remove(&self, tenant_id: TenantId, address: &str) -> Result<()> {
        let cache = self.clone();
        let key = Self::key(tenant_id, address);
        tokio::task::spawn_blocking(move || cache.remove_sync(&key))
            .await
            .context("task join error")?
    }

    async fn contains(&self, tenant_id: TenantId, address: &str) -> Result<bool> {
        let cache = self.clone();
        let key = Self::key(tenant_id, address);
        tokio::task::spawn_blocking(move || cache.contains_sync(&key))
            .await
            .context("task join error")?
    }
}
