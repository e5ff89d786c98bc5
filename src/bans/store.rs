//! Authoritative ban storage.
//!
//! Every operation is tenant-scoped in the SQL itself; there is no code
//! path that reads or writes a row without a tenant predicate. Activeness
//! (`expires_at IS NULL OR expires_at > now`) is evaluated at query time,
//! never by sweeping rows.

use super::{validate_address, BannedEntry, Source};
use crate::db::{join_err, Db};
use crate::error::{Error, Result};
use crate::tenant::TenantId;
use chrono::{DateTime, TimeZone, Utc};
use ipnet::IpNet;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

/// Input for a single ban creation.
#[derive(Debug, Clone)]
pub struct NewBan {
    pub tenant_id: TenantId,
    pub site_id: Option<Uuid>,
    pub ip_address: String,
    pub reason: String,
    pub source: Source,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Aggregate ban counts for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BanStats {
    pub total: u64,
    pub active: u64,
    pub permanent: u64,
    pub temporary: u64,
    pub manual: u64,
    pub automatic: u64,
}

const ENTRY_COLUMNS: &str =
    "id, tenant_id, site_id, ip_address, reason, source, expires_at, created_at";

/// Authoritative CRUD over banned addresses.
#[derive(Clone)]
pub struct BanStore {
    db: Db,
}

impl BanStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    // -------------------------------------------------------------------
    // Sync operations (one statement sequence under one lock acquisition)
    // -------------------------------------------------------------------

    /// Validates and upserts a ban keyed on `(tenant_id, site_id, address)`.
    ///
    /// On conflict, `reason` and `expires_at` take the new values while
    /// `id` and `created_at` keep the original row's. Returns the row as
    /// persisted, so callers observe the surviving id.
    pub fn create_sync(&self, ban: &NewBan) -> Result<BannedEntry> {
        validate_address(&ban.ip_address)?;

        let site_key = ban.site_id.map(|id| id.to_string()).unwrap_or_default();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO banned_ips (id, tenant_id, site_id, ip_address, reason, source, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (tenant_id, site_id, ip_address)
             DO UPDATE SET reason = excluded.reason, expires_at = excluded.expires_at",
            params![
                Uuid::new_v4().to_string(),
                ban.tenant_id.to_string(),
                site_key,
                ban.ip_address,
                ban.reason,
                ban.source.as_str(),
                ban.expires_at.map(|at| at.timestamp()),
                Utc::now().timestamp(),
            ],
        )?;

        let entry = conn
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM banned_ips
                     WHERE tenant_id = ?1 AND site_id = ?2 AND ip_address = ?3"
                ),
                params![ban.tenant_id.to_string(), site_key, ban.ip_address],
                entry_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound("ban"))?;
        Ok(entry)
    }

    /// Fetches one ban. Tenant isolation is enforced here too: a foreign
    /// tenant's id behaves exactly like a nonexistent one.
    pub fn get_sync(&self, id: Uuid, tenant_id: TenantId) -> Result<BannedEntry> {
        let conn = self.db.lock()?;
        conn.query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM banned_ips WHERE id = ?1 AND tenant_id = ?2"),
            params![id.to_string(), tenant_id.to_string()],
            entry_from_row,
        )
        .optional()?
        .ok_or(Error::NotFound("ban"))
    }

    /// Lists active bans newest-first with the total count of active rows
    /// matching the same filter, independent of the pagination window.
    pub fn list_sync(
        &self,
        tenant_id: TenantId,
        site_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<BannedEntry>, u64)> {
        let page = page.max(1);
        let limit = limit.clamp(1, 500);
        let offset = (page - 1) * limit;
        let now = Utc::now().timestamp();
        let tenant = tenant_id.to_string();

        let mut filter =
            String::from("tenant_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(tenant), Box::new(now)];
        if let Some(site) = site_id {
            filter.push_str(" AND site_id = ?3");
            args.push(Box::new(site.to_string()));
        }

        let conn = self.db.lock()?;
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM banned_ips WHERE {filter}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM banned_ips WHERE {filter}
             ORDER BY created_at DESC, id DESC
             LIMIT {limit} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                entry_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((entries, total))
    }

    /// Deletes a ban by id and returns the deleted row's address, which
    /// the coordinator needs for cache eviction.
    pub fn delete_sync(&self, id: Uuid, tenant_id: TenantId) -> Result<String> {
        let conn = self.db.lock()?;
        let address: Option<String> = conn
            .query_row(
                "SELECT ip_address FROM banned_ips WHERE id = ?1 AND tenant_id = ?2",
                params![id.to_string(), tenant_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let affected = conn.execute(
            "DELETE FROM banned_ips WHERE id = ?1 AND tenant_id = ?2",
            params![id.to_string(), tenant_id.to_string()],
        )?;
        match (affected, address) {
            (0, _) | (_, None) => Err(Error::NotFound("ban")),
            (_, Some(address)) => Ok(address),
        }
    }

    /// Deletes all bans for an address under the tenant.
    pub fn delete_by_address_sync(&self, address: &str, tenant_id: TenantId) -> Result<()> {
        let conn = self.db.lock()?;
        let affected = conn.execute(
            "DELETE FROM banned_ips WHERE ip_address = ?1 AND tenant_id = ?2",
            params![address, tenant_id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::NotFound("ban"));
        }
        Ok(())
    }

    /// Counts active rows matching the address under the tenant.
    ///
    /// Matching covers exact rows plus, when `address` is a literal, active
    /// CIDR rows whose block contains it. SQLite has no inet operators, so
    /// the containment test runs here in the store layer rather than in SQL.
    pub fn count_active_sync(&self, address: &str, tenant_id: TenantId) -> Result<u64> {
        let now = Utc::now().timestamp();
        let tenant = tenant_id.to_string();
        let conn = self.db.lock()?;

        let exact: u64 = conn.query_row(
            "SELECT COUNT(*) FROM banned_ips
             WHERE tenant_id = ?1 AND ip_address = ?2
             AND (expires_at IS NULL OR expires_at > ?3)",
            params![tenant, address, now],
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        let Ok(ip) = address.parse::<IpAddr>() else {
            return Ok(exact);
        };

        let mut stmt = conn.prepare(
            "SELECT ip_address FROM banned_ips
             WHERE tenant_id = ?1 AND ip_address LIKE '%/%'
             AND (expires_at IS NULL OR expires_at > ?2)",
        )?;
        let blocks = stmt
            .query_map(params![tenant, now], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let contained = blocks
            .iter()
            .filter(|block| {
                block
                    .parse::<IpNet>()
                    .map(|net| net.contains(&ip))
                    .unwrap_or(false)
            })
            .count() as u64;

        Ok(exact + contained)
    }

    /// Aggregate counts for one tenant, in a single pass over the table.
    pub fn stats_sync(&self, tenant_id: TenantId) -> Result<BanStats> {
        let now = Utc::now().timestamp();
        let conn = self.db.lock()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN expires_at IS NULL OR expires_at > ?2 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN expires_at IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN expires_at IS NOT NULL AND expires_at > ?2 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN source = 'manual' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN source != 'manual' THEN 1 ELSE 0 END), 0)
             FROM banned_ips WHERE tenant_id = ?1",
            params![tenant_id.to_string(), now],
            |row| {
                Ok(BanStats {
                    total: row.get::<_, i64>(0)? as u64,
                    active: row.get::<_, i64>(1)? as u64,
                    permanent: row.get::<_, i64>(2)? as u64,
                    temporary: row.get::<_, i64>(3)? as u64,
                    manual: row.get::<_, i64>(4)? as u64,
                    automatic: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    // -------------------------------------------------------------------
    // Async wrappers (spawn_blocking, clone-into-closure)
    // -------------------------------------------------------------------

    pub async fn create(&self, ban: NewBan) -> Result<BannedEntry> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.create_sync(&ban))
            .await
            .map_err(join_err)?
    }

    pub async fn get(&self, id: Uuid, tenant_id: TenantId) -> Result<BannedEntry> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_sync(id, tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        site_id: Option<Uuid>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<BannedEntry>, u64)> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_sync(tenant_id, site_id, page, limit))
            .await
            .map_err(join_err)?
    }

    pub async fn delete(&self, id: Uuid, tenant_id: TenantId) -> Result<String> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.delete_sync(id, tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn delete_by_address(&self, address: String, tenant_id: TenantId) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.delete_by_address_sync(&address, tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn count_active(&self, address: String, tenant_id: TenantId) -> Result<u64> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.count_active_sync(&address, tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn stats(&self, tenant_id: TenantId) -> Result<BanStats> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.stats_sync(tenant_id))
            .await
            .map_err(join_err)?
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<BannedEntry> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let site: String = row.get(2)?;
    let expires_at: Option<i64> = row.get(6)?;
    let created_at: i64 = row.get(7)?;

    Ok(BannedEntry {
        id: parse_uuid(0, &id)?,
        tenant_id: TenantId(parse_uuid(1, &tenant)?),
        site_id: if site.is_empty() {
            None
        } else {
            Some(parse_uuid(2, &site)?)
        },
        ip_address: row.get(3)?,
        reason: row.get(4)?,
        source: Source::from_db(&row.get::<_, String>(5)?),
        expires_at: expires_at.map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_default()),
        created_at: Utc.timestamp_opt(created_at, 0).single().unwrap_or_default(),
    })
}

fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}
