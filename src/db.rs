//! SQLite source of truth.
//!
//! All tenant data lives here. The connection sits behind a mutex and is
//! `Clone`-shared across request workers; async callers go through
//! `spawn_blocking` wrappers on the individual stores so the runtime never
//! blocks on SQLite I/O.
//!
//! Schema bootstrap is embedded: `open` creates every table on first use,
//! so there is no external migration step.

use crate::error::{Error, Result};
use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Embedded schema, applied idempotently on every open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tenants (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id         TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    key_hash   TEXT NOT NULL UNIQUE,
    expires_at INTEGER,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sites (
    id                 TEXT PRIMARY KEY,
    tenant_id          TEXT NOT NULL,
    domain             TEXT NOT NULL,
    upstream           TEXT NOT NULL,
    enabled            INTEGER NOT NULL DEFAULT 1,
    waf_mode           TEXT NOT NULL DEFAULT 'on',
    rate_limit_enabled INTEGER NOT NULL DEFAULT 0,
    rate_limit_rps     INTEGER NOT NULL DEFAULT 0,
    created_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL,
    UNIQUE (tenant_id, domain)
);

-- site_id is '' for tenant-wide bans so the uniqueness triple has no NULL
-- ambiguity under SQLite's distinct-NULL unique indexes.
CREATE TABLE IF NOT EXISTS banned_ips (
    id         TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    site_id    TEXT NOT NULL DEFAULT '',
    ip_address TEXT NOT NULL,
    reason     TEXT NOT NULL DEFAULT '',
    source     TEXT NOT NULL DEFAULT 'manual',
    expires_at INTEGER,
    created_at INTEGER NOT NULL,
    UNIQUE (tenant_id, site_id, ip_address)
);

CREATE INDEX IF NOT EXISTS idx_banned_ips_lookup
    ON banned_ips (tenant_id, ip_address);

CREATE TABLE IF NOT EXISTS tenant_settings (
    tenant_id  TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, key)
);

CREATE TABLE IF NOT EXISTS security_events (
    id         TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    site_id    TEXT NOT NULL DEFAULT '',
    ip_address TEXT NOT NULL,
    method     TEXT NOT NULL DEFAULT '',
    path       TEXT NOT NULL DEFAULT '',
    rule_id    TEXT NOT NULL DEFAULT '',
    action     TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_security_events_tenant
    ON security_events (tenant_id, created_at);
";

/// Handle to the SQLite database.
///
/// # Thread Safety
///
/// `Db` is `Clone` and can be shared across tasks. The underlying
/// connection is protected by a mutex; statements are individually atomic.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Opens or creates the database at the given path and applies the
    /// embedded schema.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::init(conn)
    }

    /// Opens an in-memory database. Used by tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])
            .context("failed to enable foreign keys")?;
        conn.execute_batch(SCHEMA)
            .context("failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquires the connection for one statement or one short statement
    /// sequence. Never held across an await point.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("database lock poisoned".to_string()))
    }

    /// Cheap liveness probe used by the health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Maps a `spawn_blocking` join failure into a domain error.
pub(crate) fn join_err(err: tokio::task::JoinError) -> Error {
    Error::Internal(format!("task join error: {err}"))
}
