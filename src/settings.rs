//! Per-tenant settings.
//!
//! A flat key-value map per tenant, used by the data plane and dashboard
//! for knobs that don't warrant their own table. Batch updates upsert each
//! key independently.

use crate::db::{join_err, Db};
use crate::error::{Error, Result};
use crate::http::auth::Tenant;
use crate::http::types::SuccessResponse;
use crate::http::{AppError, AppState};
use crate::module::{Module, MountPoint};
use crate::tenant::TenantId;
use axum::extract::{Path, State};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeMap;

/// Tenant-scoped settings storage.
#[derive(Clone)]
pub struct SettingsStore {
    db: Db,
}

impl SettingsStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn get_all_sync(&self, tenant_id: TenantId) -> Result<BTreeMap<String, String>> {
        let conn = self.db.lock()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM tenant_settings WHERE tenant_id = ?1")?;
        let settings = stmt
            .query_map(params![tenant_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(settings)
    }

    fn update_sync(
        &self,
        tenant_id: TenantId,
        changes: &BTreeMap<String, String>,
    ) -> Result<usize> {
        let now = Utc::now().timestamp();
        let conn = self.db.lock()?;
        let mut updated = 0;
        for (key, value) in changes {
            updated += conn.execute(
                "INSERT INTO tenant_settings (tenant_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (tenant_id, key)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![tenant_id.to_string(), key, value, now],
            )?;
        }
        Ok(updated)
    }

    fn delete_sync(&self, tenant_id: TenantId, key: &str) -> Result<()> {
        let conn = self.db.lock()?;
        let affected = conn.execute(
            "DELETE FROM tenant_settings WHERE tenant_id = ?1 AND key = ?2",
            params![tenant_id.to_string(), key],
        )?;
        if affected == 0 {
            return Err(Error::NotFound("setting"));
        }
        Ok(())
    }

    pub async fn get_all(&self, tenant_id: TenantId) -> Result<BTreeMap<String, String>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_all_sync(tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn update(
        &self,
        tenant_id: TenantId,
        changes: BTreeMap<String, String>,
    ) -> Result<usize> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_sync(tenant_id, &changes))
            .await
            .map_err(join_err)?
    }

    pub async fn delete(&self, tenant_id: TenantId, key: String) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.delete_sync(tenant_id, &key))
            .await
            .map_err(join_err)?
    }
}

// =============================================================================
// HTTP surface
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: usize,
}

async fn get_settings(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> std::result::Result<Json<SettingsResponse>, AppError> {
    let settings = state.settings.get_all(tenant_id).await?;
    Ok(Json(SettingsResponse { settings }))
}

async fn update_settings(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(changes): Json<BTreeMap<String, String>>,
) -> std::result::Result<Json<UpdatedResponse>, AppError> {
    let updated = state.settings.update(tenant_id, changes).await?;
    Ok(Json(UpdatedResponse { updated }))
}

async fn delete_setting(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(key): Path<String>,
) -> std::result::Result<Json<SuccessResponse>, AppError> {
    state.settings.delete(tenant_id, key).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// The settings module, mounted under the protected API.
pub struct SettingsModule;

impl Module for SettingsModule {
    fn name(&self) -> &'static str {
        "settings"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn mount_point(&self) -> MountPoint {
        MountPoint::Protected
    }

    fn router(&self) -> Router<AppState> {
        Router::new()
            .route("/settings", get(get_settings).put(update_settings))
            .route("/settings/{key}", delete(delete_setting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_update_upserts_and_is_tenant_scoped() {
        let store = SettingsStore::new(Db::open_in_memory().unwrap());
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        let mut changes = BTreeMap::new();
        changes.insert("alert_email".to_string(), "ops@example.com".to_string());
        changes.insert("retention_days".to_string(), "30".to_string());
        assert_eq!(store.update_sync(tenant_a, &changes).unwrap(), 2);

        changes.insert("retention_days".to_string(), "90".to_string());
        store.update_sync(tenant_a, &changes).unwrap();

        let settings = store.get_all_sync(tenant_a).unwrap();
        assert_eq!(settings["retention_days"], "90");
        assert!(store.get_all_sync(tenant_b).unwrap().is_empty());
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let store = SettingsStore::new(Db::open_in_memory().unwrap());
        assert!(matches!(
            store.delete_sync(TenantId::new(), "nope"),
            Err(Error::NotFound(_))
        ));
    }
}
