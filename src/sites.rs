//! Site management.
//!
//! Tenant-scoped CRUD over the site configurations the data plane serves:
//! domain, upstream, WAF mode, rate limiting. Plain data-access glue; the
//! interesting consistency work lives in `bans`.

use crate::db::{join_err, Db};
use crate::error::{Error, Result};
use crate::http::auth::Tenant;
use crate::http::types::SuccessResponse;
use crate::http::{AppError, AppState};
use crate::module::{Module, MountPoint};
use crate::tenant::TenantId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the data plane treats traffic for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WafMode {
    /// Inspect and block.
    #[default]
    On,
    /// Pass everything through.
    Off,
    /// Inspect, log, never block.
    Detect,
}

impl WafMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Detect => "detect",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "off" => Self::Off,
            "detect" => Self::Detect,
            _ => Self::On,
        }
    }
}

/// A protected site.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub domain: String,
    pub upstream: String,
    pub enabled: bool,
    pub waf_mode: WafMode,
    pub rate_limit_enabled: bool,
    pub rate_limit_rps: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SITE_COLUMNS: &str = "id, tenant_id, domain, upstream, enabled, waf_mode, \
                            rate_limit_enabled, rate_limit_rps, created_at, updated_at";

/// Tenant-scoped site storage.
#[derive(Clone)]
pub struct SiteStore {
    db: Db,
}

impl SiteStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn list_sync(&self, tenant_id: TenantId) -> Result<Vec<Site>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE tenant_id = ?1 ORDER BY domain"
        ))?;
        let sites = stmt
            .query_map(params![tenant_id.to_string()], site_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sites)
    }

    fn get_sync(&self, id: Uuid, tenant_id: TenantId) -> Result<Site> {
        let conn = self.db.lock()?;
        conn.query_row(
            &format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?1 AND tenant_id = ?2"),
            params![id.to_string(), tenant_id.to_string()],
            site_from_row,
        )
        .optional()?
        .ok_or(Error::NotFound("site"))
    }

    fn create_sync(&self, tenant_id: TenantId, req: &SiteInput) -> Result<Site> {
        let id = Uuid::new_v4();
        let now = Utc::now().timestamp();
        let conn = self.db.lock()?;
        let inserted = conn.execute(
            "INSERT INTO sites (id, tenant_id, domain, upstream, enabled, waf_mode,
                                rate_limit_enabled, rate_limit_rps, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (tenant_id, domain) DO NOTHING",
            params![
                id.to_string(),
                tenant_id.to_string(),
                req.domain,
                req.upstream,
                req.enabled,
                req.waf_mode.as_str(),
                req.rate_limit_enabled,
                req.rate_limit_rps,
                now,
            ],
        )?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "site for domain '{}' already exists",
                req.domain
            )));
        }
        drop(conn);
        self.get_sync(id, tenant_id)
    }

    fn update_sync(&self, id: Uuid, tenant_id: TenantId, req: &SiteInput) -> Result<Site> {
        let conn = self.db.lock()?;
        let affected = conn.execute(
            "UPDATE sites SET domain = ?3, upstream = ?4, enabled = ?5, waf_mode = ?6,
                              rate_limit_enabled = ?7, rate_limit_rps = ?8, updated_at = ?9
             WHERE id = ?1 AND tenant_id = ?2",
            params![
                id.to_string(),
                tenant_id.to_string(),
                req.domain,
                req.upstream,
                req.enabled,
                req.waf_mode.as_str(),
                req.rate_limit_enabled,
                req.rate_limit_rps,
                Utc::now().timestamp(),
            ],
        )?;
        if affected == 0 {
            return Err(Error::NotFound("site"));
        }
        drop(conn);
        self.get_sync(id, tenant_id)
    }

    fn delete_sync(&self, id: Uuid, tenant_id: TenantId) -> Result<()> {
        let conn = self.db.lock()?;
        let affected = conn.execute(
            "DELETE FROM sites WHERE id = ?1 AND tenant_id = ?2",
            params![id.to_string(), tenant_id.to_string()],
        )?;
        if affected == 0 {
            return Err(Error::NotFound("site"));
        }
        Ok(())
    }

    fn toggle_sync(&self, id: Uuid, tenant_id: TenantId) -> Result<Site> {
        let conn = self.db.lock()?;
        let affected = conn.execute(
            "UPDATE sites SET enabled = NOT enabled, updated_at = ?3
             WHERE id = ?1 AND tenant_id = ?2",
            params![id.to_string(), tenant_id.to_string(), Utc::now().timestamp()],
        )?;
        if affected == 0 {
            return Err(Error::NotFound("site"));
        }
        drop(conn);
        self.get_sync(id, tenant_id)
    }

    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<Site>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_sync(tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn get(&self, id: Uuid, tenant_id: TenantId) -> Result<Site> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_sync(id, tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn create(&self, tenant_id: TenantId, req: SiteInput) -> Result<Site> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.create_sync(tenant_id, &req))
            .await
            .map_err(join_err)?
    }

    pub async fn update(&self, id: Uuid, tenant_id: TenantId, req: SiteInput) -> Result<Site> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update_sync(id, tenant_id, &req))
            .await
            .map_err(join_err)?
    }

    pub async fn delete(&self, id: Uuid, tenant_id: TenantId) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.delete_sync(id, tenant_id))
            .await
            .map_err(join_err)?
    }

    pub async fn toggle(&self, id: Uuid, tenant_id: TenantId) -> Result<Site> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.toggle_sync(id, tenant_id))
            .await
            .map_err(join_err)?
    }
}

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let created_at: i64 = row.get(8)?;
    let updated_at: i64 = row.get(9)?;
    Ok(Site {
        id: parse_uuid(0, &id)?,
        tenant_id: TenantId(parse_uuid(1, &tenant)?),
        domain: row.get(2)?,
        upstream: row.get(3)?,
        enabled: row.get(4)?,
        waf_mode: WafMode::from_db(&row.get::<_, String>(5)?),
        rate_limit_enabled: row.get(6)?,
        rate_limit_rps: row.get::<_, i64>(7)? as u32,
        created_at: Utc.timestamp_opt(created_at, 0).single().unwrap_or_default(),
        updated_at: Utc.timestamp_opt(updated_at, 0).single().unwrap_or_default(),
    })
}

fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

// =============================================================================
// HTTP surface
// =============================================================================

/// Create/update payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInput {
    pub domain: String,
    pub upstream: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub waf_mode: WafMode,
    #[serde(default)]
    pub rate_limit_enabled: bool,
    #[serde(default)]
    pub rate_limit_rps: u32,
}

fn default_true() -> bool {
    true
}

impl SiteInput {
    fn validate(&self) -> std::result::Result<(), AppError> {
        if self.domain.trim().is_empty() {
            return Err(AppError::BadRequest("domain is required".to_string()));
        }
        if self.upstream.trim().is_empty() {
            return Err(AppError::BadRequest("upstream is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SitesResponse {
    pub sites: Vec<Site>,
}

#[derive(Debug, Serialize)]
pub struct SiteResponse {
    pub site: Site,
}

async fn list_sites(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> std::result::Result<Json<SitesResponse>, AppError> {
    let sites = state.sites.list(tenant_id).await?;
    Ok(Json(SitesResponse { sites }))
}

async fn create_site(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(req): Json<SiteInput>,
) -> std::result::Result<(StatusCode, Json<SiteResponse>), AppError> {
    req.validate()?;
    let site = state.sites.create(tenant_id, req).await?;
    Ok((StatusCode::CREATED, Json(SiteResponse { site })))
}

async fn get_site(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> std::result::Result<Json<SiteResponse>, AppError> {
    let site = state.sites.get(id, tenant_id).await?;
    Ok(Json(SiteResponse { site }))
}

async fn update_site(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
    Json(req): Json<SiteInput>,
) -> std::result::Result<Json<SiteResponse>, AppError> {
    req.validate()?;
    let site = state.sites.update(id, tenant_id, req).await?;
    Ok(Json(SiteResponse { site }))
}

async fn delete_site(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> std::result::Result<Json<SuccessResponse>, AppError> {
    state.sites.delete(id, tenant_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn toggle_site(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> std::result::Result<Json<SiteResponse>, AppError> {
    let site = state.sites.toggle(id, tenant_id).await?;
    Ok(Json(SiteResponse { site }))
}

/// The sites module, mounted under the protected API.
pub struct SitesModule;

impl Module for SitesModule {
    fn name(&self) -> &'static str {
        "sites"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn mount_point(&self) -> MountPoint {
        MountPoint::Protected
    }

    fn router(&self) -> Router<AppState> {
        Router::new()
            .route("/sites", get(list_sites).post(create_site))
            .route(
                "/sites/{id}",
                get(get_site).put(update_site).delete(delete_site),
            )
            .route("/sites/{id}/toggle", post(toggle_site))
    }
}
