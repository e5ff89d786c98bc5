//! HTTP handlers for the bans module.

use super::{NewBan, Source};
use crate::http::auth::Tenant;
use crate::http::types::SuccessResponse;
use crate::http::{AppError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bans", get(list_bans).post(create_ban))
        .route("/bans/stats", get(ban_stats))
        .route("/bans/check/{ip}", get(check_ban))
        .route("/bans/bulk", post(bulk_create).delete(bulk_delete))
        .route("/bans/ip/{ip}", delete(delete_ban_by_ip))
        .route("/bans/{id}", get(get_ban).delete(delete_ban))
}

// =============================================================================
// Request / Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBanRequest {
    pub ip_address: String,
    pub site_id: Option<Uuid>,
    #[serde(default)]
    pub reason: String,
    /// Ban duration in minutes. Absent or zero means permanent.
    pub duration: Option<i64>,
    pub source: Option<Source>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBansQuery {
    pub site_id: Option<Uuid>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateRequest {
    pub ips: Vec<String>,
    #[serde(default)]
    pub reason: String,
    pub duration: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBansResponse {
    pub bans: Vec<super::BannedEntry>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct BanResponse {
    pub ban: super::BannedEntry,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub banned: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkCreateResponse {
    pub created: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteResponse {
    pub deleted: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: super::BanStats,
}

/// Turns a duration in minutes into an absolute expiry. Absent or
/// non-positive means permanent; a duration too large to represent as a
/// timestamp is a client error, not a panic.
fn expiry_from_duration(
    duration: Option<i64>,
) -> Result<Option<DateTime<Utc>>, AppError> {
    match duration.filter(|minutes| *minutes > 0) {
        None => Ok(None),
        Some(minutes) => Duration::try_minutes(minutes)
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .map(Some)
            .ok_or_else(|| AppError::BadRequest("duration out of range".to_string())),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /bans - List active bans, newest first.
async fn list_bans(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(query): Query<ListBansQuery>,
) -> Result<Json<ListBansResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let (bans, total) = state.bans.list(tenant_id, query.site_id, page, limit).await?;
    Ok(Json(ListBansResponse {
        bans,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    }))
}

/// POST /bans - Ban an address or CIDR block.
async fn create_ban(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(req): Json<CreateBanRequest>,
) -> Result<(StatusCode, Json<BanResponse>), AppError> {
    let ban = NewBan {
        tenant_id,
        site_id: req.site_id,
        ip_address: req.ip_address,
        reason: req.reason,
        source: req.source.unwrap_or_default(),
        expires_at: expiry_from_duration(req.duration)?,
    };
    let entry = state.bans.create(ban).await?;
    Ok((StatusCode::CREATED, Json(BanResponse { ban: entry })))
}

/// GET /bans/check/{ip} - Is this address banned?
async fn check_ban(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(ip): Path<String>,
) -> Result<Json<CheckResponse>, AppError> {
    let banned = state.bans.check(tenant_id, &ip).await?;
    Ok(Json(CheckResponse { banned }))
}

/// GET /bans/stats - Aggregate counts.
async fn ban_stats(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> Result<Json<StatsResponse>, AppError> {
    let stats = state.bans.stats(tenant_id).await?;
    Ok(Json(StatsResponse { stats }))
}

/// GET /bans/{id} - Single ban by id.
async fn get_ban(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<BanResponse>, AppError> {
    let ban = state.bans.get(id, tenant_id).await?;
    Ok(Json(BanResponse { ban }))
}

/// DELETE /bans/{id} - Remove a ban by id.
async fn delete_ban(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.bans.delete(id, tenant_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// DELETE /bans/ip/{ip} - Remove bans by address.
async fn delete_ban_by_ip(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(ip): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.bans.delete_by_address(ip, tenant_id).await?;
    Ok(Json(SuccessResponse::ok()))
}

/// POST /bans/bulk - Ban a list of addresses, partial success.
async fn bulk_create(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(req): Json<BulkCreateRequest>,
) -> Result<Json<BulkCreateResponse>, AppError> {
    let expires_at = expiry_from_duration(req.duration)?;
    let outcome = state
        .bans
        .bulk_create(tenant_id, req.ips, req.reason, expires_at)
        .await;
    Ok(Json(BulkCreateResponse {
        created: outcome.applied,
        total: outcome.total,
    }))
}

/// DELETE /bans/bulk - Remove a list of bans by id, partial success.
async fn bulk_delete(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>, AppError> {
    let outcome = state.bans.bulk_delete(tenant_id, req.ids).await;
    Ok(Json(BulkDeleteResponse {
        deleted: outcome.applied,
        total: outcome.total,
    }))
}
