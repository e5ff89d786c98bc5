//! Tenant auth boundary.
//!
//! Protected routes require an `X-API-Key` header. The key's SHA-256 hash
//! is looked up in `api_keys` (expiry honored); on a match the resolved
//! [`TenantId`] is inserted as a typed request extension. Handlers take it
//! through the [`Tenant`] extractor and trust it unconditionally — tenant
//! identity is resolved exactly once per request, here.

use super::{AppError, AppState};
use crate::db::{join_err, Db};
use crate::error::Result;
use crate::tenant::TenantId;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Hex SHA-256 of an API key, the only form ever persisted.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Middleware gating the protected router.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let Some(key) = key else {
        return Err(AppError::Unauthorized(
            "authentication required".to_string(),
        ));
    };

    match resolve_tenant(&state.db, &key).await? {
        Some(tenant_id) => {
            request.extensions_mut().insert(tenant_id);
            Ok(next.run(request).await)
        }
        None => Err(AppError::Unauthorized("invalid API key".to_string())),
    }
}

async fn resolve_tenant(db: &Db, key: &str) -> Result<Option<TenantId>> {
    let db = db.clone();
    let hash = hash_api_key(key);
    tokio::task::spawn_blocking(move || -> Result<Option<TenantId>> {
        let conn = db.lock()?;
        let tenant: Option<String> = conn
            .query_row(
                "SELECT tenant_id FROM api_keys
                 WHERE key_hash = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![hash, Utc::now().timestamp()],
                |row| row.get(0),
            )
            .optional()?;
        match tenant {
            Some(id) => Ok(id.parse::<TenantId>().ok()),
            None => Ok(None),
        }
    })
    .await
    .map_err(join_err)?
}

/// Extractor for the tenant resolved by [`require_api_key`].
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantId>()
            .copied()
            .map(Tenant)
            .ok_or_else(|| AppError::Unauthorized("tenant context missing".to_string()))
    }
}

/// Creates a tenant with one API key. Used by `wafden init-db` and tests.
///
/// Idempotent on the key: re-running with the same key returns the
/// existing tenant instead of creating a second one.
pub fn bootstrap_tenant(db: &Db, name: &str, api_key: &str) -> Result<TenantId> {
    let hash = hash_api_key(api_key);
    let conn = db.lock()?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT tenant_id FROM api_keys WHERE key_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        if let Ok(tenant_id) = id.parse::<TenantId>() {
            return Ok(tenant_id);
        }
    }

    let tenant_id = TenantId::new();
    let now = Utc::now().timestamp();
    conn.execute(
        "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![tenant_id.to_string(), name, now],
    )?;
    conn.execute(
        "INSERT INTO api_keys (id, tenant_id, key_hash, expires_at, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4)",
        params![Uuid::new_v4().to_string(), tenant_id.to_string(), hash, now],
    )?;
    Ok(tenant_id)
}
