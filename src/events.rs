//! Security-event observability.
//!
//! The data plane records one event per WAF decision through the ingest
//! endpoint; the dashboard reads them back paginated and aggregated. This
//! is read-mostly glue: events are append-only, retention is an external
//! job's problem.

use crate::db::{join_err, Db};
use crate::error::{Error, Result};
use crate::http::auth::Tenant;
use crate::http::{AppError, AppState};
use crate::module::{Module, MountPoint};
use crate::tenant::TenantId;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// WAF decision recorded with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Block,
    Allow,
    Flag,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Allow => "allow",
            Self::Flag => "flag",
        }
    }

    fn from_db(s: &str) -> Self {
        match s {
            "block" => Self::Block,
            "allow" => Self::Allow,
            _ => Self::Flag,
        }
    }
}

/// One recorded WAF decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<Uuid>,
    pub ip_address: String,
    pub method: String,
    pub path: String,
    pub rule_id: String,
    pub action: Action,
    pub created_at: DateTime<Utc>,
}

/// Ingest payload from the data plane.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub site_id: Option<Uuid>,
    pub ip_address: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub rule_id: String,
    pub action: Action,
}

/// Aggregates over the last 24 hours.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub total: u64,
    pub blocked: u64,
    pub allowed: u64,
    pub flagged: u64,
    pub unique_ips: u64,
}

const EVENT_COLUMNS: &str =
    "id, tenant_id, site_id, ip_address, method, path, rule_id, action, created_at";

/// Tenant-scoped event storage.
#[derive(Clone)]
pub struct EventStore {
    db: Db,
}

impl EventStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn record_sync(&self, tenant_id: TenantId, event: &NewEvent) -> Result<SecurityEvent> {
        let id = Uuid::new_v4();
        let site_key = event.site_id.map(|s| s.to_string()).unwrap_or_default();
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO security_events
                 (id, tenant_id, site_id, ip_address, method, path, rule_id, action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                tenant_id.to_string(),
                site_key,
                event.ip_address,
                event.method,
                event.path,
                event.rule_id,
                event.action.as_str(),
                Utc::now().timestamp(),
            ],
        )?;
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM security_events WHERE id = ?1"),
            params![id.to_string()],
            event_from_row,
        )
        .optional()?
        .ok_or(Error::NotFound("event"))
    }

    fn list_sync(
        &self,
        tenant_id: TenantId,
        site_id: Option<Uuid>,
        action: Option<Action>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<SecurityEvent>, u64)> {
        let page = page.max(1);
        let limit = limit.clamp(1, 500);
        let offset = (page - 1) * limit;

        let mut filter = String::from("tenant_id = ?1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id.to_string())];
        if let Some(site) = site_id {
            args.push(Box::new(site.to_string()));
            filter.push_str(&format!(" AND site_id = ?{}", args.len()));
        }
        if let Some(action) = action {
            args.push(Box::new(action.as_str()));
            filter.push_str(&format!(" AND action = ?{}", args.len()));
        }

        let conn = self.db.lock()?;
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM security_events WHERE {filter}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM security_events WHERE {filter}
             ORDER BY created_at DESC, id DESC
             LIMIT {limit} OFFSET {offset}"
        ))?;
        let events = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                event_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((events, total))
    }

    fn summary_sync(&self, tenant_id: TenantId) -> Result<EventSummary> {
        let since = (Utc::now() - Duration::hours(24)).timestamp();
        let conn = self.db.lock()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN action = 'block' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN action = 'allow' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN action = 'flag' THEN 1 ELSE 0 END), 0),
                    COUNT(DISTINCT ip_address)
             FROM security_events WHERE tenant_id = ?1 AND created_at > ?2",
            params![tenant_id.to_string(), since],
            |row| {
                Ok(EventSummary {
                    total: row.get::<_, i64>(0)? as u64,
                    blocked: row.get::<_, i64>(1)? as u64,
                    allowed: row.get::<_, i64>(2)? as u64,
                    flagged: row.get::<_, i64>(3)? as u64,
                    unique_ips: row.get::<_, i64>(4)? as u64,
                })
            },
        )
        .map_err(Error::from)
    }

    pub async fn record(&self, tenant_id: TenantId, event: NewEvent) -> Result<SecurityEvent> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.record_sync(tenant_id, &event))
            .await
            .map_err(join_err)?
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        site_id: Option<Uuid>,
        action: Option<Action>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<SecurityEvent>, u64)> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.list_sync(tenant_id, site_id, action, page, limit)
        })
        .await
        .map_err(join_err)?
    }

    pub async fn summary(&self, tenant_id: TenantId) -> Result<EventSummary> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.summary_sync(tenant_id))
            .await
            .map_err(join_err)?
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<SecurityEvent> {
    let id: String = row.get(0)?;
    let tenant: String = row.get(1)?;
    let site: String = row.get(2)?;
    let created_at: i64 = row.get(8)?;
    Ok(SecurityEvent {
        id: parse_uuid(0, &id)?,
        tenant_id: TenantId(parse_uuid(1, &tenant)?),
        site_id: if site.is_empty() {
            None
        } else {
            Some(parse_uuid(2, &site)?)
        },
        ip_address: row.get(3)?,
        method: row.get(4)?,
        path: row.get(5)?,
        rule_id: row.get(6)?,
        action: Action::from_db(&row.get::<_, String>(7)?),
        created_at: Utc.timestamp_opt(created_at, 0).single().unwrap_or_default(),
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsQuery {
    pub site_id: Option<Uuid>,
    pub action: Option<Action>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEventsResponse {
    pub events: Vec<SecurityEvent>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event: SecurityEvent,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: EventSummary,
}

async fn list_events(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(query): Query<ListEventsQuery>,
) -> std::result::Result<Json<ListEventsResponse>, AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let (events, total) = state
        .events
        .list(tenant_id, query.site_id, query.action, page, limit)
        .await?;
    Ok(Json(ListEventsResponse {
        events,
        total,
        page,
        limit,
        total_pages: total.div_ceil(limit),
    }))
}

async fn record_event(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Json(req): Json<NewEvent>,
) -> std::result::Result<(StatusCode, Json<EventResponse>), AppError> {
    let event = state.events.record(tenant_id, req).await?;
    Ok((StatusCode::CREATED, Json(EventResponse { event })))
}

async fn events_summary(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> std::result::Result<Json<SummaryResponse>, AppError> {
    let summary = state.events.summary(tenant_id).await?;
    Ok(Json(SummaryResponse { summary }))
}

/// The security-events module, mounted under the protected API.
pub struct EventsModule;

impl Module for EventsModule {
    fn name(&self) -> &'static str {
        "security"
    }

    fn version(&self) -> &'static str {
        "2.0.0"
    }

    fn mount_point(&self) -> MountPoint {
        MountPoint::Protected
    }

    fn router(&self) -> Router<AppState> {
        Router::new()
            .route("/security/events", get(list_events).post(record_event))
            .route("/security/events/summary", get(events_summary))
    }
}
