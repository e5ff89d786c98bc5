//! End-to-end API tests over the assembled router.
//!
//! Each test wires a fresh in-memory database (plus a temp-file set cache
//! where the cache path matters), seeds one tenant per API key, and drives
//! the HTTP surface with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wafden::bans::SetCache;
use wafden::db::Db;
use wafden::http::auth::{bootstrap_tenant, API_KEY_HEADER};
use wafden::http::{router, AppState};

const KEY_A: &str = "tenant-a-key";
const KEY_B: &str = "tenant-b-key";

fn app() -> axum::Router {
    let db = Db::open_in_memory().unwrap();
    bootstrap_tenant(&db, "tenant-a", KEY_A).unwrap();
    bootstrap_tenant(&db, "tenant-b", KEY_B).unwrap();
    router(AppState::new(db, None))
}

fn app_with_cache() -> (tempfile::TempDir, axum::Router) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open_in_memory().unwrap();
    bootstrap_tenant(&db, "tenant-a", KEY_A).unwrap();
    bootstrap_tenant(&db, "tenant-b", KEY_B).unwrap();
    let cache = SetCache::open(dir.path().join("cache.redb")).unwrap();
    (dir, router(AppState::new(db, Some(cache))))
}

fn get(uri: &str, key: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(API_KEY_HEADER, key)
        .body(Body::empty())
        .unwrap()
}

fn send_json(method: &str, uri: &str, key: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(API_KEY_HEADER, key)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Bans
// =============================================================================

#[tokio::test]
async fn ban_lifecycle_create_check_delete() {
    let app = app();

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "203.0.113.7", "reason": "scraping"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["ban"]["ipAddress"], "203.0.113.7");
    assert_eq!(created["ban"]["source"], "manual");
    assert!(created["ban"]["expiresAt"].is_null(), "no duration = permanent");
    let id = created["ban"]["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get("/api/v2/bans/check/203.0.113.7", KEY_A))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(true));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v2/bans/{id}"))
                .header(API_KEY_HEADER, KEY_A)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get("/api/v2/bans/check/203.0.113.7", KEY_A))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(false));
}

#[tokio::test]
async fn invalid_address_is_rejected_before_storage() {
    let app = app();
    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "not-an-ip"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/v2/bans", KEY_A)).await.unwrap();
    assert_eq!(body_json(response).await["total"], json!(0));
}

#[tokio::test]
async fn oversized_duration_is_rejected_not_fatal() {
    let app = app();
    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "203.0.113.9", "duration": i64::MAX}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans/bulk",
            KEY_A,
            json!({"ips": ["203.0.113.9"], "duration": i64::MAX}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing was persisted by either request.
    let listed = body_json(app.oneshot(get("/api/v2/bans", KEY_A)).await.unwrap()).await;
    assert_eq!(listed["total"], json!(0));
}

#[tokio::test]
async fn bans_are_tenant_isolated() {
    let app = app();
    app.clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "203.0.113.7"}),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/v2/bans/check/203.0.113.7", KEY_B))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(false));

    let listed = body_json(app.clone().oneshot(get("/api/v2/bans", KEY_A)).await.unwrap()).await;
    let id = listed["bans"][0]["id"].as_str().unwrap().to_string();

    // The other tenant cannot see the ban by id either.
    let response = app
        .oneshot(get(&format!("/api/v2/bans/{id}"), KEY_B))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cidr_ban_covers_contained_addresses() {
    let (_dir, app) = app_with_cache();
    app.clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "203.0.113.0/24", "reason": "abusive range"}),
        ))
        .await
        .unwrap();

    // Contained address misses the exact-match cache and resolves through
    // the authoritative containment check.
    let response = app
        .clone()
        .oneshot(get("/api/v2/bans/check/203.0.113.200", KEY_A))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(true));

    let response = app
        .oneshot(get("/api/v2/bans/check/203.0.114.1", KEY_A))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(false));
}

#[tokio::test]
async fn bulk_create_reports_partial_success() {
    let app = app();
    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans/bulk",
            KEY_A,
            json!({
                "ips": ["10.1.0.1", "10.1.0.2", "bogus", "300.1.1.1", "10.1.0.0/16"],
                "reason": "batch import"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["created"], json!(3));
    assert_eq!(outcome["total"], json!(5));

    let listed = body_json(app.oneshot(get("/api/v2/bans", KEY_A)).await.unwrap()).await;
    assert_eq!(listed["total"], json!(3));
    assert_eq!(listed["bans"][0]["source"], "bulk");
}

#[tokio::test]
async fn bulk_delete_counts_only_rows_it_removed() {
    let app = app();
    for ip in ["10.2.0.1", "10.2.0.2"] {
        app.clone()
            .oneshot(send_json(
                "POST",
                "/api/v2/bans",
                KEY_A,
                json!({"ipAddress": ip}),
            ))
            .await
            .unwrap();
    }
    let listed = body_json(app.clone().oneshot(get("/api/v2/bans", KEY_A)).await.unwrap()).await;
    let mut ids: Vec<Value> = listed["bans"]
        .as_array()
        .unwrap()
        .iter()
        .map(|ban| ban["id"].clone())
        .collect();
    ids.push(json!(uuid::Uuid::new_v4())); // unknown id, silently skipped

    let response = app
        .clone()
        .oneshot(send_json(
            "DELETE",
            "/api/v2/bans/bulk",
            KEY_A,
            json!({ "ids": ids }),
        ))
        .await
        .unwrap();
    let outcome = body_json(response).await;
    assert_eq!(outcome["deleted"], json!(2));
    assert_eq!(outcome["total"], json!(3));

    let listed = body_json(app.oneshot(get("/api/v2/bans", KEY_A)).await.unwrap()).await;
    assert_eq!(listed["total"], json!(0));
}

#[tokio::test]
async fn delete_by_ip_and_stats_partition() {
    let app = app();
    // One permanent manual ban, one temporary.
    app.clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "10.3.0.1"}),
        ))
        .await
        .unwrap();
    app.clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "10.3.0.2", "duration": 60, "source": "scanner"}),
        ))
        .await
        .unwrap();

    let stats = body_json(app.clone().oneshot(get("/api/v2/bans/stats", KEY_A)).await.unwrap()).await;
    assert_eq!(stats["stats"]["total"], json!(2));
    assert_eq!(stats["stats"]["active"], json!(2));
    assert_eq!(stats["stats"]["permanent"], json!(1));
    assert_eq!(stats["stats"]["temporary"], json!(1));
    assert_eq!(stats["stats"]["manual"], json!(1));
    assert_eq!(stats["stats"]["automatic"], json!(1));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v2/bans/ip/10.3.0.1")
                .header(API_KEY_HEADER, KEY_A)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get("/api/v2/bans/check/10.3.0.1", KEY_A))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(false));
}

#[tokio::test]
async fn repeated_ban_updates_in_place() {
    let app = app();
    let first = body_json(
        app.clone()
            .oneshot(send_json(
                "POST",
                "/api/v2/bans",
                KEY_A,
                json!({"ipAddress": "10.4.0.1", "reason": "first"}),
            ))
            .await
            .unwrap(),
    )
    .await;

    let second = body_json(
        app.clone()
            .oneshot(send_json(
                "POST",
                "/api/v2/bans",
                KEY_A,
                json!({"ipAddress": "10.4.0.1", "reason": "second"}),
            ))
            .await
            .unwrap(),
    )
    .await;

    // Same row: the id survives, the reason is refreshed.
    assert_eq!(first["ban"]["id"], second["ban"]["id"]);
    assert_eq!(second["ban"]["reason"], "second");

    let listed = body_json(app.oneshot(get("/api/v2/bans", KEY_A)).await.unwrap()).await;
    assert_eq!(listed["total"], json!(1));
}

#[tokio::test]
async fn check_works_with_cache_attached() {
    let (_dir, app) = app_with_cache();
    app.clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/bans",
            KEY_A,
            json!({"ipAddress": "10.5.0.1"}),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/v2/bans/check/10.5.0.1", KEY_A))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(true));

    // Cache mirror is tenant-scoped too.
    let response = app
        .oneshot(get("/api/v2/bans/check/10.5.0.1", KEY_B))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["banned"], json!(false));
}

#[tokio::test]
async fn list_paginates_newest_first() {
    let app = app();
    for i in 1..=5 {
        app.clone()
            .oneshot(send_json(
                "POST",
                "/api/v2/bans",
                KEY_A,
                json!({"ipAddress": format!("10.6.0.{i}")}),
            ))
            .await
            .unwrap();
    }

    let page = body_json(
        app.clone()
            .oneshot(get("/api/v2/bans?page=1&limit=2", KEY_A))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(page["total"], json!(5));
    assert_eq!(page["totalPages"], json!(3));
    assert_eq!(page["bans"].as_array().unwrap().len(), 2);

    let last = body_json(
        app.oneshot(get("/api/v2/bans?page=3&limit=2", KEY_A))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(last["bans"].as_array().unwrap().len(), 1);
}

// =============================================================================
// Sites
// =============================================================================

#[tokio::test]
async fn site_crud_round_trip() {
    let app = app();
    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/sites",
            KEY_A,
            json!({"domain": "example.com", "upstream": "http://10.0.0.10:8080"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["site"]["wafMode"], "on");
    assert_eq!(created["site"]["enabled"], json!(true));
    let id = created["site"]["id"].as_str().unwrap().to_string();

    // Duplicate domain for the same tenant conflicts.
    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/v2/sites",
            KEY_A,
            json!({"domain": "example.com", "upstream": "http://10.0.0.11:8080"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .clone()
        .oneshot(send_json(
            "PUT",
            &format!("/api/v2/sites/{id}"),
            KEY_A,
            json!({"domain": "example.com", "upstream": "http://10.0.0.12:8080", "wafMode": "detect"}),
        ))
        .await
        .unwrap();
    let updated = body_json(response).await;
    assert_eq!(updated["site"]["wafMode"], "detect");

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            &format!("/api/v2/sites/{id}/toggle"),
            KEY_A,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["site"]["enabled"], json!(false));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v2/sites/{id}"))
                .header(API_KEY_HEADER, KEY_A)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listed = body_json(app.oneshot(get("/api/v2/sites", KEY_A)).await.unwrap()).await;
    assert!(listed["sites"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn site_missing_fields_are_rejected() {
    let app = app();
    let response = app
        .oneshot(send_json(
            "POST",
            "/api/v2/sites",
            KEY_A,
            json!({"domain": "  ", "upstream": "http://10.0.0.10:8080"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Settings
// =============================================================================

#[tokio::test]
async fn settings_round_trip_per_tenant() {
    let app = app();
    let response = app
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/v2/settings",
            KEY_A,
            json!({"alert_email": "ops@example.com", "retention_days": "30"}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["updated"], json!(2));

    let settings = body_json(app.clone().oneshot(get("/api/v2/settings", KEY_A)).await.unwrap()).await;
    assert_eq!(settings["settings"]["retention_days"], "30");

    // Other tenant sees nothing.
    let settings = body_json(app.clone().oneshot(get("/api/v2/settings", KEY_B)).await.unwrap()).await;
    assert!(settings["settings"].as_object().unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v2/settings/retention_days")
                .header(API_KEY_HEADER, KEY_A)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v2/settings/retention_days")
                .header(API_KEY_HEADER, KEY_A)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Security events
// =============================================================================

#[tokio::test]
async fn event_ingest_list_and_summary() {
    let app = app();
    for (ip, action) in [("10.7.0.1", "block"), ("10.7.0.1", "block"), ("10.7.0.2", "flag")] {
        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/v2/security/events",
                KEY_A,
                json!({
                    "ipAddress": ip,
                    "method": "GET",
                    "path": "/wp-login.php",
                    "ruleId": "scanner-001",
                    "action": action
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let listed = body_json(
        app.clone()
            .oneshot(get("/api/v2/security/events?action=block", KEY_A))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(listed["total"], json!(2));

    let summary = body_json(
        app.clone()
            .oneshot(get("/api/v2/security/events/summary", KEY_A))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(summary["summary"]["total"], json!(3));
    assert_eq!(summary["summary"]["blocked"], json!(2));
    assert_eq!(summary["summary"]["flagged"], json!(1));
    assert_eq!(summary["summary"]["uniqueIps"], json!(2));

    // Other tenant's summary is empty.
    let summary = body_json(
        app.oneshot(get("/api/v2/security/events/summary", KEY_B))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(summary["summary"]["total"], json!(0));
}
