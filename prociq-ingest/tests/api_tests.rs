//! HTTP surface tests via tower::ServiceExt::oneshot

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use prociq_common::config::IngestConfig;
use prociq_ingest::{build_router, db, AppState};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

async fn test_state() -> AppState {
    let pool = prociq_common::db::init_memory_pool().await.unwrap();
    db::init_ingest_schema(&pool).await.unwrap();
    AppState::new(pool, IngestConfig::default())
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn ingest_body(org: Uuid, upload_ref: &str) -> Value {
    json!({
        "organization_id": org,
        "upload_ref": upload_ref,
        "headers": ["Vendor", "Material", "Qty", "Price", "Order Date"],
        "rows": [[
            ["Vendor", "O'Reilly & Sons"],
            ["Material", "Copper Pipe"],
            ["Qty", "10"],
            ["Price", "5.00"],
            ["Order Date", "2026-07-01"]
        ]]
    })
}

/// Poll the summary endpoint until the batch reaches a terminal status
async fn wait_for_completion(state: &AppState, batch_id: &str) -> Value {
    for _ in 0..100 {
        let response = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/ingest/batches/{}", batch_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let summary = response_json(response).await;
        let status = summary["status"].as_str().unwrap().to_string();
        if status == "completed" || status == "failed" {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("batch {} did not reach a terminal status", batch_id);
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = test_state().await;
    let response = build_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_ingest_and_poll_summary() {
    let state = test_state().await;
    let org = Uuid::new_v4();

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/ingest/batches",
            ingest_body(org, "upload-api-1"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let accepted = response_json(response).await;
    let batch_id = accepted["batch_id"].as_str().unwrap().to_string();
    assert_eq!(accepted["records"], 1);

    let summary = wait_for_completion(&state, &batch_id).await;
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["record_counts"]["committed"], 1);
    assert!(summary["quality"]["mean_composite"].as_f64().unwrap() > 0.0);

    // Commit receipts for reporting
    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/ingest/batches/{}/commits", batch_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let commits = response_json(response).await;
    let list = commits.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["created_entity_ids"].as_array().unwrap().len(), 2);
    assert_eq!(list[0]["matched_entity_count"], 0);
}

#[tokio::test]
async fn test_unknown_batch_returns_404() {
    let state = test_state().await;
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri(format!("/ingest/batches/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_upload_ref_rejected() {
    let state = test_state().await;
    let response = build_router(state)
        .oneshot(json_request(
            "POST",
            "/ingest/batches",
            ingest_body(Uuid::new_v4(), "  "),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_template_field_rejected() {
    let state = test_state().await;
    let mut body = ingest_body(Uuid::new_v4(), "upload-api-2");
    body["template"] = json!({
        "name": "broken",
        "columns": { "Vendor": "no_such_field" }
    });

    let response = build_router(state)
        .oneshot(json_request("POST", "/ingest/batches", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_conflict_listing_and_resolution_flow() {
    let state = test_state().await;
    let org = Uuid::new_v4();

    // Seed a near-variant supplier so the upload routes to review
    let existing = prociq_ingest::models::CatalogEntry::new(
        org,
        prociq_ingest::models::EntryType::Supplier,
        "Supplier Incorporated".to_string(),
        "supplier incorporated".to_string(),
        Default::default(),
    );
    let mut conn = state.db.acquire().await.unwrap();
    db::catalog::insert_entry(&mut conn, &existing).await.unwrap();
    drop(conn);

    let mut body = ingest_body(org, "upload-api-3");
    body["rows"][0][0] = json!(["Vendor", "Supplier Inc"]);

    let response = build_router(state.clone())
        .oneshot(json_request("POST", "/ingest/batches", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = response_json(response).await;
    let batch_id = accepted["batch_id"].as_str().unwrap().to_string();

    let summary = wait_for_completion(&state, &batch_id).await;
    assert_eq!(summary["record_counts"]["needs_review"], 1);

    // The queue surfaces the entry with ranked candidates
    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/conflicts?organization_id={}", org))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let conflicts = response_json(response).await;
    let list = conflicts.as_array().unwrap();
    assert_eq!(list.len(), 1);
    let conflict_id = list[0]["id"].as_str().unwrap().to_string();
    assert_eq!(list[0]["input_name"], "Supplier Inc");

    // Resolve by choosing the existing entry
    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/conflicts/{}/resolve", conflict_id),
            json!({
                "chosen_catalog_entry_id": existing.id,
                "resolved_by": "reviewer-9"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let resolved = response_json(response).await;
    assert_eq!(resolved["record_status"], "committed");

    // Queue is drained; re-resolving the same entry conflicts
    let response = build_router(state.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/conflicts?organization_id={}", org))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let remaining = response_json(response).await;
    assert!(remaining.as_array().unwrap().is_empty());

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            &format!("/conflicts/{}/resolve", conflict_id),
            json!({ "create_new": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_endpoint_rejects_idle_batch() {
    let state = test_state().await;
    let org = Uuid::new_v4();

    let response = build_router(state.clone())
        .oneshot(json_request(
            "POST",
            "/ingest/batches",
            ingest_body(org, "upload-api-4"),
        ))
        .await
        .unwrap();
    let accepted = response_json(response).await;
    let batch_id = accepted["batch_id"].as_str().unwrap().to_string();
    wait_for_completion(&state, &batch_id).await;

    // Nothing is running anymore, so there is nothing to cancel
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/ingest/batches/{}/cancel", batch_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
