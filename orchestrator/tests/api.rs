mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::Filter;

use rag_orchestrator::api::{routes, AppContext};
use rag_orchestrator::error::{handle_rejection, NOT_INGESTED_MESSAGE};
use rag_orchestrator::middleware::rate_limiter;

use common::*;

fn app(
    h: Harness,
    per_second: u32,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    routes(AppContext {
        pipeline: Arc::new(h.pipeline),
        compliance: Arc::new(h.compliance),
        ingestion: Arc::new(h.ingestion),
        limiter: rate_limiter(per_second),
    })
    .recover(handle_rejection)
}

fn handbook() -> MockStore {
    MockStore::with_hits(
        vec![hit("c4", "Employees must provide 30 days notice before termination.", Some(4))],
        vec![hit("c4", "Employees must provide 30 days notice before termination.", Some(4))],
    )
}

fn body(resp: &warp::http::Response<bytes::Bytes>) -> Value {
    serde_json::from_slice(resp.body()).unwrap()
}

#[tokio::test]
async fn query_returns_answer_documents_and_timings() {
    let filter = app(
        harness(handbook(), RecordingBackend::always("Thirty days [Page 4]."), RerankSetup::Disabled),
        100,
    );

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/query")
        .json(&json!({"query": "What is the notice period for termination?"}))
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body(&resp);
    assert_eq!(body["status"], "answered");
    assert_eq!(body["answer"], "Thirty days [Page 4].");
    assert_eq!(body["documents"][0]["page"], 4);
    assert_eq!(body["citations"][0]["page"], 4);
    assert!(body["timings"]["total_ms"].is_number());
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn query_on_missing_collection_is_not_an_http_error() {
    let store = MockStore {
        exists: false,
        ..Default::default()
    };
    let filter = app(harness(store, RecordingBackend::always("q"), RerankSetup::Disabled), 100);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/query")
        .json(&json!({"query": "anything"}))
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body(&resp);
    assert_eq!(body["status"], "not_ingested");
    assert_eq!(body["answer"], NOT_INGESTED_MESSAGE);
    assert_eq!(body["documents"], json!([]));
}

#[tokio::test]
async fn blank_query_is_a_bad_request() {
    let filter = app(harness(handbook(), RecordingBackend::always("q"), RerankSetup::Disabled), 100);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/query")
        .json(&json!({"query": "   "}))
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&resp)["error"], "Bad request");
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let filter = app(harness(handbook(), RecordingBackend::always("q"), RerankSetup::Disabled), 100);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/query")
        .header("content-type", "application/json")
        .body("{\"question\": 1}")
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn contract_violation_is_an_internal_error() {
    let embedder = MockEmbedder {
        short: true,
        ..Default::default()
    };
    let filter = app(
        harness_with(
            handbook(),
            embedder,
            RecordingBackend::always("q"),
            RerankSetup::Disabled,
            rag_orchestrator::config::RefineMode::Single,
        ),
        100,
    );

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/query")
        .json(&json!({"query": "notice"}))
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn requests_over_the_rate_limit_get_429() {
    let filter = app(harness(handbook(), RecordingBackend::always("q"), RerankSetup::Disabled), 1);

    let request = || {
        warp::test::request()
            .method("POST")
            .path("/api/v1/query")
            .json(&json!({"query": "notice"}))
    };
    assert_eq!(request().reply(&filter).await.status(), StatusCode::OK);
    assert_eq!(request().reply(&filter).await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rules_endpoint_returns_the_audit() {
    let backend = RecordingBackend::scripted(
        vec![Ok("- 30 days notice [Page 4]".to_string()), Ok("Verdict: ✅ Compliant".to_string())],
        Ok("unused".to_string()),
    );
    let filter = app(harness(handbook(), backend, RerankSetup::Disabled), 100);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/v1/rules")
        .json(&json!({"organization_context": "Retail chain", "custom_rules": "Two weeks notice"}))
        .reply(&filter)
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body(&resp);
    assert_eq!(body["verdict"], "Compliant");
    assert_eq!(body["source_documents"][0]["page"], 4);
    assert!(body["generated_at"].is_string());
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let filter = app(harness(handbook(), RecordingBackend::always("q"), RerankSetup::Disabled), 100);

    let resp = warp::test::request().method("GET").path("/api/v1/pending").reply(&filter).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
