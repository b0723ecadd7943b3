use mooring_sync::{HttpRemoteConfig, HttpRemoteStore, RemoteStore, SyncError};
use mooring_types::{Record, RecordId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> HttpRemoteStore {
    HttpRemoteStore::new(HttpRemoteConfig {
        base_url: server.uri(),
        api_key: Some("secret".into()),
        timeout_ms: 2_000,
    })
    .unwrap()
}

async fn respond_with(verb: &str, route: &str, status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method(verb))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .mount(&server)
        .await;
    server
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn http_config_default() {
    let cfg = HttpRemoteConfig::default();
    assert_eq!(cfg.base_url, "http://localhost:8080");
    assert_eq!(cfg.api_key, None);
    assert_eq!(cfg.timeout_ms, 30_000);
}

#[test]
fn http_config_fills_missing_fields() {
    let cfg: HttpRemoteConfig =
        serde_json::from_str(r#"{"base_url":"https://api.example.com"}"#).unwrap();
    assert_eq!(cfg.base_url, "https://api.example.com");
    assert_eq!(cfg.timeout_ms, 30_000);
}

// ── Requests ─────────────────────────────────────────────────────

#[tokio::test]
async fn select_lists_a_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "title": "a"},
            {"id": "two", "title": "b"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let records = store_for(&server).select("notes").await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id(), Some(RecordId::new("1")));
    assert_eq!(records[1].id(), Some(RecordId::new("two")));
}

#[tokio::test]
async fn insert_returns_the_stored_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notes"))
        .and(body_json(json!({"title": "draft"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42, "title": "draft"})))
        .expect(1)
        .mount(&server)
        .await;

    let stored = store_for(&server)
        .insert("notes", &Record::new().with("title", "draft"))
        .await
        .unwrap();

    assert_eq!(stored.id(), Some(RecordId::new("42")));
}

#[tokio::test]
async fn update_sends_the_patch_without_id() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/notes/n1"))
        .and(body_json(json!({"done": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "n1", "title": "a", "done": true})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let updated = store_for(&server)
        .update(
            "notes",
            &RecordId::new("n1"),
            &Record::new().with("id", "n1").with("done", true),
        )
        .await
        .unwrap();

    assert_eq!(updated.get("done"), Some(&json!(true)));
}

#[tokio::test]
async fn delete_of_missing_record_succeeds() {
    let server = respond_with("DELETE", "/notes/gone", 404).await;
    store_for(&server)
        .delete("notes", &RecordId::new("gone"))
        .await
        .unwrap();
}

#[tokio::test]
async fn health_reflects_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    store_for(&server).health().await.unwrap();

    let down = respond_with("GET", "/health", 503).await;
    let err = store_for(&down).health().await.unwrap_err();
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn no_auth_header_without_api_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = HttpRemoteStore::new(HttpRemoteConfig {
        base_url: format!("{}/", server.uri()),
        ..Default::default()
    })
    .unwrap();
    assert!(store.select("notes").await.unwrap().is_empty());

    let requests = server.received_requests().await.unwrap();
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn reserved_characters_in_ids_stay_in_one_segment() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/notes/a%2Fb%3Fc%23d"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "a/b?c#d", "done": true})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/notes/a%2Fb%3Fc%23d"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let id = RecordId::new("a/b?c#d");
    let updated = store
        .update("notes", &id, &Record::new().with("done", true))
        .await
        .unwrap();
    assert_eq!(updated.id(), Some(id.clone()));
    store.delete("notes", &id).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.url.query().is_none()));
}

// ── Status mapping ───────────────────────────────────────────────

#[tokio::test]
async fn client_errors_map_to_specific_variants() {
    let cases: [(u16, fn(&SyncError) -> bool); 4] = [
        (400, |e| matches!(e, SyncError::Validation(_))),
        (422, |e| matches!(e, SyncError::Validation(_))),
        (401, |e| matches!(e, SyncError::Auth(_))),
        (403, |e| matches!(e, SyncError::Forbidden(_))),
    ];
    for (status, check) in cases {
        let server = respond_with("POST", "/notes", status).await;
        let err = store_for(&server)
            .insert("notes", &Record::new())
            .await
            .unwrap_err();
        assert!(check(&err), "{status} mapped to {err:?}");
        assert!(!err.is_connectivity(), "{status}");
    }
}

#[tokio::test]
async fn update_of_unknown_record_is_not_found() {
    let server = respond_with("PATCH", "/notes/n1", 404).await;
    let err = store_for(&server)
        .update("notes", &RecordId::new("n1"), &Record::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

#[tokio::test]
async fn server_errors_are_transient() {
    for status in [500, 502, 503, 429] {
        let server = respond_with("GET", "/notes", status).await;
        let err = store_for(&server).select("notes").await.unwrap_err();
        match &err {
            SyncError::Api { status: got, message } => {
                assert_eq!(*got, status);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_connectivity(), "{status}");
    }
}

#[tokio::test]
async fn malformed_body_is_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = store_for(&server).select("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Serialization(_)));
    assert!(!err.is_connectivity());
}

#[tokio::test]
async fn non_object_record_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .insert("notes", &Record::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Record(_)));
}

// ── Transport failures ───────────────────────────────────────────

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    // Nothing listens on port 1.
    let store = HttpRemoteStore::new(HttpRemoteConfig {
        base_url: "http://127.0.0.1:1".into(),
        ..Default::default()
    })
    .unwrap();
    let err = store.select("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)), "{err:?}");
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let store = HttpRemoteStore::new(HttpRemoteConfig {
        base_url: server.uri(),
        api_key: None,
        timeout_ms: 100,
    })
    .unwrap();
    let err = store.select("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout), "{err:?}");
    assert!(err.is_connectivity());
}
