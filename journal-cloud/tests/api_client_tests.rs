mod support;

use chrono::{TimeZone, Utc};
use journal_cloud::{
    CloudError, RemoteConfig, RemoteJournalWrite, RemoteSettings, RemoteStore, RestRemoteStore,
    SyncConfig, SyncEngine, SyncOutcome,
};
use journal_storage::JournalStore;
use journal_types::{AuthSession, AuthUser, SyncStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use support::*;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer) -> RestRemoteStore {
    RestRemoteStore::new(RemoteConfig::new(server.uri(), "anon-key")).unwrap()
}

fn journal_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "user_id": USER,
        "raw_blob": "{\"content\":\"hi\",\"cleaned_content\":null}",
        "encrypted_blob": null,
        "is_encrypted": false,
        "created_at": "2025-03-01T08:00:00Z",
        "updated_at": "2025-03-01T09:30:00Z",
        "version": 3
    })
}

fn write() -> RemoteJournalWrite {
    let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
    RemoteJournalWrite {
        user_id: USER.into(),
        raw_blob: Some("{\"content\":\"hi\",\"cleaned_content\":null}".into()),
        encrypted_blob: None,
        is_encrypted: false,
        created_at: at,
        updated_at: at,
        version: 3,
    }
}

// --- Configuration ---

#[test]
fn empty_base_url_is_rejected() {
    let err = RestRemoteStore::new(RemoteConfig::new("  ", "key")).err().unwrap();
    assert!(matches!(err, CloudError::Config(_)));
}

// --- Journals ---

#[tokio::test]
async fn list_filters_by_user_and_orders_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/journals"))
        .and(query_param("user_id", "eq.user-1"))
        .and(query_param("order", "updated_at.desc"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([journal_json("r-1")])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = setup(&server).list_journals(USER).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "r-1");
    assert_eq!(rows[0].version, 3);
    assert_eq!(
        rows[0].updated_at,
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()
    );
}

#[tokio::test]
async fn access_token_replaces_api_key_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/journals"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = setup(&server);
    client.set_access_token(Some("user-jwt".into())).await;
    assert!(client.has_access_token().await);
    assert!(client.list_journals(USER).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_asks_for_the_inserted_row() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/journals"))
        .and(header("prefer", "return=representation"))
        .and(body_partial_json(json!({
            "user_id": USER,
            "is_encrypted": false,
            "encrypted_blob": null,
            "version": 3
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([journal_json("new-id")])))
        .expect(1)
        .mount(&server)
        .await;

    let row = setup(&server).create_journal(&write()).await.unwrap();
    assert_eq!(row.id, "new-id");
}

#[tokio::test]
async fn update_targets_row_and_owner() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/journals"))
        .and(query_param("id", "eq.r-9"))
        .and(query_param("user_id", "eq.user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([journal_json("r-9")])))
        .expect(1)
        .mount(&server)
        .await;

    let row = setup(&server).update_journal("r-9", &write()).await.unwrap();
    assert_eq!(row.id, "r-9");
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/journals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = setup(&server).update_journal("gone", &write()).await.unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)));
}

// --- Settings ---

#[tokio::test]
async fn missing_settings_row_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/settings"))
        .and(query_param("user_id", "eq.user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    assert_eq!(setup(&server).get_settings(USER).await.unwrap(), None);
}

#[tokio::test]
async fn settings_update_is_keyed_by_user() {
    let server = MockServer::start().await;
    let settings = RemoteSettings {
        user_id: USER.into(),
        lock_enabled: false,
        cursor_color: "#3b82f6".into(),
        text_color: "#171717".into(),
        cleanup_enabled: false,
        cleanup_prompt: "Make me sound like a pirate.".into(),
        selected_model: None,
        updated_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
    };
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/settings"))
        .and(query_param("user_id", "eq.user-1"))
        .and(body_partial_json(json!({ "cursor_color": "#3b82f6" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([settings])))
        .expect(1)
        .mount(&server)
        .await;

    let echoed = setup(&server).update_settings(&settings).await.unwrap();
    assert_eq!(echoed, settings);
}

// --- Errors ---

#[tokio::test]
async fn unauthorized_maps_to_auth_required() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = setup(&server).list_journals(USER).await.unwrap_err();
    assert!(matches!(err, CloudError::AuthRequired));
}

#[tokio::test]
async fn server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .mount(&server)
        .await;

    let err = setup(&server).create_journal(&write()).await.unwrap_err();
    match err {
        CloudError::Api(msg) => {
            assert!(msg.contains("500"));
            assert!(msg.contains("db down"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// --- Engine over HTTP ---

#[tokio::test]
async fn engine_pushes_through_rest_store() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/journals"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/journals"))
        .and(body_partial_json(json!({ "user_id": USER })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([journal_json("srv-1")])))
        .expect(1)
        .mount(&server)
        .await;

    let store = JournalStore::open_in_memory().unwrap();
    let auth = AuthSession::new();
    auth.sign_in(AuthUser::new(USER));
    let entry = local_entry(&store, "hi");
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(setup(&server)),
        auth,
        SyncConfig::default(),
    );

    let outcome = engine.sync().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(ref r) if r.pushed_created == 1));
    let stored = store.get_entry(entry.id).unwrap().unwrap();
    assert_eq!(stored.remote_id.as_deref(), Some("srv-1"));
    assert_eq!(stored.sync_status, Some(SyncStatus::Synced));
}
