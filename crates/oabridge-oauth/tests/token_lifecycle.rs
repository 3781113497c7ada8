use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oabridge_db::models::{KIND_OA, STATUS_NEEDS_REAUTH, STATUS_VERIFIED};
use oabridge_db::Database;
use oabridge_oauth::refresh::{ensure_valid_token, refresh_account, EXPIRY_LOOKAHEAD_SECS};
use oabridge_oauth::{AccountLocks, ZaloClient, ZaloConfig, ZaloError};

fn client_for(server: &MockServer) -> ZaloClient {
    let mut cfg = ZaloConfig::new(
        "app-1".into(),
        "sk-secret".into(),
        "https://bridge.example/oauth/zalo/callback".into(),
    );
    cfg.oauth_base = server.uri();
    cfg.api_base = server.uri();
    cfg.graph_base = server.uri();
    ZaloClient::new(cfg).unwrap()
}

fn seeded_db(oa_id: &str, expires_at: i64) -> Arc<Database> {
    let db = Database::open_in_memory().unwrap();
    db.upsert_account(oa_id, KIND_OA, Some("Shop"), None, STATUS_VERIFIED)
        .unwrap();
    db.upsert_credential(oa_id, "old-access", "rt-1", expires_at, None)
        .unwrap();
    Arc::new(db)
}

fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    // Zalo serves expires_in as a string in current API revisions
    json!({ "access_token": access, "refresh_token": refresh, "expires_in": "90000" })
}

#[tokio::test]
async fn oa_code_exchange_sends_verifier_and_secret_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v4/oa/access_token"))
        .and(header("secret_key", "sk-secret"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-9"))
        .and(body_string_contains("code_verifier=my-verifier"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-new", "rt-new")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let grant = client.exchange_oa_code("auth-code-9", "my-verifier").await.unwrap();

    assert_eq!(grant.access_token, "at-new");
    assert_eq!(grant.refresh_token, "rt-new");
    assert_eq!(grant.expires_in, 90000);
}

#[tokio::test]
async fn refresh_replaces_both_tokens_and_extends_expiry() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    let db = seeded_db("oa1", now + 60);

    Mock::given(method("POST"))
        .and(path("/v4/oa/access_token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2", "rt-2")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let locks = AccountLocks::new();
    let old_expiry = db.get_credential("oa1").unwrap().unwrap().expires_at;

    let did = refresh_account(&db, &client, &locks, "oa1").await.unwrap();
    assert!(did);

    let cred = db.get_credential("oa1").unwrap().unwrap();
    assert_eq!(cred.access_token, "at-2");
    assert_eq!(cred.refresh_token, "rt-2");
    assert!(cred.expires_at > old_expiry);
    // margin applied: strictly less than the raw server lifetime
    assert!(cred.expires_at < chrono::Utc::now().timestamp() + 90000);
}

#[tokio::test]
async fn second_refresh_uses_the_rotated_token() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    let db = seeded_db("oa1", now + 60);
    let client = client_for(&server);
    let locks = AccountLocks::new();

    Mock::given(method("POST"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2", "rt-2")))
        .expect(1)
        .mount(&server)
        .await;

    refresh_account(&db, &client, &locks, "oa1").await.unwrap();

    // Force the stored credential near expiry again, then verify the
    // next refresh presents rt-2, not the dead rt-1.
    db.upsert_credential("oa1", "at-2", "rt-2", now + 60, None).unwrap();

    Mock::given(method("POST"))
        .and(body_string_contains("refresh_token=rt-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-3", "rt-3")))
        .expect(1)
        .mount(&server)
        .await;

    refresh_account(&db, &client, &locks, "oa1").await.unwrap();
    let cred = db.get_credential("oa1").unwrap().unwrap();
    assert_eq!(cred.refresh_token, "rt-3");
}

#[tokio::test]
async fn concurrent_refreshes_for_one_account_collapse_to_one_call() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    let db = seeded_db("oa1", now + 60);

    Mock::given(method("POST"))
        .and(path("/v4/oa/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2", "rt-2")))
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(client_for(&server));
    let locks = AccountLocks::new();

    let (a, b) = tokio::join!(
        refresh_account(&db, &client, &locks, "oa1"),
        refresh_account(&db, &client, &locks, "oa1"),
    );

    // Exactly one performed the upstream call; the loser saw the fresh
    // expiry after taking the lock and did nothing.
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(outcomes.iter().filter(|did| **did).count(), 1);

    let cred = db.get_credential("oa1").unwrap().unwrap();
    assert_eq!(cred.refresh_token, "rt-2");
    assert!(cred.expires_at > now + EXPIRY_LOOKAHEAD_SECS);
}

#[tokio::test]
async fn invalid_grant_marks_account_for_reauth() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    let db = seeded_db("oa1", now + 60);

    Mock::given(method("POST"))
        .and(path("/v4/oa/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": -14014,
            "error_name": "invalid_grant",
            "error_description": "refresh token revoked",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let locks = AccountLocks::new();

    let err = refresh_account(&db, &client, &locks, "oa1").await.unwrap_err();
    assert!(matches!(err, ZaloError::InvalidGrant));

    let acc = db.get_account("oa1").unwrap().unwrap();
    assert_eq!(acc.status, STATUS_NEEDS_REAUTH);
    // tokens themselves are untouched on failure
    let cred = db.get_credential("oa1").unwrap().unwrap();
    assert_eq!(cred.refresh_token, "rt-1");
}

#[tokio::test]
async fn dead_refresh_token_is_never_presented_again() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    let db = seeded_db("oa1", now + 60);

    // Exactly one upstream call: the attempt that discovers the token
    // is dead. The flagged account must not produce a second one.
    Mock::given(method("POST"))
        .and(path("/v4/oa/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": -14014,
            "error_name": "invalid_grant",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let locks = AccountLocks::new();

    let err = refresh_account(&db, &client, &locks, "oa1").await.unwrap_err();
    assert!(matches!(err, ZaloError::InvalidGrant));
    assert_eq!(db.get_account("oa1").unwrap().unwrap().status, STATUS_NEEDS_REAUTH);

    // What the next scheduler tick would do for this account
    let err = refresh_account(&db, &client, &locks, "oa1").await.unwrap_err();
    assert!(matches!(err, ZaloError::InvalidGrant));

    // And the sweep itself no longer selects the credential at all
    let horizon = chrono::Utc::now().timestamp() + EXPIRY_LOOKAHEAD_SECS;
    assert!(db.list_credentials_expiring_before(horizon).unwrap().is_empty());
}

#[tokio::test]
async fn ensure_valid_token_without_any_credential_fails_fast() {
    let server = MockServer::start().await;
    let db = Arc::new(Database::open_in_memory().unwrap());
    let client = client_for(&server);
    let locks = AccountLocks::new();

    let err = ensure_valid_token(&db, &client, &locks, "ghost").await.unwrap_err();
    assert!(matches!(err, ZaloError::NoCredential(id) if id == "ghost"));
    // no mocks mounted and none hit: wiremock would fail on any request
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn ensure_valid_token_refreshes_an_expired_credential() {
    let server = MockServer::start().await;
    let now = chrono::Utc::now().timestamp();
    // already past expiry
    let db = seeded_db("oa1", now - 10);

    Mock::given(method("POST"))
        .and(path("/v4/oa/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-fresh", "rt-fresh")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let locks = AccountLocks::new();

    let token = ensure_valid_token(&db, &client, &locks, "oa1").await.unwrap();
    assert_eq!(token, "at-fresh");
}

#[tokio::test]
async fn send_text_checks_the_error_field_not_http_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3.0/oa/message/cs"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": -216,
            "message": "access token expired",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.send_text("at-1", "u1", "hello").await.unwrap_err();
    match err {
        ZaloError::Upstream { name, description } => {
            assert_eq!(name, "error_-216");
            assert_eq!(description.as_deref(), Some("access token expired"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn send_text_succeeds_on_error_zero() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3.0/oa/message/cs"))
        .and(body_string_contains("\"user_id\":\"u1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": 0,
            "message": "Success",
            "data": { "message_id": "m-1" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.send_text("at-1", "u1", "hello").await.unwrap();
}
