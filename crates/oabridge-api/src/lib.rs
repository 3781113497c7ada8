pub mod accounts;
pub mod conversations;
pub mod oauth;
pub mod send;
pub mod session;
pub mod state;
pub mod sync;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

pub use state::{AppState, AppStateInner};

/// All HTTP routes. The WebSocket gateway route is wired separately in
/// the server binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        // OAuth connect flows
        .route("/connect/zalo", get(oauth::connect_oa))
        .route("/oauth/zalo/callback", get(oauth::oa_callback))
        .route("/connect/personal", get(oauth::connect_personal))
        .route("/oauth/personal/callback", get(oauth::personal_callback))
        .route("/connect/personal/qr", post(oauth::qr_start))
        .route("/connect/personal/qr/{state}", get(oauth::qr_poll))
        .route("/connect/personal/qr/{state}/confirm", post(oauth::qr_confirm))
        // Webhook ingestion
        .route("/zalo/webhook", post(webhook::ingest))
        // Conversation projection reads
        .route("/conversations/{oa_id}", get(conversations::get_conversations))
        .route("/messages/{oa_id}/{user_id}", get(conversations::get_messages))
        // Outbound send + backfill + dashboard
        .route("/api/send-message/{oa_id}", post(send::send_message))
        .route("/api/sync-messages/{oa_id}", post(sync::sync_messages))
        .route("/api/get-connected-accounts", get(accounts::get_connected_accounts))
        .with_state(state)
}
