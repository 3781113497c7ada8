use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{error, info, warn};

use oabridge_types::events::GatewayEvent;
use oabridge_types::webhook::WebhookPayload;

use crate::state::AppState;

/// Zalo enforces a webhook response SLA and retry-storms on timeout,
/// so the acknowledgment never waits for persistence: the insert runs
/// in a detached task and its failures are logged, not surfaced.
pub async fn ingest(State(state): State<AppState>, body: String) -> impl IntoResponse {
    tokio::spawn(persist_event(state, body));
    (StatusCode::OK, "OK")
}

async fn persist_event(state: AppState, body: String) {
    // Event type and owning account are captured verbatim when the
    // payload parses; anything else is stored as-is for forensics.
    let parsed: Option<WebhookPayload> = serde_json::from_str(&body).ok();

    let (oa_id, event_type) = match &parsed {
        Some(p) => (
            p.owning_account().unwrap_or("unknown").to_string(),
            p.event_name.clone(),
        ),
        None => {
            warn!("Webhook body is not valid JSON, storing for forensics");
            ("unknown".to_string(), "malformed".to_string())
        }
    };

    info!("Webhook event {} for account {}", event_type, oa_id);

    let db = state.db.clone();
    let insert = {
        let oa_id = oa_id.clone();
        let event_type = event_type.clone();
        let body = body.clone();
        tokio::task::spawn_blocking(move || db.insert_event(&oa_id, &event_type, &body)).await
    };

    match insert {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            // Already acknowledged; log only, never retry here.
            error!("Could not persist webhook event for {}: {}", oa_id, e);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return;
        }
    }

    // Fire-and-forget push to live subscribers of this account.
    if parsed.is_some() {
        let payload = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        state.dispatcher.broadcast(GatewayEvent::EventReceived {
            oa_id,
            event_type,
            payload,
        });
    }
}
