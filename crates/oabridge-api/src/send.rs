use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{error, info, warn};

use oabridge_oauth::refresh::ensure_valid_token;
use oabridge_types::api::{SendTextRequest, SendTextResponse};
use oabridge_types::events::GatewayEvent;
use oabridge_types::webhook::{synthetic_outbound, EventKind};

use crate::state::{error_status, AppState};

/// Send a text message on behalf of an OA. Fails fast without any
/// external call when no usable credential exists; a successful send is
/// mirrored into the event log so the transcript shows both directions.
pub async fn send_message(
    State(state): State<AppState>,
    Path(oa_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> Result<Json<SendTextResponse>, (StatusCode, String)> {
    let token = ensure_valid_token(&state.db, &state.zalo, &state.locks, &oa_id)
        .await
        .map_err(|e| {
            warn!("No usable token to send for {}: {}", oa_id, e);
            (error_status(&e), e.to_string())
        })?;

    state
        .zalo
        .send_text(&token, &req.user_id, &req.text)
        .await
        .map_err(|e| {
            error!("Send to {} via {} failed: {}", req.user_id, oa_id, e);
            // Upstream detail preserved for the caller
            (error_status(&e), e.to_string())
        })?;

    info!("Sent message to {} via OA {}", req.user_id, oa_id);

    // Best-effort: a failed log write must not turn the successful
    // send into a reported failure.
    let payload = synthetic_outbound(&oa_id, &req.user_id, &req.text);
    let db = state.db.clone();
    let oa = oa_id.clone();
    let logged = tokio::task::spawn_blocking(move || {
        db.insert_event(&oa, EventKind::OaSendText.as_str(), &payload.to_string())
    })
    .await;

    match logged {
        Ok(Ok(_)) => {
            state.dispatcher.broadcast(GatewayEvent::MessageSent {
                oa_id,
                user_id: req.user_id,
                text: req.text,
            });
        }
        Ok(Err(e)) => warn!("Could not log outbound message for {}: {}", oa_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }

    Ok(Json(SendTextResponse { success: true }))
}
