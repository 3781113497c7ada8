use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::DateTime;
use serde_json::Value;
use tracing::{info, warn};

use oabridge_db::Database;
use oabridge_oauth::refresh::ensure_valid_token;
use oabridge_types::api::{SyncMessagesRequest, SyncMessagesResponse};
use oabridge_types::webhook::EventKind;

use crate::state::{error_status, AppState};

/// Pause between history requests so the backfill stays under Zalo's
/// rate limits.
const CONVERSATION_DELAY: Duration = Duration::from_millis(500);
const PAGE_DELAY: Duration = Duration::from_secs(1);

/// History backfill: page through the OA's conversations on the Zalo
/// API and replay each fetched message into the event log as a
/// synthetic webhook event, skipping messages already stored.
pub async fn sync_messages(
    State(state): State<AppState>,
    Path(oa_id): Path<String>,
    Json(req): Json<SyncMessagesRequest>,
) -> Result<Json<SyncMessagesResponse>, (StatusCode, String)> {
    let token = ensure_valid_token(&state.db, &state.zalo, &state.locks, &oa_id)
        .await
        .map_err(|e| (error_status(&e), e.to_string()))?;

    let limit = req.limit.clamp(1, 50);
    let mut imported = 0usize;
    let mut offset = 0u32;

    loop {
        let conversations = state
            .zalo
            .list_conversations(&token, offset, limit)
            .await
            .map_err(|e| (error_status(&e), e.to_string()))?;

        if conversations.is_empty() {
            break;
        }

        for conversation in &conversations {
            let Some(user_id) = conversation.get("user_id").and_then(Value::as_str) else {
                continue;
            };

            // One bad conversation never aborts the whole backfill.
            match state
                .zalo
                .get_conversation_messages(&token, user_id, 0, 50)
                .await
            {
                Ok(messages) => {
                    let db = state.db.clone();
                    let oa = oa_id.clone();
                    let user = user_id.to_string();
                    let count = tokio::task::spawn_blocking(move || {
                        let mut stored = 0usize;
                        for message in messages {
                            match import_message(&db, &oa, &user, &message) {
                                Ok(true) => stored += 1,
                                Ok(false) => {}
                                Err(e) => warn!("Could not import message: {}", e),
                            }
                        }
                        stored
                    })
                    .await
                    .unwrap_or(0);
                    imported += count;
                }
                Err(e) => warn!("History fetch for user {} failed: {}", user_id, e),
            }

            tokio::time::sleep(CONVERSATION_DELAY).await;
        }

        if conversations.len() < limit as usize {
            break;
        }
        offset += limit;
        tokio::time::sleep(PAGE_DELAY).await;
    }

    info!("Backfill for OA {} imported {} message(s)", oa_id, imported);

    Ok(Json(SyncMessagesResponse { success: true, imported }))
}

/// Convert one Zalo history message into a synthetic webhook event and
/// append it, unless its msg_id is already in the log. Returns whether
/// a row was written.
fn import_message(db: &Database, oa_id: &str, user_id: &str, message: &Value) -> anyhow::Result<bool> {
    if let Some(msg_id) = message.get("msg_id").and_then(Value::as_str) {
        if db.has_event_with_msg_id(msg_id)? {
            return Ok(false);
        }
    }

    let from_id = message.get("from_id").and_then(Value::as_str).unwrap_or(user_id);
    let outbound = from_id == oa_id;
    let kind = if outbound { EventKind::OaSendText } else { EventKind::UserSendText };

    let text = message
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| message.get("text").and_then(Value::as_str));

    let payload = serde_json::json!({
        "event_name": kind.as_str(),
        "app_id": oa_id,
        "oa_id": oa_id,
        "user_id_by_app": user_id,
        "sender": {
            "id": if outbound { oa_id } else { user_id },
            "display_name": message.get("from_name").and_then(Value::as_str).unwrap_or("Unknown User"),
        },
        "recipient": { "id": if outbound { user_id } else { oa_id } },
        "message": {
            "msg_id": message.get("msg_id").and_then(Value::as_str),
            "text": text,
            "attachments": message.get("attachments").cloned().unwrap_or(Value::Array(vec![])),
        },
        "timestamp": message.get("time").cloned(),
    });

    // Keep the original delivery time so backfilled history interleaves
    // correctly with live events.
    let received_at = message
        .get("time")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string());

    match received_at {
        Some(ts) => db.insert_event_at(oa_id, kind.as_str(), &payload.to_string(), &ts)?,
        None => db.insert_event(oa_id, kind.as_str(), &payload.to_string())?,
    };

    Ok(true)
}
