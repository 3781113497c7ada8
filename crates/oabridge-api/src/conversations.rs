use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use oabridge_db::models::EventRow;
use oabridge_types::api::{ConversationSummary, EventRecord};

use crate::state::AppState;

/// Latest inbound message per sender, recomputed from the event log on
/// every read.
pub async fn get_conversations(
    State(state): State<AppState>,
    Path(oa_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_conversations(&oa_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Conversation query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let summaries = rows
        .into_iter()
        .map(|row| ConversationSummary {
            user_id: row.user_id,
            display_name: row.display_name,
            last_message_text: row.last_message_text,
            last_received_at: parse_sqlite_timestamp(&row.last_received_at),
        })
        .collect();

    Ok(Json(summaries))
}

/// Full bidirectional transcript with one user, chronological order.
pub async fn get_messages(
    State(state): State<AppState>,
    Path((oa_id, user_id)): Path<(String, String)>,
) -> Result<Json<Vec<EventRecord>>, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_messages(&oa_id, &user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Message query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(rows.into_iter().map(to_record).collect()))
}

fn to_record(row: EventRow) -> EventRecord {
    let payload = serde_json::from_str(&row.payload).unwrap_or_else(|_| {
        // Forensic rows with unparseable bodies come back as strings.
        serde_json::Value::String(row.payload.clone())
    });

    EventRecord {
        id: row.id,
        oa_id: row.oa_id,
        event_type: row.event_type,
        payload,
        received_at: parse_sqlite_timestamp(&row.received_at),
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC and convert, falling back through RFC 3339.
pub(crate) fn parse_sqlite_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt received_at '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        let ts = parse_sqlite_timestamp("2024-06-01 08:30:00");
        assert_eq!(ts.to_rfc3339(), "2024-06-01T08:30:00+00:00");

        let ts = parse_sqlite_timestamp("2024-06-01T08:30:00Z");
        assert_eq!(ts.to_rfc3339(), "2024-06-01T08:30:00+00:00");
    }
}
