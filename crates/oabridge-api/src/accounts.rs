use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use tracing::error;

use oabridge_db::models::KIND_PERSONAL;
use oabridge_types::api::{AccountCard, ConnectedAccounts};

use crate::session;
use crate::state::AppState;

/// Accounts this browser session has connected, split into OA and
/// personal maps the way the dashboard renders them.
pub async fn get_connected_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConnectedAccounts>, StatusCode> {
    let Some(session) = session::sid_from_headers(&headers)
        .and_then(|sid| state.sessions.get(&sid))
    else {
        return Ok(Json(ConnectedAccounts::default()));
    };

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_accounts())
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Account listing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let mut connected = ConnectedAccounts::default();
    for row in rows {
        let card = AccountCard {
            name: row.name.clone().unwrap_or_else(|| row.id.clone()),
            avatar: row.avatar.clone().unwrap_or_default(),
        };

        if row.kind == KIND_PERSONAL {
            if session.personal_ids.contains(&row.id) {
                connected.personal.insert(row.id, card);
            }
        } else if session.oa_ids.contains(&row.id) {
            connected.oas.insert(row.id, card);
        }
    }

    Ok(Json(connected))
}
