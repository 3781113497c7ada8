use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info, warn};

use oabridge_db::models::{KIND_OA, KIND_PERSONAL, STATUS_VERIFIED};
use oabridge_oauth::txn::TXN_TTL;
use oabridge_oauth::{pkce, AuthTxn, ZaloProfile};
use oabridge_types::api::{QrPollResponse, QrStartResponse, QrStatus};

use crate::session;
use crate::state::AppState;

// -- OA flow (authorization code + PKCE) --

/// Start the OA connect flow: mint state + verifier, stash the
/// verifier, bounce the browser to Zalo.
pub async fn connect_oa(State(state): State<AppState>) -> Result<Redirect, StatusCode> {
    let csrf = pkce::new_state();
    let verifier = pkce::new_verifier();
    let challenge = pkce::challenge(&verifier);

    state.txns.put(csrf.clone(), AuthTxn::Pkce { verifier });

    let url = state.zalo.oa_authorize_url(&csrf, &challenge).map_err(|e| {
        error!("Could not build authorize URL: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
pub struct OaCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub oa_id: Option<String>,
}

pub async fn oa_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OaCallbackQuery>,
) -> Response {
    let (Some(code), Some(csrf), Some(oa_id)) = (query.code, query.state, query.oa_id) else {
        return error_page(StatusCode::BAD_REQUEST, "Missing code, state or oa_id in callback.");
    };

    // Consume-once: replaying the same state fails here.
    let verifier = match state.txns.take(&csrf) {
        Ok(AuthTxn::Pkce { verifier }) => verifier,
        Ok(_) => return error_page(StatusCode::BAD_REQUEST, "State belongs to a different flow."),
        Err(e) => {
            warn!("OA callback with bad state: {}", e);
            return error_page(StatusCode::BAD_REQUEST, "Invalid or expired state. Restart the connect flow.");
        }
    };

    let grant = match state.zalo.exchange_oa_code(&code, &verifier).await {
        Ok(g) => g,
        Err(e) => {
            error!("OA token exchange failed: {}", e);
            return error_page(StatusCode::BAD_GATEWAY, "Token exchange with Zalo failed.");
        }
    };

    let db = state.db.clone();
    let id = oa_id.clone();
    let stored = tokio::task::spawn_blocking(move || {
        db.upsert_account(&id, KIND_OA, None, None, STATUS_VERIFIED)?;
        db.upsert_credential(
            &id,
            &grant.access_token,
            &grant.refresh_token,
            grant.expiry_unix(),
            grant.scope.as_deref(),
        )
    })
    .await;

    match stored {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Could not persist OA credential: {}", e);
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Could not store the new credential.");
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Could not store the new credential.");
        }
    }

    info!("Connected OA {}", oa_id);

    let (sid, cookie) = session::sid_or_create(&state.sessions, &headers);
    state.sessions.add_oa(&sid, &oa_id);

    success_page(cookie, "Zalo OA connected. You can close this window.")
}

// -- Personal flow (plain authorization code) --

pub async fn connect_personal(State(state): State<AppState>) -> Result<Redirect, StatusCode> {
    let csrf = pkce::new_state();
    state.txns.put(csrf.clone(), AuthTxn::Plain);

    let url = state.zalo.personal_authorize_url(&csrf).map_err(|e| {
        error!("Could not build authorize URL: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
pub struct PersonalCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

pub async fn personal_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PersonalCallbackQuery>,
) -> Response {
    let (Some(code), Some(csrf)) = (query.code, query.state) else {
        return error_page(StatusCode::BAD_REQUEST, "Missing code or state in callback.");
    };

    match state.txns.take(&csrf) {
        Ok(AuthTxn::Plain) => {}
        Ok(_) => return error_page(StatusCode::BAD_REQUEST, "State belongs to a different flow."),
        Err(e) => {
            warn!("Personal callback with bad state: {}", e);
            return error_page(StatusCode::BAD_REQUEST, "Invalid or expired state. Restart the connect flow.");
        }
    }

    let grant = match state.zalo.exchange_personal_code(&code).await {
        Ok(g) => g,
        Err(e) => {
            error!("Personal token exchange failed: {}", e);
            return error_page(StatusCode::BAD_GATEWAY, "Token exchange with Zalo failed.");
        }
    };

    // Profile fetch fills the dashboard card; the connection still
    // counts if it fails.
    let profile = match state.zalo.fetch_profile(&grant.access_token).await {
        Ok(p) => p,
        Err(e) => {
            warn!("Profile fetch failed after personal exchange: {}", e);
            return error_page(StatusCode::BAD_GATEWAY, "Could not load the Zalo profile.");
        }
    };

    let db = state.db.clone();
    let prof = profile.clone();
    let stored = tokio::task::spawn_blocking(move || {
        db.upsert_account(
            &prof.id,
            KIND_PERSONAL,
            prof.name.as_deref(),
            prof.avatar_url(),
            STATUS_VERIFIED,
        )?;
        db.upsert_credential(
            &prof.id,
            &grant.access_token,
            &grant.refresh_token,
            grant.expiry_unix(),
            grant.scope.as_deref(),
        )
    })
    .await;

    match stored {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Could not persist personal credential: {}", e);
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Could not store the new credential.");
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Could not store the new credential.");
        }
    }

    info!("Connected personal account {}", profile.id);

    let (sid, cookie) = session::sid_or_create(&state.sessions, &headers);
    state.sessions.add_personal(&sid, &profile.id);

    success_page(cookie, "Zalo personal account connected. You can close this window.")
}

// -- QR login flow --

/// Open a QR transaction. The dashboard renders the state as a QR code;
/// the phone confirms it via the confirm endpoint within the TTL.
pub async fn qr_start(State(state): State<AppState>) -> Json<QrStartResponse> {
    let csrf = pkce::new_state();
    state.txns.put(
        csrf.clone(),
        AuthTxn::Qr { status: QrStatus::Pending, profile: None },
    );

    Json(QrStartResponse {
        state: csrf,
        expires_in: TXN_TTL.as_secs(),
    })
}

/// Called with the scanned profile once the phone approves the login.
pub async fn qr_confirm(
    State(state): State<AppState>,
    Path(csrf): Path<String>,
    Json(profile): Json<ZaloProfile>,
) -> StatusCode {
    let updated = state.txns.update(
        &csrf,
        AuthTxn::Qr {
            status: QrStatus::Confirmed,
            profile: Some(profile),
        },
    );

    if updated {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Dashboard polls until Confirmed; the confirming poll consumes the
/// transaction and registers the account.
pub async fn qr_poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(csrf): Path<String>,
) -> Response {
    match state.txns.peek(&csrf) {
        Some(AuthTxn::Qr { status: QrStatus::Pending, .. }) => {
            return Json(QrPollResponse { status: QrStatus::Pending, user_id: None })
                .into_response();
        }
        Some(AuthTxn::Qr { status: QrStatus::Confirmed, .. }) => {}
        Some(_) => return StatusCode::BAD_REQUEST.into_response(),
        None => return StatusCode::GONE.into_response(),
    }

    // Confirmed: consume exactly once.
    let profile = match state.txns.take(&csrf) {
        Ok(AuthTxn::Qr { profile: Some(p), .. }) => p,
        Ok(_) => return StatusCode::BAD_REQUEST.into_response(),
        Err(e) => {
            warn!("QR poll lost the race for {}: {}", csrf, e);
            return StatusCode::GONE.into_response();
        }
    };

    let db = state.db.clone();
    let prof = profile.clone();
    let stored = tokio::task::spawn_blocking(move || {
        db.upsert_account(
            &prof.id,
            KIND_PERSONAL,
            prof.name.as_deref(),
            prof.avatar_url(),
            STATUS_VERIFIED,
        )
    })
    .await;

    match stored {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Could not persist QR-connected account: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let (sid, cookie) = session::sid_or_create(&state.sessions, &headers);
    state.sessions.add_personal(&sid, &profile.id);

    let mut response = Json(QrPollResponse {
        status: QrStatus::Confirmed,
        user_id: Some(profile.id),
    })
    .into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

// -- Shared response helpers --

fn error_page(status: StatusCode, message: &str) -> Response {
    (
        status,
        Html(format!(
            "<h1>Connection failed</h1><p>{}</p>",
            message
        )),
    )
        .into_response()
}

fn success_page(cookie: Option<String>, message: &str) -> Response {
    let mut response = Html(format!("<h1>Success</h1><p>{}</p>", message)).into_response();
    if let Some(cookie) = cookie {
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}
