use std::sync::Arc;

use axum::http::StatusCode;

use oabridge_db::Database;
use oabridge_gateway::Dispatcher;
use oabridge_oauth::{AccountLocks, AuthTxnStore, ZaloClient, ZaloError};

use crate::session::SessionStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub zalo: Arc<ZaloClient>,
    pub txns: Arc<dyn AuthTxnStore>,
    pub locks: AccountLocks,
    pub dispatcher: Dispatcher,
    pub sessions: SessionStore,
}

/// Map the Zalo error taxonomy onto HTTP statuses for API callers.
pub fn error_status(err: &ZaloError) -> StatusCode {
    match err {
        ZaloError::Transport(_) => StatusCode::BAD_GATEWAY,
        ZaloError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        ZaloError::InvalidGrant => StatusCode::CONFLICT,
        ZaloError::InvalidState => StatusCode::BAD_REQUEST,
        ZaloError::ExpiredTransaction => StatusCode::GONE,
        ZaloError::NoCredential(_) => StatusCode::CONFLICT,
        ZaloError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
