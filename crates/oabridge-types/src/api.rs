use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Conversations --

/// One row of the conversation list: the newest inbound message per
/// distinct sender, derived from the event log on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub user_id: String,
    pub display_name: Option<String>,
    pub last_message_text: Option<String>,
    pub last_received_at: DateTime<Utc>,
}

/// A raw event row as served by the message-history API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub oa_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

// -- Outbound send --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendTextRequest {
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendTextResponse {
    pub success: bool,
}

// -- Accounts / dashboard --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCard {
    pub name: String,
    pub avatar: String,
}

/// Shape of `GET /api/get-connected-accounts`: the operator's connected
/// accounts split into OA and personal maps, keyed by platform id.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConnectedAccounts {
    pub oas: HashMap<String, AccountCard>,
    pub personal: HashMap<String, AccountCard>,
}

// -- Message backfill --

#[derive(Debug, Deserialize)]
pub struct SyncMessagesRequest {
    #[serde(default = "default_sync_limit")]
    pub limit: u32,
}

fn default_sync_limit() -> u32 {
    20
}

#[derive(Debug, Serialize)]
pub struct SyncMessagesResponse {
    pub success: bool,
    pub imported: usize,
}

// -- QR login flow --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QrStatus {
    Pending,
    Confirmed,
}

#[derive(Debug, Serialize)]
pub struct QrStartResponse {
    pub state: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct QrPollResponse {
    pub status: QrStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}
