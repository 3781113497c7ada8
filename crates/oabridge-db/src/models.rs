/// Account status values. Stored as plain text; `needs_reauth` is set
/// when a refresh fails with `invalid_grant` and cleared on the next
/// successful OAuth completion.
pub const STATUS_VERIFIED: &str = "verified";
pub const STATUS_NEEDS_REAUTH: &str = "needs_reauth";

pub const KIND_OA: &str = "oa";
pub const KIND_PERSONAL: &str = "personal";

#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: String,
    pub kind: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub status: String,
    pub connected_at: String,
}

#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub account_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds, already reduced by the refresh safety margin.
    pub expires_at: i64,
    pub scope: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub oa_id: String,
    pub event_type: String,
    pub payload: String,
    pub received_at: String,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub user_id: String,
    pub display_name: Option<String>,
    pub last_message_text: Option<String>,
    pub last_received_at: String,
}
