use serde::{Deserialize, Serialize};

/// Events pushed to live dashboard subscribers over the WebSocket
/// gateway. Delivery is fire-and-forget: the event log is the source of
/// truth and a missed push is recovered on the next projection read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// A webhook event was persisted for this account.
    EventReceived {
        oa_id: String,
        event_type: String,
        payload: serde_json::Value,
    },

    /// The bridge sent an outbound message on behalf of this account.
    MessageSent {
        oa_id: String,
        user_id: String,
        text: String,
    },
}

impl GatewayEvent {
    /// Every gateway event is scoped to one account; subscribers only
    /// receive events for accounts they asked for.
    pub fn oa_id(&self) -> &str {
        match self {
            Self::EventReceived { oa_id, .. } => oa_id,
            Self::MessageSent { oa_id, .. } => oa_id,
        }
    }
}

/// Commands sent FROM the dashboard TO the server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Subscribe to events for specific accounts. Replaces any previous
    /// subscription set for this connection.
    Subscribe { oa_ids: Vec<String> },
}
