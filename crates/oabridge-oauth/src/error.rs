use thiserror::Error;

/// Failure taxonomy for everything that talks to Zalo or to the
/// ephemeral auth-transaction store.
#[derive(Debug, Error)]
pub enum ZaloError {
    /// Network or timeout failure reaching Zalo. Retryable.
    #[error("transport error talking to Zalo: {0}")]
    Transport(#[from] reqwest::Error),

    /// Zalo returned a structured error body. Not retryable except for
    /// token refresh, which waits for the next scheduler tick.
    #[error("Zalo rejected the request: {name}")]
    Upstream {
        name: String,
        description: Option<String>,
    },

    /// The stored refresh token has been invalidated. Terminal for this
    /// credential; the operator must reconnect the account.
    #[error("refresh token is no longer valid")]
    InvalidGrant,

    /// OAuth callback presented an unknown or already-consumed state.
    #[error("unknown or replayed OAuth state")]
    InvalidState,

    /// The auth transaction outlived its TTL before the callback.
    #[error("auth transaction expired, restart the flow")]
    ExpiredTransaction,

    /// No non-expired credential is stored for the account.
    #[error("no valid credential for account {0}")]
    NoCredential(String),

    /// Token store read/write failed. Logged at the site; never
    /// surfaced to the webhook acknowledgment path.
    #[error("token store failure: {0}")]
    Persistence(anyhow::Error),
}

impl ZaloError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
