use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use oabridge_types::api::QrStatus;

use crate::client::ZaloProfile;
use crate::error::ZaloError;

/// Auth transactions live at most this long before the callback.
pub const TXN_TTL: Duration = Duration::from_secs(300);

/// Ephemeral state for one in-flight auth flow, keyed by the `state`
/// token handed to the browser.
#[derive(Debug, Clone)]
pub enum AuthTxn {
    /// Authorization-code + PKCE flow: holds the code verifier until
    /// the callback exchanges it.
    Pkce { verifier: String },
    /// Plain authorization-code flow (personal accounts): the state is
    /// only a CSRF token, there is no verifier.
    Plain,
    /// QR login flow: tracks scan progress and the captured profile.
    Qr {
        status: QrStatus,
        profile: Option<ZaloProfile>,
    },
}

/// Consume-once transaction store. The in-memory backing is the
/// default; the trait exists so a shared cache can replace it when the
/// bridge runs as more than one process.
pub trait AuthTxnStore: Send + Sync {
    fn put(&self, state: String, txn: AuthTxn);

    /// Atomic lookup + delete. A second `take` of the same state fails
    /// with `InvalidState`; an entry past its TTL fails with
    /// `ExpiredTransaction`.
    fn take(&self, state: &str) -> Result<AuthTxn, ZaloError>;

    /// Non-consuming read, used by the QR poll endpoint while the scan
    /// is still pending.
    fn peek(&self, state: &str) -> Option<AuthTxn>;

    /// Overwrite an existing live entry. Returns false if the state is
    /// unknown or expired.
    fn update(&self, state: &str, txn: AuthTxn) -> bool;
}

struct Entry {
    txn: AuthTxn,
    created_at: Instant,
}

impl Entry {
    fn expired(&self) -> bool {
        self.created_at.elapsed() >= TXN_TTL
    }
}

/// Mutex-guarded map. Every operation holds the lock for the whole
/// lookup, so consume-once is a single indivisible step.
#[derive(Default)]
pub struct MemoryTxnStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryTxnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind an entry's creation time so tests can exercise expiry
    /// without waiting out the TTL.
    #[cfg(test)]
    fn backdate(&self, state: &str, age: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(state) {
            entry.created_at = Instant::now() - age;
        }
    }
}

impl AuthTxnStore for MemoryTxnStore {
    fn put(&self, state: String, txn: AuthTxn) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, e| !e.expired());
        entries.insert(
            state,
            Entry {
                txn,
                created_at: Instant::now(),
            },
        );
    }

    fn take(&self, state: &str) -> Result<AuthTxn, ZaloError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.remove(state) {
            Some(e) if e.expired() => Err(ZaloError::ExpiredTransaction),
            Some(e) => Ok(e.txn),
            None => Err(ZaloError::InvalidState),
        }
    }

    fn peek(&self, state: &str) -> Option<AuthTxn> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(state)
            .filter(|e| !e.expired())
            .map(|e| e.txn.clone())
    }

    fn update(&self, state: &str, txn: AuthTxn) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(state) {
            Some(e) if !e.expired() => {
                e.txn = txn;
                true
            }
            _ => false,
        }
    }
}
