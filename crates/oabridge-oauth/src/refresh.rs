use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use oabridge_db::models::{KIND_PERSONAL, STATUS_NEEDS_REAUTH};
use oabridge_db::Database;

use crate::client::{AccountKind, ZaloClient};
use crate::error::ZaloError;

/// Scheduler tick interval.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Each tick refreshes credentials expiring within this window.
pub const EXPIRY_LOOKAHEAD_SECS: i64 = 600;

/// Per-account refresh gates. Issuing a refresh invalidates the prior
/// refresh token, so two concurrent refreshes for one account would
/// race each other into invalid_grant. The async mutex is held across
/// the upstream call; distinct accounts proceed in parallel.
#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Refresh one account's credential under its per-account lock.
///
/// Returns true if a refresh actually ran, false if the credential was
/// already fresh when the lock was acquired (the loser of a race
/// becomes a no-op rather than burning the new refresh token).
pub async fn refresh_account(
    db: &Database,
    client: &ZaloClient,
    locks: &AccountLocks,
    account_id: &str,
) -> Result<bool, ZaloError> {
    let gate = locks.lock_for(account_id);
    let _held = gate.lock().await;

    let now = chrono::Utc::now().timestamp();
    let cred = db
        .get_credential(account_id)
        .map_err(|e| store_failure(account_id, e))?
        .ok_or_else(|| ZaloError::NoCredential(account_id.to_string()))?;

    // Re-check after taking the lock: a concurrent caller may have
    // already rotated the tokens.
    if cred.expires_at > now + EXPIRY_LOOKAHEAD_SECS {
        return Ok(false);
    }

    // A needs_reauth account holds a dead refresh token. invalid_grant
    // is terminal until the operator reconnects; never present the
    // token upstream again.
    let account = db
        .get_account(account_id)
        .map_err(|e| store_failure(account_id, e))?;
    if account
        .as_ref()
        .is_some_and(|a| a.status == STATUS_NEEDS_REAUTH)
    {
        return Err(ZaloError::InvalidGrant);
    }

    let kind = match &account {
        Some(a) if a.kind == KIND_PERSONAL => AccountKind::Personal,
        _ => AccountKind::Oa,
    };
    match client.refresh_token(kind, &cred.refresh_token).await {
        Ok(grant) => {
            db.upsert_credential(
                account_id,
                &grant.access_token,
                &grant.refresh_token,
                grant.expiry_unix(),
                grant.scope.as_deref(),
            )
            .map_err(|e| store_failure(account_id, e))?;
            info!("Refreshed credential for account {}", account_id);
            Ok(true)
        }
        Err(ZaloError::InvalidGrant) => {
            // Terminal: the operator must reconnect. Never retried.
            warn!("Refresh token for account {} is dead, marking needs_reauth", account_id);
            if let Err(e) = db.set_account_status(account_id, STATUS_NEEDS_REAUTH) {
                warn!("Could not mark account {} for re-auth: {}", account_id, e);
            }
            Err(ZaloError::InvalidGrant)
        }
        Err(e) => Err(e),
    }
}

/// Higher-level "get a usable access token": returns the stored token
/// if it is still valid, otherwise attempts one on-demand refresh
/// before giving up with `NoCredential`.
pub async fn ensure_valid_token(
    db: &Database,
    client: &ZaloClient,
    locks: &AccountLocks,
    account_id: &str,
) -> Result<String, ZaloError> {
    let now = chrono::Utc::now().timestamp();
    if let Some(cred) = db
        .get_valid_credential(account_id, now)
        .map_err(|e| store_failure(account_id, e))?
    {
        return Ok(cred.access_token);
    }

    // Expired but a refresh token may still work.
    if db
        .get_credential(account_id)
        .map_err(|e| store_failure(account_id, e))?
        .is_none()
    {
        return Err(ZaloError::NoCredential(account_id.to_string()));
    }

    refresh_account(db, client, locks, account_id).await?;

    let now = chrono::Utc::now().timestamp();
    db.get_valid_credential(account_id, now)
        .map_err(|e| store_failure(account_id, e))?
        .map(|c| c.access_token)
        .ok_or_else(|| ZaloError::NoCredential(account_id.to_string()))
}

/// Background sweep: every tick, refresh all credentials expiring
/// within the lookahead window, concurrently across accounts. One
/// account failing never delays or aborts the others, and the loop
/// itself never exits.
pub async fn run_refresh_loop(db: Arc<Database>, client: Arc<ZaloClient>, locks: AccountLocks) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);

    loop {
        interval.tick().await;

        match tick(&db, &client, &locks).await {
            Ok(0) => {}
            Ok(n) => info!("Refresh sweep rotated {} credential(s)", n),
            Err(e) => warn!("Refresh sweep failed: {}", e),
        }
    }
}

async fn tick(
    db: &Database,
    client: &ZaloClient,
    locks: &AccountLocks,
) -> anyhow::Result<usize> {
    let horizon = chrono::Utc::now().timestamp() + EXPIRY_LOOKAHEAD_SECS;
    let expiring = db.list_credentials_expiring_before(horizon)?;

    if expiring.is_empty() {
        return Ok(0);
    }

    let results = join_all(expiring.iter().map(|cred| {
        let account_id = cred.account_id.clone();
        async move {
            let outcome = refresh_account(db, client, locks, &account_id).await;
            (account_id, outcome)
        }
    }))
    .await;

    let mut refreshed = 0;
    for (account_id, outcome) in results {
        match outcome {
            Ok(true) => refreshed += 1,
            Ok(false) => {}
            // Already logged in refresh_account; isolation per account.
            Err(ZaloError::InvalidGrant) => {}
            Err(e) => warn!("Refresh failed for account {}: {}", account_id, e),
        }
    }

    Ok(refreshed)
}

fn store_failure(account_id: &str, err: anyhow::Error) -> ZaloError {
    warn!("Token store access failed for account {}: {}", account_id, err);
    ZaloError::Persistence(err)
}
