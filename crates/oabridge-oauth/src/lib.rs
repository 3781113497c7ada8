pub mod client;
pub mod error;
pub mod pkce;
pub mod refresh;
pub mod txn;

pub use client::{TokenGrant, ZaloClient, ZaloConfig, ZaloProfile};
pub use error::ZaloError;
pub use refresh::AccountLocks;
pub use txn::{AuthTxn, AuthTxnStore, MemoryTxnStore};
