use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use axum::http::{header, HeaderMap};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "oabridge_sid";

/// Which accounts this browser has connected, split the way the
/// dashboard renders them.
#[derive(Debug, Default, Clone)]
pub struct Session {
    pub oa_ids: HashSet<String>,
    pub personal_ids: HashSet<String>,
}

/// In-memory per-browser session map. Entries live for the process
/// lifetime; the platform session layer owns real login/logout.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> String {
        let sid = Uuid::new_v4().to_string();
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sid.clone(), Session::default());
        sid
    }

    pub fn get(&self, sid: &str) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(sid)
            .cloned()
    }

    pub fn add_oa(&self, sid: &str, oa_id: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.entry(sid.to_string())
            .or_default()
            .oa_ids
            .insert(oa_id.to_string());
    }

    pub fn add_personal(&self, sid: &str, user_id: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.entry(sid.to_string())
            .or_default()
            .personal_ids
            .insert(user_id.to_string());
    }
}

/// Pull the session id out of the Cookie header, if any.
pub fn sid_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Existing session id or a fresh one. Returns (sid, set_cookie_value)
/// where the cookie value is Some only when a new session was created.
pub fn sid_or_create(store: &SessionStore, headers: &HeaderMap) -> (String, Option<String>) {
    if let Some(sid) = sid_from_headers(headers) {
        if store.get(&sid).is_some() {
            return (sid, None);
        }
    }
    let sid = store.create();
    let cookie = format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, sid);
    (sid, Some(cookie))
}
