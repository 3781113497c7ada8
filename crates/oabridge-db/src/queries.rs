use crate::models::{AccountRow, ConversationRow, CredentialRow, EventRow, STATUS_NEEDS_REAUTH};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Accounts --

    pub fn upsert_account(
        &self,
        id: &str,
        kind: &str,
        name: Option<&str>,
        avatar: Option<&str>,
        status: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (id, kind, name, avatar, status) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO UPDATE SET
                    kind = excluded.kind,
                    name = COALESCE(excluded.name, accounts.name),
                    avatar = COALESCE(excluded.avatar, accounts.avatar),
                    status = excluded.status",
                rusqlite::params![id, kind, name, avatar, status],
            )?;
            Ok(())
        })
    }

    pub fn set_account_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE accounts SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status],
            )?;
            Ok(())
        })
    }

    pub fn get_account(&self, id: &str) -> Result<Option<AccountRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, kind, name, avatar, status, connected_at FROM accounts WHERE id = ?1",
                    [id],
                    map_account,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_accounts(&self) -> Result<Vec<AccountRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, name, avatar, status, connected_at FROM accounts
                 ORDER BY connected_at ASC",
            )?;
            let rows = stmt
                .query_map([], map_account)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Credentials --

    /// Full replace: both tokens and expiry change together. The old
    /// refresh token is unusable the moment this commits.
    pub fn upsert_credential(
        &self,
        account_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
        scope: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials (account_id, access_token, refresh_token, expires_at, scope)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (account_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    scope = excluded.scope",
                rusqlite::params![account_id, access_token, refresh_token, expires_at, scope],
            )?;
            Ok(())
        })
    }

    /// Raw lookup, expiry not checked. The refresh path needs this to
    /// read the refresh token of an already-expired credential.
    pub fn get_credential(&self, account_id: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT account_id, access_token, refresh_token, expires_at, scope
                     FROM credentials WHERE account_id = ?1",
                    [account_id],
                    map_credential,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Only returns a credential whose expiry is strictly after `now`.
    pub fn get_valid_credential(&self, account_id: &str, now: i64) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT account_id, access_token, refresh_token, expires_at, scope
                     FROM credentials WHERE account_id = ?1 AND expires_at > ?2",
                    rusqlite::params![account_id, now],
                    map_credential,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Credentials the refresh sweep should pick up. Accounts flagged
    /// `needs_reauth` hold a dead refresh token; retrying them upstream
    /// is pointless until the operator reconnects, so they are excluded
    /// here.
    pub fn list_credentials_expiring_before(&self, ts: i64) -> Result<Vec<CredentialRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.account_id, c.access_token, c.refresh_token, c.expires_at, c.scope
                 FROM credentials c
                 JOIN accounts a ON a.id = c.account_id
                 WHERE c.expires_at < ?1 AND a.status != ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![ts, STATUS_NEEDS_REAUTH], map_credential)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Event log --

    /// Append one immutable event row. `received_at` is assigned by the
    /// database at insert time. Returns the new row id.
    pub fn insert_event(&self, oa_id: &str, event_type: &str, payload: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webhook_events (oa_id, event_type, payload) VALUES (?1, ?2, ?3)",
                rusqlite::params![oa_id, event_type, payload],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Append with an explicit timestamp, used by the message backfill
    /// to preserve the original delivery time.
    pub fn insert_event_at(
        &self,
        oa_id: &str,
        event_type: &str,
        payload: &str,
        received_at: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webhook_events (oa_id, event_type, payload, received_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![oa_id, event_type, payload, received_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Backfill dedup: has any event with this Zalo message id already
    /// been stored?
    pub fn has_event_with_msg_id(&self, msg_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM webhook_events
                     WHERE json_valid(payload)
                       AND json_extract(payload, '$.message.msg_id') = ?1
                     LIMIT 1",
                    [msg_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Conversation projection --

    /// Newest inbound message per distinct sender, recency descending.
    /// Ties on received_at break on row id, which follows insert order.
    pub fn list_conversations(&self, oa_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| query_conversations(conn, oa_id))
    }

    /// Full bidirectional transcript with one user, chronological.
    pub fn list_messages(&self, oa_id: &str, user_id: &str) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| query_messages(conn, oa_id, user_id))
    }
}

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok(AccountRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        avatar: row.get(3)?,
        status: row.get(4)?,
        connected_at: row.get(5)?,
    })
}

fn map_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRow> {
    Ok(CredentialRow {
        account_id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        expires_at: row.get(3)?,
        scope: row.get(4)?,
    })
}

fn query_conversations(conn: &Connection, oa_id: &str) -> Result<Vec<ConversationRow>> {
    // All seven inbound event names share the user_send_ prefix;
    // oa_send_text, follow and unfollow never match. The json_valid
    // guard keeps malformed forensic rows from aborting the query.
    let mut stmt = conn.prepare(
        "SELECT json_extract(e.payload, '$.sender.id'),
                json_extract(e.payload, '$.sender.display_name'),
                json_extract(e.payload, '$.message.text'),
                e.received_at
         FROM webhook_events e
         WHERE e.oa_id = ?1
           AND e.event_type LIKE 'user_send_%'
           AND json_valid(e.payload)
           AND json_extract(e.payload, '$.sender.id') IS NOT NULL
           AND e.id = (
               SELECT e2.id FROM webhook_events e2
               WHERE e2.oa_id = e.oa_id
                 AND e2.event_type LIKE 'user_send_%'
                 AND json_valid(e2.payload)
                 AND json_extract(e2.payload, '$.sender.id') =
                     json_extract(e.payload, '$.sender.id')
               ORDER BY e2.received_at DESC, e2.id DESC
               LIMIT 1
           )
         ORDER BY e.received_at DESC, e.id DESC",
    )?;

    let rows = stmt
        .query_map([oa_id], |row| {
            Ok(ConversationRow {
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                last_message_text: row.get(2)?,
                last_received_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_messages(conn: &Connection, oa_id: &str, user_id: &str) -> Result<Vec<EventRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, oa_id, event_type, payload, received_at
         FROM webhook_events
         WHERE oa_id = ?1
           AND json_valid(payload)
           AND (json_extract(payload, '$.sender.id') = ?2
                OR json_extract(payload, '$.recipient.id') = ?2)
         ORDER BY received_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![oa_id, user_id], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                oa_id: row.get(1)?,
                event_type: row.get(2)?,
                payload: row.get(3)?,
                received_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KIND_OA, STATUS_NEEDS_REAUTH, STATUS_VERIFIED};

    fn inbound(oa: &str, user: &str, text: &str) -> String {
        serde_json::json!({
            "event_name": "user_send_text",
            "oa_id": oa,
            "sender": { "id": user, "display_name": format!("User {}", user) },
            "recipient": { "id": oa },
            "message": { "text": text },
        })
        .to_string()
    }

    fn outbound(oa: &str, user: &str, text: &str) -> String {
        serde_json::json!({
            "event_name": "oa_send_text",
            "oa_id": oa,
            "sender": { "id": oa },
            "recipient": { "id": user },
            "message": { "text": text },
        })
        .to_string()
    }

    #[test]
    fn credential_upsert_replaces_all_fields() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_account("oa1", KIND_OA, Some("Shop"), None, STATUS_VERIFIED)
            .unwrap();

        db.upsert_credential("oa1", "at1", "rt1", 1000, None).unwrap();
        db.upsert_credential("oa1", "at2", "rt2", 2000, Some("oa.message"))
            .unwrap();

        let cred = db.get_credential("oa1").unwrap().unwrap();
        assert_eq!(cred.access_token, "at2");
        assert_eq!(cred.refresh_token, "rt2");
        assert_eq!(cred.expires_at, 2000);
        assert_eq!(cred.scope.as_deref(), Some("oa.message"));
    }

    #[test]
    fn valid_credential_requires_strictly_later_expiry() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_account("oa1", KIND_OA, None, None, STATUS_VERIFIED).unwrap();
        db.upsert_credential("oa1", "at", "rt", 500, None).unwrap();

        assert!(db.get_valid_credential("oa1", 499).unwrap().is_some());
        // expiry == now is already stale
        assert!(db.get_valid_credential("oa1", 500).unwrap().is_none());
        assert!(db.get_valid_credential("oa1", 501).unwrap().is_none());
        // raw get ignores expiry so the refresh path can still read it
        assert!(db.get_credential("oa1").unwrap().is_some());
    }

    #[test]
    fn expiring_before_finds_only_near_expiry_credentials() {
        let db = Database::open_in_memory().unwrap();
        for (id, exp) in [("oa1", 100i64), ("oa2", 900), ("oa3", 2000)] {
            db.upsert_account(id, KIND_OA, None, None, STATUS_VERIFIED).unwrap();
            db.upsert_credential(id, "at", "rt", exp, None).unwrap();
        }

        let expiring = db.list_credentials_expiring_before(1000).unwrap();
        let mut ids: Vec<_> = expiring.iter().map(|c| c.account_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["oa1", "oa2"]);
    }

    #[test]
    fn expiring_before_skips_reauth_flagged_accounts() {
        let db = Database::open_in_memory().unwrap();
        for id in ["oa1", "oa2"] {
            db.upsert_account(id, KIND_OA, None, None, STATUS_VERIFIED).unwrap();
            db.upsert_credential(id, "at", "rt", 100, None).unwrap();
        }
        db.set_account_status("oa2", STATUS_NEEDS_REAUTH).unwrap();

        let expiring = db.list_credentials_expiring_before(1000).unwrap();
        let ids: Vec<_> = expiring.iter().map(|c| c.account_id.as_str()).collect();
        assert_eq!(ids, vec!["oa1"]);

        // reconnecting resets the status and the sweep picks it up again
        db.upsert_account("oa2", KIND_OA, None, None, STATUS_VERIFIED).unwrap();
        assert_eq!(db.list_credentials_expiring_before(1000).unwrap().len(), 2);
    }

    #[test]
    fn account_status_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_account("oa1", KIND_OA, Some("Shop"), None, STATUS_VERIFIED).unwrap();
        db.set_account_status("oa1", STATUS_NEEDS_REAUTH).unwrap();

        let acc = db.get_account("oa1").unwrap().unwrap();
        assert_eq!(acc.status, STATUS_NEEDS_REAUTH);
        // re-auth keeps the stored name when none is supplied
        db.upsert_account("oa1", KIND_OA, None, None, STATUS_VERIFIED).unwrap();
        let acc = db.get_account("oa1").unwrap().unwrap();
        assert_eq!(acc.name.as_deref(), Some("Shop"));
        assert_eq!(acc.status, STATUS_VERIFIED);
    }

    #[test]
    fn conversations_show_latest_inbound_per_sender() {
        let db = Database::open_in_memory().unwrap();

        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u1", "first"), "2024-01-01 10:00:00").unwrap();
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u1", "second"), "2024-01-01 10:05:00").unwrap();
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u2", "hello"), "2024-01-01 10:02:00").unwrap();
        // outbound and lifecycle events never produce conversation rows
        db.insert_event_at("oaX", "oa_send_text", &outbound("oaX", "u1", "reply"), "2024-01-01 10:06:00").unwrap();
        db.insert_event_at("oaX", "follow", r#"{"event_name":"follow","follower":{"id":"u3"}}"#, "2024-01-01 10:07:00").unwrap();
        // other accounts are invisible
        db.insert_event_at("oaY", "user_send_text", &inbound("oaY", "u9", "other"), "2024-01-01 10:08:00").unwrap();

        let convs = db.list_conversations("oaX").unwrap();
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].user_id, "u1");
        assert_eq!(convs[0].last_message_text.as_deref(), Some("second"));
        assert_eq!(convs[1].user_id, "u2");
        assert_eq!(convs[1].last_message_text.as_deref(), Some("hello"));
    }

    #[test]
    fn conversations_tie_break_on_insert_order() {
        let db = Database::open_in_memory().unwrap();
        let ts = "2024-01-01 12:00:00";
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u1", "a"), ts).unwrap();
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u1", "b"), ts).unwrap();

        let convs = db.list_conversations("oaX").unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].last_message_text.as_deref(), Some("b"));
    }

    #[test]
    fn conversations_tolerate_empty_log() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.list_conversations("nobody").unwrap().is_empty());
        assert!(db.list_messages("nobody", "u1").unwrap().is_empty());
    }

    #[test]
    fn messages_are_chronological_and_bidirectional() {
        let db = Database::open_in_memory().unwrap();
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u1", "hi"), "2024-01-01 09:00:00").unwrap();
        db.insert_event_at("oaX", "oa_send_text", &outbound("oaX", "u1", "hello back"), "2024-01-01 09:01:00").unwrap();
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u1", "thanks"), "2024-01-01 09:02:00").unwrap();
        db.insert_event_at("oaX", "user_send_text", &inbound("oaX", "u2", "unrelated"), "2024-01-01 09:03:00").unwrap();

        let msgs = db.list_messages("oaX", "u1").unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].event_type, "user_send_text");
        assert_eq!(msgs[1].event_type, "oa_send_text");
        assert!(msgs.windows(2).all(|w| w[0].received_at <= w[1].received_at));
    }

    #[test]
    fn backfill_dedup_by_msg_id() {
        let db = Database::open_in_memory().unwrap();
        let payload = serde_json::json!({
            "event_name": "user_send_text",
            "oa_id": "oaX",
            "sender": { "id": "u1" },
            "message": { "msg_id": "m-42", "text": "hi" },
        })
        .to_string();

        assert!(!db.has_event_with_msg_id("m-42").unwrap());
        db.insert_event("oaX", "user_send_text", &payload).unwrap();
        assert!(db.has_event_with_msg_id("m-42").unwrap());
    }

    #[test]
    fn malformed_payloads_are_stored_verbatim() {
        let db = Database::open_in_memory().unwrap();
        // not valid JSON at all — still accepted for forensics
        db.insert_event("oaX", "user_send_text", "not json {").unwrap();
        let msgs = db.list_messages("oaX", "u1").unwrap();
        assert!(msgs.is_empty());
    }
}
