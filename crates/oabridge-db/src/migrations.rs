use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id              TEXT PRIMARY KEY,
            kind            TEXT NOT NULL DEFAULT 'oa',
            name            TEXT,
            avatar          TEXT,
            status          TEXT NOT NULL DEFAULT 'verified',
            connected_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS credentials (
            account_id      TEXT PRIMARY KEY REFERENCES accounts(id),
            access_token    TEXT NOT NULL,
            refresh_token   TEXT NOT NULL,
            expires_at      INTEGER NOT NULL,
            scope           TEXT
        );

        -- Append-only: rows are never updated or deleted. Conversations
        -- and last-message views are derived from this log on read.
        CREATE TABLE IF NOT EXISTS webhook_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            oa_id           TEXT NOT NULL,
            event_type      TEXT NOT NULL,
            payload         TEXT NOT NULL,
            received_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_events_oa_received
            ON webhook_events(oa_id, received_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
