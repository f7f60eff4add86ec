//! PRAGMAs and DDL applied when the store file is opened.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

pub fn run_integrity_check(conn: &Connection) -> Result<()> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS message_mapping (
            source_platform    TEXT NOT NULL,
            source_message_id  TEXT NOT NULL,
            target_platform    TEXT NOT NULL,
            target_message_id  TEXT NOT NULL,
            created_at         INTEGER NOT NULL,
            PRIMARY KEY (source_platform, source_message_id, target_platform)
        );

        CREATE INDEX IF NOT EXISTS idx_message_mapping_target
            ON message_mapping (target_platform, target_message_id);

        CREATE TABLE IF NOT EXISTS user_info (
            platform        TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            conversation_id TEXT NOT NULL DEFAULT '',
            nickname        TEXT,
            group_card      TEXT,
            title           TEXT,
            last_updated    INTEGER NOT NULL,
            PRIMARY KEY (platform, user_id, conversation_id)
        );

        CREATE TABLE IF NOT EXISTS media_fingerprint (
            fingerprint_hash  TEXT PRIMARY KEY,
            peer_file_id      TEXT NOT NULL,
            media_kind        TEXT NOT NULL,
            is_animated       INTEGER,
            mime_type         TEXT,
            created_at        INTEGER NOT NULL,
            last_used_at      INTEGER NOT NULL,
            last_checked_at   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS retry_send (
            source_platform        TEXT NOT NULL,
            source_message_id      TEXT NOT NULL,
            target_platform        TEXT NOT NULL,
            payload                TEXT NOT NULL,
            conversation_id        TEXT NOT NULL,
            source_conversation_id TEXT NOT NULL,
            target_topic_id        INTEGER,
            attempt_count          INTEGER NOT NULL,
            max_attempts           INTEGER NOT NULL,
            next_attempt_at        INTEGER NOT NULL,
            last_failure_reason    TEXT,
            created_at             INTEGER NOT NULL,
            PRIMARY KEY (source_platform, source_message_id, target_platform)
        );

        CREATE TABLE IF NOT EXISTS retry_download (
            platform             TEXT NOT NULL,
            file_id              TEXT NOT NULL,
            media_kind           TEXT NOT NULL,
            url                  TEXT NOT NULL,
            local_path           TEXT NOT NULL,
            use_proxy            INTEGER NOT NULL,
            attempt_count        INTEGER NOT NULL,
            max_attempts         INTEGER NOT NULL,
            next_attempt_at      INTEGER NOT NULL,
            last_failure_reason  TEXT,
            created_at           INTEGER NOT NULL,
            PRIMARY KEY (platform, file_id)
        );

        CREATE TABLE IF NOT EXISTS heartbeat (
            platform          TEXT PRIMARY KEY,
            last_heartbeat_at INTEGER NOT NULL,
            raw_status        TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
