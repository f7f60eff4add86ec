//! bridge-store: the single durable SQLite file backing the bridge's
//! bidirectional ID mapping, user display cache, media fingerprint cache,
//! retry-record persistence and platform heartbeat log (spec.md §3, §4.4,
//! §6).
//!
//! Mirrors the durability posture of a local embedded-database journal:
//! WAL + `synchronous=FULL` + a startup integrity check, all applied once
//! in [`Store::open`]. Every public method locks the single connection
//! internally, so a `Store` can be shared behind an `Arc` across every
//! Forwarder and Connection Manager task without the caller thinking about
//! it — the only globally shared mutable state in the system (spec.md §5).

pub mod error;
pub mod models;
mod schema;

use std::path::Path;
use std::sync::Mutex;

use bridge_protocol::Platform;
use rusqlite::{params, Connection, OptionalExtension};

pub use error::{Result, StoreError};
pub use models::{
    DownloadRetryRecord, HeartbeatRecord, MediaFingerprintRecord, MessageMapping, SendRetryRecord,
    UserDisplayInfo,
};

/// Outcome of [`Store::add_mapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMappingOutcome {
    Inserted,
    Duplicate,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path`. Applies PRAGMAs, runs
    /// `PRAGMA integrity_check`, and creates tables if needed. A failure
    /// here is `Fatal` per spec.md §7 — callers should exit 1.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::apply_pragmas(&conn)?;
        schema::run_integrity_check(&conn)?;
        schema::apply_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    // -----------------------------------------------------------------
    // message_mapping
    // -----------------------------------------------------------------

    pub fn add_mapping(&self, m: &MessageMapping) -> Result<AddMappingOutcome> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "INSERT OR IGNORE INTO message_mapping
                 (source_platform, source_message_id, target_platform, target_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                m.source_platform.as_str(),
                m.source_message_id,
                m.target_platform.as_str(),
                m.target_message_id,
                m.created_at,
            ],
        )?;
        Ok(if changed == 1 { AddMappingOutcome::Inserted } else { AddMappingOutcome::Duplicate })
    }

    /// Given `(source_platform, source_message_id)`, find its counterpart
    /// on `target_platform`.
    pub fn get_target_id(&self, source_platform: Platform, source_message_id: &str, target_platform: Platform) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT target_message_id FROM message_mapping
             WHERE source_platform = ?1 AND source_message_id = ?2 AND target_platform = ?3",
            params![source_platform.as_str(), source_message_id, target_platform.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Given `(platform, message_id)` as it appears on either side, find
    /// the id it originated from on `origin_platform` — the reverse
    /// direction of [`Store::get_target_id`].
    pub fn get_source_id(&self, platform: Platform, message_id: &str, origin_platform: Platform) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT source_message_id FROM message_mapping
             WHERE target_platform = ?1 AND target_message_id = ?2 AND source_platform = ?3",
            params![platform.as_str(), message_id, origin_platform.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn delete_mapping(&self, source_platform: Platform, source_message_id: &str, target_platform: Platform) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM message_mapping
             WHERE source_platform = ?1 AND source_message_id = ?2 AND target_platform = ?3",
            params![source_platform.as_str(), source_message_id, target_platform.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Delete every mapping where `platform`/`message_id` appears as
    /// either side — used when a recall needs to drop a mapping
    /// regardless of which side was the original source (spec.md §3).
    pub fn delete_mapping_either_side(&self, platform: Platform, message_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM message_mapping
             WHERE (source_platform = ?1 AND source_message_id = ?2)
                OR (target_platform = ?1 AND target_message_id = ?2)",
            params![platform.as_str(), message_id],
        )?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------
    // user_info
    // -----------------------------------------------------------------

    pub fn save_user(&self, u: &UserDisplayInfo) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO user_info (platform, user_id, conversation_id, nickname, group_card, title, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (platform, user_id, conversation_id) DO UPDATE SET
                nickname = excluded.nickname,
                group_card = excluded.group_card,
                title = excluded.title,
                last_updated = excluded.last_updated",
            params![
                u.platform.as_str(),
                u.user_id,
                u.conversation_id,
                u.nickname,
                u.group_card,
                u.title,
                u.last_updated,
            ],
        )?;
        Ok(())
    }

    fn load_user(&self, platform: Platform, user_id: &str, conversation_id: &str) -> Result<Option<UserDisplayInfo>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT nickname, group_card, title, last_updated FROM user_info
             WHERE platform = ?1 AND user_id = ?2 AND conversation_id = ?3",
            params![platform.as_str(), user_id, conversation_id],
            |row| {
                Ok(UserDisplayInfo {
                    platform,
                    user_id: user_id.to_owned(),
                    conversation_id: conversation_id.to_owned(),
                    nickname: row.get(0)?,
                    group_card: row.get(1)?,
                    title: row.get(2)?,
                    last_updated: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Effective display name, falling back to `user_id` if nothing is
    /// cached. Prefers the conversation-scoped row, then the global
    /// (`conversation_id = ""`) row.
    pub fn get_display_name(&self, platform: Platform, user_id: &str, conversation_id: Option<&str>) -> Result<String> {
        if let Some(cid) = conversation_id {
            if let Some(info) = self.load_user(platform, user_id, cid)? {
                return Ok(info.effective_name().to_owned());
            }
        }
        if let Some(info) = self.load_user(platform, user_id, "")? {
            return Ok(info.effective_name().to_owned());
        }
        Ok(user_id.to_owned())
    }

    /// Throttled refresh check: true if no cached row exists yet, or the
    /// cached row is older than `min_interval_secs`.
    pub fn should_refresh_user(&self, platform: Platform, user_id: &str, conversation_id: Option<&str>, now: i64, min_interval_secs: i64) -> Result<bool> {
        let cid = conversation_id.unwrap_or("");
        match self.load_user(platform, user_id, cid)? {
            None => Ok(true),
            Some(info) => Ok(now.saturating_sub(info.last_updated) >= min_interval_secs),
        }
    }

    // -----------------------------------------------------------------
    // heartbeat
    // -----------------------------------------------------------------

    pub fn save_heartbeat(&self, platform: Platform, ts: i64, raw: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO heartbeat (platform, last_heartbeat_at, raw_status) VALUES (?1, ?2, ?3)
             ON CONFLICT (platform) DO UPDATE SET last_heartbeat_at = excluded.last_heartbeat_at, raw_status = excluded.raw_status",
            params![platform.as_str(), ts, raw],
        )?;
        Ok(())
    }

    pub fn get_heartbeat(&self, platform: Platform) -> Result<Option<HeartbeatRecord>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT last_heartbeat_at, raw_status FROM heartbeat WHERE platform = ?1",
            params![platform.as_str()],
            |row| Ok(HeartbeatRecord { platform, last_heartbeat_at: row.get(0)?, raw_status: row.get(1)? }),
        )
        .optional()
        .map_err(Into::into)
    }

    // -----------------------------------------------------------------
    // media_fingerprint
    // -----------------------------------------------------------------

    pub fn save_media_fingerprint(&self, r: &MediaFingerprintRecord) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO media_fingerprint
                 (fingerprint_hash, peer_file_id, media_kind, is_animated, mime_type, created_at, last_used_at, last_checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (fingerprint_hash) DO UPDATE SET
                peer_file_id = excluded.peer_file_id,
                media_kind = excluded.media_kind,
                is_animated = excluded.is_animated,
                mime_type = excluded.mime_type,
                last_used_at = excluded.last_used_at,
                last_checked_at = excluded.last_checked_at",
            params![
                r.fingerprint_hash,
                r.peer_file_id,
                r.media_kind,
                r.is_animated,
                r.mime_type,
                r.created_at,
                r.last_used_at,
                r.last_checked_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_media_fingerprint(&self, hash: &str) -> Result<Option<MediaFingerprintRecord>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT fingerprint_hash, peer_file_id, media_kind, is_animated, mime_type, created_at, last_used_at, last_checked_at
             FROM media_fingerprint WHERE fingerprint_hash = ?1",
            params![hash],
            |row| {
                Ok(MediaFingerprintRecord {
                    fingerprint_hash: row.get(0)?,
                    peer_file_id: row.get(1)?,
                    media_kind: row.get(2)?,
                    is_animated: row.get(3)?,
                    mime_type: row.get(4)?,
                    created_at: row.get(5)?,
                    last_used_at: row.get(6)?,
                    last_checked_at: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn touch_fingerprint(&self, hash: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("UPDATE media_fingerprint SET last_used_at = ?2 WHERE fingerprint_hash = ?1", params![hash, now])?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // retry_send / retry_download
    // -----------------------------------------------------------------

    pub fn add_send_retry(&self, r: &SendRetryRecord) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO retry_send
                 (source_platform, source_message_id, target_platform, payload, conversation_id,
                  source_conversation_id, target_topic_id, attempt_count, max_attempts, next_attempt_at,
                  last_failure_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                r.source_platform.as_str(),
                r.source_message_id,
                r.target_platform.as_str(),
                r.payload,
                r.conversation_id,
                r.source_conversation_id,
                r.target_topic_id,
                r.attempt_count,
                r.max_attempts,
                r.next_attempt_at,
                r.last_failure_reason,
                r.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn due_send_retries(&self, now: i64, limit: u32) -> Result<Vec<SendRetryRecord>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT source_platform, source_message_id, target_platform, payload, conversation_id,
                    source_conversation_id, target_topic_id, attempt_count, max_attempts, next_attempt_at,
                    last_failure_reason, created_at
             FROM retry_send WHERE next_attempt_at <= ?1 ORDER BY next_attempt_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now, limit], row_to_send_retry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn delete_send_retry(&self, source_platform: Platform, source_message_id: &str, target_platform: Platform) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "DELETE FROM retry_send WHERE source_platform = ?1 AND source_message_id = ?2 AND target_platform = ?3",
            params![source_platform.as_str(), source_message_id, target_platform.as_str()],
        )?;
        Ok(())
    }

    pub fn update_send_retry_attempt(&self, source_platform: Platform, source_message_id: &str, target_platform: Platform, attempt_count: u32, next_attempt_at: i64, reason: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE retry_send SET attempt_count = ?4, next_attempt_at = ?5, last_failure_reason = ?6
             WHERE source_platform = ?1 AND source_message_id = ?2 AND target_platform = ?3",
            params![source_platform.as_str(), source_message_id, target_platform.as_str(), attempt_count, next_attempt_at, reason],
        )?;
        Ok(())
    }

    pub fn add_download_retry(&self, r: &DownloadRetryRecord) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO retry_download
                 (platform, file_id, media_kind, url, local_path, use_proxy, attempt_count, max_attempts,
                  next_attempt_at, last_failure_reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                r.platform.as_str(),
                r.file_id,
                r.media_kind,
                r.url,
                r.local_path,
                r.use_proxy,
                r.attempt_count,
                r.max_attempts,
                r.next_attempt_at,
                r.last_failure_reason,
                r.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn due_download_retries(&self, now: i64, limit: u32) -> Result<Vec<DownloadRetryRecord>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT platform, file_id, media_kind, url, local_path, use_proxy, attempt_count, max_attempts,
                    next_attempt_at, last_failure_reason, created_at
             FROM retry_download WHERE next_attempt_at <= ?1 ORDER BY next_attempt_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now, limit], row_to_download_retry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    pub fn delete_download_retry(&self, platform: Platform, file_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM retry_download WHERE platform = ?1 AND file_id = ?2", params![platform.as_str(), file_id])?;
        Ok(())
    }

    pub fn update_download_retry_attempt(&self, platform: Platform, file_id: &str, attempt_count: u32, next_attempt_at: i64, reason: &str, use_proxy: bool) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE retry_download SET attempt_count = ?3, next_attempt_at = ?4, last_failure_reason = ?5, use_proxy = ?6
             WHERE platform = ?1 AND file_id = ?2",
            params![platform.as_str(), file_id, attempt_count, next_attempt_at, reason, use_proxy],
        )?;
        Ok(())
    }
}

fn parse_platform(s: String) -> rusqlite::Result<Platform> {
    s.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "platform".into(), rusqlite::types::Type::Text))
}

fn row_to_send_retry(row: &rusqlite::Row) -> rusqlite::Result<SendRetryRecord> {
    Ok(SendRetryRecord {
        source_platform: parse_platform(row.get(0)?)?,
        source_message_id: row.get(1)?,
        target_platform: parse_platform(row.get(2)?)?,
        payload: row.get(3)?,
        conversation_id: row.get(4)?,
        source_conversation_id: row.get(5)?,
        target_topic_id: row.get(6)?,
        attempt_count: row.get(7)?,
        max_attempts: row.get(8)?,
        next_attempt_at: row.get(9)?,
        last_failure_reason: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn row_to_download_retry(row: &rusqlite::Row) -> rusqlite::Result<DownloadRetryRecord> {
    Ok(DownloadRetryRecord {
        platform: parse_platform(row.get(0)?)?,
        file_id: row.get(1)?,
        media_kind: row.get(2)?,
        url: row.get(3)?,
        local_path: row.get(4)?,
        use_proxy: row.get(5)?,
        attempt_count: row.get(6)?,
        max_attempts: row.get(7)?,
        next_attempt_at: row.get(8)?,
        last_failure_reason: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(sp: Platform, sid: &str, tp: Platform, tid: &str) -> MessageMapping {
        MessageMapping { source_platform: sp, source_message_id: sid.into(), target_platform: tp, target_message_id: tid.into(), created_at: 1000 }
    }

    #[test]
    fn add_mapping_is_unique_on_source_platform_source_id_target_platform() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.add_mapping(&mapping(Platform::A, "42", Platform::B, "7")).unwrap(), AddMappingOutcome::Inserted);
        assert_eq!(store.add_mapping(&mapping(Platform::A, "42", Platform::B, "7")).unwrap(), AddMappingOutcome::Duplicate);
        // A different target platform for the same source is a distinct row.
        assert_eq!(store.add_mapping(&mapping(Platform::A, "42", Platform::A, "9")).unwrap(), AddMappingOutcome::Inserted);
    }

    #[test]
    fn get_target_and_source_id_are_inverses() {
        let store = Store::open_in_memory().unwrap();
        store.add_mapping(&mapping(Platform::A, "42", Platform::B, "7")).unwrap();
        assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), Some("7".to_string()));
        assert_eq!(store.get_source_id(Platform::B, "7", Platform::A).unwrap(), Some("42".to_string()));
        assert_eq!(store.get_target_id(Platform::A, "999", Platform::B).unwrap(), None);
    }

    #[test]
    fn delete_mapping_either_side_removes_regardless_of_which_id_is_given() {
        let store = Store::open_in_memory().unwrap();
        store.add_mapping(&mapping(Platform::A, "42", Platform::B, "7")).unwrap();
        assert!(store.delete_mapping_either_side(Platform::B, "7").unwrap());
        assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), None);
    }

    #[test]
    fn display_name_prefers_conversation_scope_then_global_then_user_id() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_display_name(Platform::A, "u1", Some("g1")).unwrap(), "u1");

        store.save_user(&UserDisplayInfo { platform: Platform::A, user_id: "u1".into(), conversation_id: "".into(), nickname: Some("Global Nick".into()), group_card: None, title: None, last_updated: 10 }).unwrap();
        assert_eq!(store.get_display_name(Platform::A, "u1", Some("g1")).unwrap(), "Global Nick");

        store.save_user(&UserDisplayInfo { platform: Platform::A, user_id: "u1".into(), conversation_id: "g1".into(), nickname: Some("Local Nick".into()), group_card: Some("Card".into()), title: None, last_updated: 20 }).unwrap();
        assert_eq!(store.get_display_name(Platform::A, "u1", Some("g1")).unwrap(), "Card");
    }

    #[test]
    fn should_refresh_user_is_throttled() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.should_refresh_user(Platform::A, "u1", Some("g1"), 100, 60).unwrap());
        store.save_user(&UserDisplayInfo { platform: Platform::A, user_id: "u1".into(), conversation_id: "g1".into(), nickname: Some("N".into()), group_card: None, title: None, last_updated: 100 }).unwrap();
        assert!(!store.should_refresh_user(Platform::A, "u1", Some("g1"), 120, 60).unwrap());
        assert!(store.should_refresh_user(Platform::A, "u1", Some("g1"), 200, 60).unwrap());
    }

    #[test]
    fn send_retry_round_trips_and_due_query_respects_next_attempt_at() {
        let store = Store::open_in_memory().unwrap();
        let r = SendRetryRecord {
            source_platform: Platform::A,
            source_message_id: "1".into(),
            target_platform: Platform::B,
            payload: "[]".into(),
            conversation_id: "c1".into(),
            source_conversation_id: "g1".into(),
            target_topic_id: None,
            attempt_count: 0,
            max_attempts: 5,
            next_attempt_at: 1000,
            last_failure_reason: Some("network".into()),
            created_at: 900,
        };
        store.add_send_retry(&r).unwrap();
        assert!(store.due_send_retries(999, 50).unwrap().is_empty());
        let due = store.due_send_retries(1000, 50).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].payload, "[]");

        store.update_send_retry_attempt(Platform::A, "1", Platform::B, 1, 1002, "still down").unwrap();
        let due = store.due_send_retries(1002, 50).unwrap();
        assert_eq!(due[0].attempt_count, 1);

        store.delete_send_retry(Platform::A, "1", Platform::B).unwrap();
        assert!(store.due_send_retries(2000, 50).unwrap().is_empty());
    }

    #[test]
    fn media_fingerprint_save_get_touch() {
        let store = Store::open_in_memory().unwrap();
        let rec = MediaFingerprintRecord {
            fingerprint_hash: "h1".into(),
            peer_file_id: "f1".into(),
            media_kind: "image".into(),
            is_animated: Some(true),
            mime_type: Some("image/gif".into()),
            created_at: 1,
            last_used_at: 1,
            last_checked_at: 1,
        };
        store.save_media_fingerprint(&rec).unwrap();
        store.touch_fingerprint("h1", 50).unwrap();
        let got = store.get_media_fingerprint("h1").unwrap().unwrap();
        assert_eq!(got.last_used_at, 50);
        assert_eq!(got.is_animated, Some(true));
    }

    #[test]
    fn heartbeat_upserts() {
        let store = Store::open_in_memory().unwrap();
        store.save_heartbeat(Platform::A, 10, "{}").unwrap();
        store.save_heartbeat(Platform::A, 20, "{\"ok\":true}").unwrap();
        let hb = store.get_heartbeat(Platform::A).unwrap().unwrap();
        assert_eq!(hb.last_heartbeat_at, 20);
        assert_eq!(hb.raw_status, "{\"ok\":true}");
        assert!(store.get_heartbeat(Platform::B).unwrap().is_none());
    }
}
