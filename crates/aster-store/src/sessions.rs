//! Sessions and their message transcripts.
//!
//! At most one `active` session exists per (platform, platform_chat_id) —
//! enforced by a partial unique index. `/clear` archives; compaction never
//! does. Message ordering within a session is `created_at, id` and that
//! order is the authoritative conversation history.

use std::str::FromStr;

use uuid::Uuid;

use crate::config::no_rows_as_none;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{MessageRow, NewMessage, Role, Session, SessionStatus, COMPACTION_SUMMARY_TYPE};

impl Store {
    /// The active session for a chat, creating one if none exists.
    pub async fn active_session(&self, platform: &str, platform_chat_id: &str) -> Result<Session> {
        if let Some(session) = self.get_active_session(platform, platform_chat_id).await? {
            return Ok(session);
        }

        let id = Uuid::new_v4().to_string();
        let conn = self.conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO sessions
             (id, platform, platform_chat_id, status, message_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'active', 0, ?4, ?4)",
            rusqlite::params![id, platform, platform_chat_id, Self::now()],
        )?;
        drop(conn);

        self.get_active_session(platform, platform_chat_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: "session",
                id: format!("{platform}:{platform_chat_id}"),
            })
    }

    pub async fn get_active_session(
        &self,
        platform: &str,
        platform_chat_id: &str,
    ) -> Result<Option<Session>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, platform, platform_chat_id, status, message_count,
                    created_at, updated_at
             FROM sessions
             WHERE platform = ?1 AND platform_chat_id = ?2 AND status = 'active'",
            rusqlite::params![platform, platform_chat_id],
            row_to_session,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn().await?;
        conn.query_row(
            "SELECT id, platform, platform_chat_id, status, message_count,
                    created_at, updated_at
             FROM sessions WHERE id = ?1",
            rusqlite::params![id],
            row_to_session,
        )
        .map(Some)
        .or_else(no_rows_as_none)
    }

    /// Archive a session (the `/clear` operation). The next message opens a
    /// fresh active session.
    pub async fn archive_session(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let n = conn.execute(
            "UPDATE sessions SET status = 'archived', updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Self::now(), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: "session",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Persist one message and bump the session counters.
    pub async fn append_message(&self, session_id: &str, msg: &NewMessage) -> Result<i64> {
        let conn = self.conn().await?;
        let now = Self::now();
        conn.execute(
            "INSERT INTO messages
             (session_id, role, content, tool_call_id, tool_name, tool_args,
              metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                session_id,
                msg.role.to_string(),
                msg.content,
                msg.tool_call_id,
                msg.tool_name,
                msg.tool_args.as_ref().map(|v| v.to_string()),
                msg.metadata.to_string(),
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE sessions SET message_count = message_count + 1, updated_at = ?1
             WHERE id = ?2",
            rusqlite::params![now, session_id],
        )?;
        Ok(id)
    }

    /// Full transcript in authoritative order.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRow>> {
        let conn = self.conn().await?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, tool_call_id, tool_name,
                    tool_args, metadata, created_at
             FROM messages WHERE session_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub async fn delete_messages(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn().await?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM messages WHERE id IN ({placeholders})");
        let n = conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(n)
    }

    /// Replace a compacted prefix with a single summary row, atomically.
    ///
    /// In one transaction: delete `prefix_ids`, insert one assistant-role
    /// row marked `metadata.type = "compaction_summary"`, refresh the
    /// session's message_count and updated_at. `created_at` of the session
    /// is untouched. The summary row's timestamp is backdated to sort
    /// before the surviving tail.
    pub async fn replace_with_summary(
        &self,
        session_id: &str,
        prefix_ids: &[i64],
        summary: &str,
    ) -> Result<i64> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction()?;

        if !prefix_ids.is_empty() {
            let placeholders = vec!["?"; prefix_ids.len()].join(",");
            let sql = format!("DELETE FROM messages WHERE id IN ({placeholders})");
            tx.execute(&sql, rusqlite::params_from_iter(prefix_ids.iter()))?;
        }

        // Backdate strictly before the oldest surviving message so the
        // summary sorts first under the (created_at, id) ordering even
        // though its row id is newer.
        let anchor: Option<String> = tx
            .query_row(
                "SELECT MIN(created_at) FROM messages WHERE session_id = ?1",
                rusqlite::params![session_id],
                |row| row.get(0),
            )
            .unwrap_or(None);
        let created_at = anchor
            .as_deref()
            .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| (dt - chrono::Duration::milliseconds(1)).to_rfc3339())
            .unwrap_or_else(Self::now);

        let metadata = serde_json::json!({ "type": COMPACTION_SUMMARY_TYPE });
        tx.execute(
            "INSERT INTO messages
             (session_id, role, content, tool_call_id, tool_name, tool_args,
              metadata, created_at)
             VALUES (?1, 'assistant', ?2, NULL, NULL, NULL, ?3, ?4)",
            rusqlite::params![session_id, summary, metadata.to_string(), created_at],
        )?;
        let summary_id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE sessions
             SET message_count = (SELECT COUNT(*) FROM messages WHERE session_id = ?1),
                 updated_at = ?2
             WHERE id = ?1",
            rusqlite::params![session_id, Self::now()],
        )?;

        tx.commit()?;
        Ok(summary_id)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status_str: String = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        platform: row.get(1)?,
        platform_chat_id: row.get(2)?,
        status: if status_str == "archived" {
            SessionStatus::Archived
        } else {
            SessionStatus::Active
        },
        message_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let role_str: String = row.get(2)?;
    let tool_args: Option<String> = row.get(6)?;
    let metadata_str: String = row.get(7)?;
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::from_str(&role_str).unwrap_or(Role::User),
        content: row.get(3)?,
        tool_call_id: row.get(4)?,
        tool_name: row.get(5)?,
        tool_args: tool_args.and_then(|s| serde_json::from_str(&s).ok()),
        metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn one_active_session_per_chat() {
        let (_dir, store) = open_test_store().await;
        let a = store.active_session("telegram", "77").await.unwrap();
        let b = store.active_session("telegram", "77").await.unwrap();
        assert_eq!(a.id, b.id);

        store.archive_session(&a.id).await.unwrap();
        let c = store.active_session("telegram", "77").await.unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn messages_keep_insertion_order() {
        let (_dir, store) = open_test_store().await;
        let s = store.active_session("terminal", "local").await.unwrap();
        for i in 0..5 {
            store
                .append_message(&s.id, &NewMessage::text(Role::User, format!("m{i}")))
                .await
                .unwrap();
        }
        let msgs = store.list_messages(&s.id).await.unwrap();
        let contents: Vec<_> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn summary_replacement_is_atomic_and_sorted_first() {
        let (_dir, store) = open_test_store().await;
        let s = store.active_session("terminal", "local").await.unwrap();
        let mut ids = Vec::new();
        for i in 0..10 {
            let id = store
                .append_message(&s.id, &NewMessage::text(Role::User, format!("m{i}")))
                .await
                .unwrap();
            ids.push(id);
        }
        let created_before = store.get_session(&s.id).await.unwrap().unwrap().created_at;

        // Compact the first 7, keep the tail of 3.
        store
            .replace_with_summary(&s.id, &ids[..7], "summary of m0..m6")
            .await
            .unwrap();

        let msgs = store.list_messages(&s.id).await.unwrap();
        assert_eq!(msgs.len(), 4);
        assert!(msgs[0].is_compaction_summary());
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[0].content, "summary of m0..m6");
        assert_eq!(msgs[1].content, "m7");

        let session = store.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(session.message_count, 4);
        assert_eq!(session.created_at, created_before);
    }
}
