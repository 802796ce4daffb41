//! Memory rows and the cosine nearest-neighbour scan.
//!
//! Embeddings live in a BLOB column as little-endian f32. Nearest-neighbour
//! queries load candidate embeddings and rank by cosine similarity in
//! process; `similarity = 1 − cosine_distance`. Exactly one embedding
//! dimension exists in the column at any time — a dimension change wipes it
//! (see the memory engine's dimension policy).

use tracing::info;

use crate::error::Result;
use crate::store::Store;
use crate::types::{MemoryHit, MemoryRow};
use crate::vector::{bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes};

/// Filters applied inside the nearest-neighbour scan.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub category: Option<String>,
    /// Matches rows owned by this user or rows with no owner.
    pub user_id: Option<i64>,
}

impl Store {
    pub async fn insert_memory(
        &self,
        content: &str,
        category: &str,
        embedding: &[f32],
        source: &str,
        user_id: Option<i64>,
        importance: f64,
    ) -> Result<i64> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO memory
             (content, category, embedding, source, user_id, importance,
              access_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            rusqlite::params![
                content,
                category,
                f32_vec_to_bytes(embedding),
                source,
                user_id,
                importance,
                Self::now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// In-place update used by the conflict-resolution path of
    /// `store_if_new` — same id, new content and embedding.
    pub async fn update_memory(
        &self,
        id: i64,
        content: &str,
        category: &str,
        embedding: &[f32],
        source: &str,
        importance: f64,
    ) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE memory
             SET content = ?1, category = ?2, embedding = ?3, source = ?4,
                 importance = ?5
             WHERE id = ?6",
            rusqlite::params![
                content,
                category,
                f32_vec_to_bytes(embedding),
                source,
                importance,
                id
            ],
        )?;
        Ok(())
    }

    pub async fn delete_memories(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn().await?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM memory WHERE id IN ({placeholders})");
        let n = conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(n)
    }

    /// Rows ordered by cosine distance to `query`, best first.
    pub async fn memory_nearest(
        &self,
        query: &[f32],
        k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryHit>> {
        let rows = self.load_memories_with_embeddings(filter).await?;

        let mut hits: Vec<MemoryHit> = rows
            .into_iter()
            .filter_map(|row| {
                let emb = row.embedding.as_deref()?;
                let similarity = cosine_similarity(query, emb);
                Some(MemoryHit { row, similarity })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// All rows that still carry an embedding — the dedup pass walks these.
    pub async fn load_memories_with_embeddings(
        &self,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRow>> {
        let conn = self.conn().await?;
        let mut sql = String::from(
            "SELECT id, content, category, embedding, source, user_id,
                    importance, access_count, created_at, accessed_at
             FROM memory WHERE embedding IS NOT NULL",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(ref cat) = filter.category {
            sql.push_str(" AND category = ?");
            params.push(Box::new(cat.clone()));
        }
        if let Some(uid) = filter.user_id {
            sql.push_str(" AND (user_id = ? OR user_id IS NULL)");
            params.push(Box::new(uid));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_memory,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Bump access stats for recalled rows, atomically.
    pub async fn bump_memory_access(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn().await?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "UPDATE memory
             SET access_count = access_count + 1, accessed_at = ?
             WHERE id IN ({placeholders})"
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(Self::now())];
        for id in ids {
            params.push(Box::new(*id));
        }
        conn.execute(
            &sql,
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        )?;
        Ok(())
    }

    pub async fn count_memories(&self) -> Result<i64> {
        let conn = self.conn().await?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memory", [], |row| row.get(0))?;
        Ok(n)
    }

    pub async fn count_embedded_memories(&self) -> Result<i64> {
        let conn = self.conn().await?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory WHERE embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Dimension (in f32 lanes) of any stored embedding, or None when the
    /// column is empty. Two dimensions never coexist.
    pub async fn stored_embedding_dim(&self) -> Result<Option<usize>> {
        let conn = self.conn().await?;
        let len: Option<i64> = conn
            .query_row(
                "SELECT LENGTH(embedding) FROM memory
                 WHERE embedding IS NOT NULL LIMIT 1",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(crate::config::no_rows_as_none)?
            .flatten();
        Ok(len.map(|bytes| (bytes as usize) / 4))
    }

    /// Null out every embedding (dimension-change policy, keep-rows variant).
    pub async fn clear_embeddings(&self) -> Result<usize> {
        let conn = self.conn().await?;
        let n = conn.execute("UPDATE memory SET embedding = NULL", [])?;
        info!(rows = n, "cleared all memory embeddings");
        Ok(n)
    }

    /// Drop every memory row (dimension-change policy, delete-rows variant).
    pub async fn delete_all_memories(&self) -> Result<usize> {
        let conn = self.conn().await?;
        let n = conn.execute("DELETE FROM memory", [])?;
        info!(rows = n, "deleted all memory rows");
        Ok(n)
    }

    /// Idempotent index creation over the embedding-bearing table.
    ///
    /// Only takes effect once at least one embedding row exists; returns
    /// whether the index is in place afterwards.
    pub async fn ensure_vector_index(&self) -> Result<bool> {
        if self.count_embedded_memories().await? == 0 {
            return Ok(false);
        }
        let conn = self.conn().await?;
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_memory_category ON memory(category);
             CREATE INDEX IF NOT EXISTS idx_memory_user ON memory(user_id);",
        )?;
        drop(conn);
        self.upsert_config(
            "memory.vector_index_ready",
            &serde_json::json!(true),
            "set once the memory similarity index has been materialised",
        )
        .await?;
        Ok(true)
    }
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    let blob: Option<Vec<u8>> = row.get(3)?;
    Ok(MemoryRow {
        id: row.get(0)?,
        content: row.get(1)?,
        category: row.get(2)?,
        embedding: blob.map(|b| bytes_to_f32_vec(&b)),
        source: row.get(4)?,
        user_id: row.get(5)?,
        importance: row.get(6)?,
        access_count: row.get(7)?,
        created_at: row.get(8)?,
        accessed_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_test_store;

    #[tokio::test]
    async fn nearest_orders_by_similarity() {
        let (_dir, store) = open_test_store().await;
        store
            .insert_memory("likes tea", "preference", &[1.0, 0.0], "user_confirmed", None, 0.5)
            .await
            .unwrap();
        store
            .insert_memory("likes coffee", "preference", &[0.0, 1.0], "user_confirmed", None, 0.5)
            .await
            .unwrap();
        store
            .insert_memory("drinks chai", "preference", &[0.9, 0.1], "user_confirmed", None, 0.5)
            .await
            .unwrap();

        let hits = store
            .memory_nearest(&[1.0, 0.0], 2, &MemoryFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row.content, "likes tea");
        assert_eq!(hits[1].row.content, "drinks chai");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn filters_restrict_candidates() {
        let (_dir, store) = open_test_store().await;
        store
            .insert_memory("a", "health", &[1.0, 0.0], "user_confirmed", Some(1), 0.5)
            .await
            .unwrap();
        store
            .insert_memory("b", "fact", &[1.0, 0.0], "user_confirmed", Some(2), 0.5)
            .await
            .unwrap();

        let hits = store
            .memory_nearest(
                &[1.0, 0.0],
                10,
                &MemoryFilter {
                    category: Some("fact".to_string()),
                    user_id: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].row.content, "b");
    }

    #[tokio::test]
    async fn access_bump_is_recorded() {
        let (_dir, store) = open_test_store().await;
        let id = store
            .insert_memory("x", "fact", &[1.0], "user_confirmed", None, 0.5)
            .await
            .unwrap();
        store.bump_memory_access(&[id]).await.unwrap();
        store.bump_memory_access(&[id]).await.unwrap();

        let rows = store
            .load_memories_with_embeddings(&MemoryFilter::default())
            .await
            .unwrap();
        assert_eq!(rows[0].access_count, 2);
        assert!(rows[0].accessed_at.is_some());
    }

    #[tokio::test]
    async fn vector_index_waits_for_first_embedding() {
        let (_dir, store) = open_test_store().await;
        assert!(!store.ensure_vector_index().await.unwrap());

        store
            .insert_memory("x", "fact", &[1.0], "user_confirmed", None, 0.5)
            .await
            .unwrap();
        assert!(store.ensure_vector_index().await.unwrap());
        // Idempotent on repeat.
        assert!(store.ensure_vector_index().await.unwrap());
    }

    #[tokio::test]
    async fn stored_dim_tracks_blob_width() {
        let (_dir, store) = open_test_store().await;
        assert_eq!(store.stored_embedding_dim().await.unwrap(), None);
        store
            .insert_memory("x", "fact", &[0.0; 768], "user_confirmed", None, 0.5)
            .await
            .unwrap();
        assert_eq!(store.stored_embedding_dim().await.unwrap(), Some(768));

        store.clear_embeddings().await.unwrap();
        assert_eq!(store.stored_embedding_dim().await.unwrap(), None);
    }
}
