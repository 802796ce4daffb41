//! Memory engine — embed, store-if-new, recall-by-similarity, dedup.
//!
//! Write policy (`store_if_new`) works in three similarity zones against the
//! nearest existing memory:
//!   ≥ 0.85            exact duplicate → skip
//!   0.70 … 0.85       same topic, new info → update the existing row
//!   < 0.70            new topic → insert
//!
//! Recall applies the category privacy filter before anything reaches the
//! caller, and bumps access stats only for surviving rows.

use std::sync::Arc;

use tracing::{debug, info};

use aster_core::types::AccessLevel;
use aster_guard::check_rule_760;
use aster_provider::Provider;
use aster_store::types::MemoryRow;
use aster_store::{MemoryFilter, Store};

use crate::error::{MemoryError, Result};

/// Similarity at or above which a candidate is an exact duplicate.
pub const DUPLICATE_THRESHOLD: f64 = 0.85;
/// Similarity at or above which a candidate updates the existing row.
pub const CONFLICT_THRESHOLD: f64 = 0.70;
/// Default recall floor.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;

pub struct MemoryEngine {
    store: Store,
    provider: Arc<dyn Provider>,
}

/// Outcome of a `store_if_new` call. The three cases partition by the
/// 0.70 / 0.85 thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted(i64),
    Updated(i64),
    Skipped,
}

impl StoreOutcome {
    /// The affected row id, None for skips.
    pub fn id(&self) -> Option<i64> {
        match self {
            StoreOutcome::Inserted(id) | StoreOutcome::Updated(id) => Some(*id),
            StoreOutcome::Skipped => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecallQuery {
    pub query: String,
    pub limit: usize,
    pub min_similarity: f64,
    pub category: Option<String>,
    pub user_id: Option<i64>,
    pub requester_access_level: AccessLevel,
}

impl RecallQuery {
    pub fn new(query: impl Into<String>, requester: AccessLevel) -> Self {
        Self {
            query: query.into(),
            limit: 10,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            category: None,
            user_id: None,
            requester_access_level: requester,
        }
    }
}

/// A recalled memory with its similarity score.
#[derive(Debug, Clone)]
pub struct Recalled {
    pub row: MemoryRow,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct DedupReport {
    pub duplicates_found: usize,
    pub deleted_ids: Vec<i64>,
    pub kept_ids: Vec<i64>,
}

impl MemoryEngine {
    pub fn new(store: Store, provider: Arc<dyn Provider>) -> Self {
        Self { store, provider }
    }

    /// Swap the provider — used when the operator activates a different
    /// embedding model.
    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) {
        self.provider = provider;
    }

    /// Unconditionally store a memory with its embedding.
    pub async fn store(
        &self,
        content: &str,
        category: &str,
        source: &str,
        user_id: Option<i64>,
        importance: f64,
    ) -> Result<i64> {
        let vector = self.embed_one(content).await?;
        self.guard_dimension(vector.len()).await?;
        let id = self
            .store
            .insert_memory(content, category, &vector, source, user_id, importance)
            .await?;
        debug!(id, category, "memory stored");
        Ok(id)
    }

    /// Store with conflict resolution against the nearest existing memory.
    pub async fn store_if_new(
        &self,
        content: &str,
        category: &str,
        source: &str,
        user_id: Option<i64>,
        importance: f64,
    ) -> Result<StoreOutcome> {
        let vector = self.embed_one(content).await?;
        self.guard_dimension(vector.len()).await?;

        let nearest = self
            .store
            .memory_nearest(&vector, 1, &MemoryFilter::default())
            .await?;

        if let Some(hit) = nearest.first() {
            if hit.similarity >= DUPLICATE_THRESHOLD {
                debug!(
                    similarity = hit.similarity,
                    existing = hit.row.id,
                    "duplicate memory, skipping"
                );
                return Ok(StoreOutcome::Skipped);
            }
            if hit.similarity >= CONFLICT_THRESHOLD {
                info!(
                    similarity = hit.similarity,
                    existing = hit.row.id,
                    "conflicting memory, updating in place"
                );
                self.store
                    .update_memory(hit.row.id, content, category, &vector, source, importance)
                    .await?;
                return Ok(StoreOutcome::Updated(hit.row.id));
            }
        }

        let id = self
            .store
            .insert_memory(content, category, &vector, source, user_id, importance)
            .await?;
        Ok(StoreOutcome::Inserted(id))
    }

    /// Recall memories by semantic similarity.
    ///
    /// Rows below `min_similarity` are dropped, then the category privacy
    /// filter runs, then access stats are bumped for the survivors.
    pub async fn recall(&self, q: &RecallQuery) -> Result<Vec<Recalled>> {
        let vector = self.embed_one(&q.query).await?;
        let filter = MemoryFilter {
            category: q.category.clone(),
            user_id: q.user_id,
        };
        let hits = self.store.memory_nearest(&vector, q.limit, &filter).await?;

        let mut results = Vec::new();
        let mut bump_ids = Vec::new();
        for hit in hits {
            if hit.similarity < q.min_similarity {
                continue;
            }
            if let Err(reason) = check_rule_760(&hit.row.category, q.requester_access_level) {
                debug!(id = hit.row.id, reason, "memory filtered from recall");
                continue;
            }
            bump_ids.push(hit.row.id);
            results.push(Recalled {
                row: hit.row,
                similarity: hit.similarity,
            });
        }

        self.store.bump_memory_access(&bump_ids).await?;
        Ok(results)
    }

    pub async fn delete(&self, ids: &[i64]) -> Result<usize> {
        Ok(self.store.delete_memories(ids).await?)
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(self.store.count_memories().await?)
    }

    /// Pairwise dedup. Keeps the higher-importance row of each duplicate
    /// pair (ties broken by older id); deletes the losers. A dry run reads
    /// but never writes.
    pub async fn dedup(&self, threshold: f64, dry_run: bool) -> Result<DedupReport> {
        let rows = self
            .store
            .load_memories_with_embeddings(&MemoryFilter::default())
            .await?;
        if rows.len() < 2 {
            return Ok(DedupReport::default());
        }

        let mut report = DedupReport::default();
        let mut deleted: std::collections::HashSet<i64> = std::collections::HashSet::new();

        for i in 0..rows.len() {
            if deleted.contains(&rows[i].id) {
                continue;
            }
            for j in (i + 1)..rows.len() {
                if deleted.contains(&rows[j].id) {
                    continue;
                }
                let (Some(a), Some(b)) = (&rows[i].embedding, &rows[j].embedding) else {
                    continue;
                };
                let sim = aster_store::vector::cosine_similarity(a, b);
                if sim < threshold {
                    continue;
                }

                // rows are ordered by id, so on equal importance the earlier
                // (older) row wins.
                let (keep, remove) = if rows[i].importance >= rows[j].importance {
                    (&rows[i], &rows[j])
                } else {
                    (&rows[j], &rows[i])
                };
                report.duplicates_found += 1;
                report.kept_ids.push(keep.id);
                deleted.insert(remove.id);
            }
        }

        report.deleted_ids = deleted.iter().copied().collect();
        report.deleted_ids.sort_unstable();

        if !dry_run && !report.deleted_ids.is_empty() {
            let n = self.store.delete_memories(&report.deleted_ids).await?;
            info!(removed = n, "dedup removed duplicate memories");
        }

        Ok(report)
    }

    /// Dimension-change policy: when the active embedding model's width
    /// differs from what is stored, wipe the stored embeddings (or whole
    /// rows when `delete_rows`). Two widths never coexist.
    pub async fn apply_dimension_policy(&self, delete_rows: bool) -> Result<()> {
        let Some(active) = self.provider.embedding_dim() else {
            return Ok(());
        };
        let Some(stored) = self.store.stored_embedding_dim().await? else {
            return Ok(());
        };
        if stored == active {
            return Ok(());
        }

        info!(stored, active, delete_rows, "embedding dimension changed, wiping vectors");
        if delete_rows {
            self.store.delete_all_memories().await?;
        } else {
            self.store.clear_embeddings().await?;
        }
        Ok(())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self.provider.embed(&[text.to_string()]).await?;
        resp.vectors
            .into_iter()
            .next()
            .ok_or(MemoryError::Provider(
                aster_provider::ProviderError::EmptyResponse,
            ))
    }

    /// Refuse to mix widths: a write whose vector differs from the stored
    /// dimension means the operator switched models without running the
    /// dimension policy.
    async fn guard_dimension(&self, active: usize) -> Result<()> {
        if let Some(stored) = self.store.stored_embedding_dim().await? {
            if stored != active {
                return Err(MemoryError::DimensionMismatch { stored, active });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aster_provider::{ChatRequest, EmbedResponse, ProviderError, StreamEvent};
    use tokio::sync::mpsc;

    /// Deterministic embedder: maps known phrases to fixed vectors so the
    /// similarity zones are exact.
    struct StubEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl Provider for StubEmbedder {
        fn name(&self) -> &str {
            "stub-embed"
        }

        async fn chat_stream(
            &self,
            _req: &ChatRequest,
            _tx: mpsc::Sender<StreamEvent>,
        ) -> aster_provider::Result<()> {
            Err(ProviderError::UnsupportedCapability("chat"))
        }

        async fn embed(&self, texts: &[String]) -> aster_provider::Result<EmbedResponse> {
            let vectors = texts.iter().map(|t| embed_text(t, self.dim)).collect();
            Ok(EmbedResponse {
                vectors,
                dim: self.dim,
            })
        }

        fn embedding_dim(&self) -> Option<usize> {
            Some(self.dim)
        }
    }

    fn embed_text(text: &str, dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        match text {
            // Base direction.
            "the user likes green tea" => v[0] = 1.0,
            // cos = 0.8 against base — conflict zone (0.70..0.85).
            "the user likes black tea" => {
                v[0] = 0.8;
                v[1] = (1.0f32 - 0.64).sqrt();
            }
            // cos = 0.95 against base — duplicate zone.
            "the user likes green tea a lot" => {
                v[0] = 0.95;
                v[1] = (1.0f32 - 0.9025).sqrt();
            }
            // Orthogonal.
            "the user's dog is called Rex" => v[2] = 1.0,
            other => {
                // Deterministic fallback direction derived from the length.
                v[3 + other.len() % (dim - 3)] = 1.0;
            }
        }
        v
    }

    async fn engine() -> (tempfile::TempDir, MemoryEngine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.db");
        let store = Store::open(path.to_str().unwrap(), 1, 4).await.unwrap();
        let engine = MemoryEngine::new(store, Arc::new(StubEmbedder { dim: 8 }));
        (dir, engine)
    }

    #[tokio::test]
    async fn three_zone_write_policy() {
        let (_dir, engine) = engine().await;

        let first = engine
            .store_if_new("the user likes green tea", "preference", "user_confirmed", None, 0.5)
            .await
            .unwrap();
        let StoreOutcome::Inserted(base_id) = first else {
            panic!("expected insert, got {first:?}");
        };

        // 0.95 similarity → duplicate → skip.
        let dup = engine
            .store_if_new(
                "the user likes green tea a lot",
                "preference",
                "user_confirmed",
                None,
                0.5,
            )
            .await
            .unwrap();
        assert_eq!(dup, StoreOutcome::Skipped);

        // 0.90 similarity → conflict zone → update in place, same id.
        let upd = engine
            .store_if_new("the user likes black tea", "preference", "user_confirmed", None, 0.5)
            .await
            .unwrap();
        assert_eq!(upd, StoreOutcome::Updated(base_id));

        // Orthogonal → insert.
        let ins = engine
            .store_if_new("the user's dog is called Rex", "fact", "user_confirmed", None, 0.5)
            .await
            .unwrap();
        assert!(matches!(ins, StoreOutcome::Inserted(id) if id != base_id));

        assert_eq!(engine.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recall_filters_private_categories() {
        let (_dir, engine) = engine().await;
        engine
            .store("the user likes green tea", "preference", "user_confirmed", None, 0.5)
            .await
            .unwrap();
        engine
            .store("the user's dog is called Rex", "health", "user_confirmed", None, 0.9)
            .await
            .unwrap();

        // Owner sees both categories.
        let q = RecallQuery {
            min_similarity: 0.0,
            ..RecallQuery::new("the user's dog is called Rex", AccessLevel::Owner)
        };
        let owner_hits = engine.recall(&q).await.unwrap();
        assert!(owner_hits.iter().any(|r| r.row.category == "health"));

        // Public requester never sees the private category.
        let q = RecallQuery {
            min_similarity: 0.0,
            ..RecallQuery::new("the user's dog is called Rex", AccessLevel::Public)
        };
        let public_hits = engine.recall(&q).await.unwrap();
        assert!(public_hits.iter().all(|r| r.row.category != "health"));
    }

    #[tokio::test]
    async fn recall_bumps_access_stats_only_for_survivors() {
        let (_dir, engine) = engine().await;
        engine
            .store("the user's dog is called Rex", "health", "user_confirmed", None, 0.9)
            .await
            .unwrap();

        let q = RecallQuery {
            min_similarity: 0.0,
            ..RecallQuery::new("the user's dog is called Rex", AccessLevel::Public)
        };
        engine.recall(&q).await.unwrap();

        // Filtered row: access_count stays zero.
        let q = RecallQuery {
            min_similarity: 0.0,
            ..RecallQuery::new("the user's dog is called Rex", AccessLevel::Owner)
        };
        let hits = engine.recall(&q).await.unwrap();
        assert_eq!(hits[0].row.access_count, 0);
    }

    #[tokio::test]
    async fn dedup_dry_run_is_pure_and_second_apply_is_noop() {
        let (_dir, engine) = engine().await;
        engine
            .store("the user likes green tea", "preference", "user_confirmed", None, 0.9)
            .await
            .unwrap();
        engine
            .store("the user likes green tea a lot", "preference", "user_confirmed", None, 0.4)
            .await
            .unwrap();

        let dry = engine.dedup(0.85, true).await.unwrap();
        assert_eq!(dry.duplicates_found, 1);
        assert_eq!(engine.count().await.unwrap(), 2);

        let applied = engine.dedup(0.85, false).await.unwrap();
        assert_eq!(applied.deleted_ids.len(), 1);
        assert_eq!(engine.count().await.unwrap(), 1);

        // Second apply finds nothing.
        let again = engine.dedup(0.85, false).await.unwrap();
        assert_eq!(again.duplicates_found, 0);
        assert!(again.deleted_ids.is_empty());
    }

    #[tokio::test]
    async fn dimension_change_wipes_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mem.db");
        let store = Store::open(path.to_str().unwrap(), 1, 4).await.unwrap();

        let mut engine = MemoryEngine::new(store.clone(), Arc::new(StubEmbedder { dim: 8 }));
        for _ in 0..3 {
            engine
                .store("the user's dog is called Rex", "fact", "user_confirmed", None, 0.5)
                .await
                .unwrap();
        }
        assert_eq!(store.stored_embedding_dim().await.unwrap(), Some(8));

        // Activate a wider model; writes are refused until the policy runs.
        engine.set_provider(Arc::new(StubEmbedder { dim: 16 }));
        let err = engine
            .store("the user likes green tea", "fact", "user_confirmed", None, 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { stored: 8, active: 16 }));

        engine.apply_dimension_policy(true).await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 0);

        // Recall over the wiped store returns nothing, new writes succeed.
        let q = RecallQuery {
            min_similarity: 0.0,
            ..RecallQuery::new("the user's dog is called Rex", AccessLevel::Owner)
        };
        assert!(engine.recall(&q).await.unwrap().is_empty());
        engine
            .store("the user likes green tea", "fact", "user_confirmed", None, 0.5)
            .await
            .unwrap();
        assert_eq!(store.stored_embedding_dim().await.unwrap(), Some(16));
    }
}
