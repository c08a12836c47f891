//! SQLite-backed index store.
//!
//! Item text and metadata live in ordinary columns; embeddings are stored as
//! little-endian f32 blobs and decoded when a snapshot is loaded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::snapshot::IndexSnapshot;
use super::store::IndexStore;
use super::types::{IndexedItem, QualityBuckets};
use crate::core::errors::IndexError;

pub struct SqliteIndexStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteIndexStore {
    /// Open an existing index database. A missing file is an error.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let db_path = db_path.as_ref().to_path_buf();
        if !db_path.exists() {
            return Err(IndexError::Missing(db_path.display().to_string()));
        }
        let store = Self::connect(db_path, false).await?;
        store.check_schema().await?;
        Ok(store)
    }

    /// Points at an index database without touching it. The file may not
    /// exist yet; every snapshot load checks for it.
    pub fn attach(db_path: impl AsRef<Path>) -> Self {
        let db_path = db_path.as_ref().to_path_buf();
        let pool = SqlitePoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .connect_lazy_with(Self::connect_options(&db_path, false));
        Self { pool, db_path }
    }

    /// Open or create an index database, creating tables as needed.
    pub async fn create(db_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::Storage(e.to_string()))?;
        }
        let store = Self::connect(db_path, true).await?;
        store.init_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect_options(db_path: &Path, create: bool) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
    }

    async fn connect(db_path: PathBuf, create: bool) -> Result<Self, IndexError> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(Self::connect_options(&db_path, create))
            .await?;

        Ok(Self { pool, db_path })
    }

    async fn init_schema(&self) -> Result<(), IndexError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexed_items (
                item_id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                raw_text TEXT NOT NULL,
                search_keywords TEXT NOT NULL DEFAULT '[]',
                quality_buckets TEXT NOT NULL DEFAULT '{}',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_indexed_items_position ON indexed_items(position)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn check_schema(&self) -> Result<(), IndexError> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('indexed_items', 'index_meta')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexError::Corrupt(e.to_string()))?;

        for required in ["indexed_items", "index_meta"] {
            if !tables.iter().any(|t| t == required) {
                return Err(IndexError::Corrupt(format!(
                    "{} is missing table {}",
                    self.db_path.display(),
                    required
                )));
            }
        }
        Ok(())
    }

    async fn meta_value(&self, key: &str) -> Result<Option<String>, IndexError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(item_id: &str, bytes: &[u8]) -> Result<Vec<f32>, IndexError> {
        if bytes.len() % 4 != 0 {
            return Err(IndexError::Corrupt(format!(
                "embedding for {} has {} bytes, not a multiple of 4",
                item_id,
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<IndexedItem, IndexError> {
        let corrupt = |e: sqlx::Error| IndexError::Corrupt(e.to_string());

        let id: String = row.try_get("item_id").map_err(corrupt)?;
        let position: i64 = row.try_get("position").map_err(corrupt)?;
        let raw_text: String = row.try_get("raw_text").map_err(corrupt)?;
        let keywords_json: String = row.try_get("search_keywords").map_err(corrupt)?;
        let buckets_json: String = row.try_get("quality_buckets").map_err(corrupt)?;
        let metadata_json: String = row.try_get("metadata").map_err(corrupt)?;
        let embedding_bytes: Vec<u8> = row.try_get("embedding").map_err(corrupt)?;

        let bad_json = |field: &str, e: serde_json::Error| {
            IndexError::Corrupt(format!("{} of {} is not valid JSON: {}", field, id, e))
        };
        let search_keywords: BTreeSet<String> =
            serde_json::from_str(&keywords_json).map_err(|e| bad_json("search_keywords", e))?;
        let quality_buckets: QualityBuckets =
            serde_json::from_str(&buckets_json).map_err(|e| bad_json("quality_buckets", e))?;
        let extra: Map<String, Value> =
            serde_json::from_str(&metadata_json).map_err(|e| bad_json("metadata", e))?;
        let embedding = Self::deserialize_embedding(&id, &embedding_bytes)?;

        let position = u64::try_from(position)
            .map_err(|_| IndexError::Corrupt(format!("negative position for {}", id)))?;

        Ok(IndexedItem {
            id,
            position,
            raw_text,
            embedding,
            search_keywords,
            quality_buckets,
            extra,
        })
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }

    async fn load_snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        if !self.db_path.exists() {
            return Err(IndexError::Missing(self.db_path.display().to_string()));
        }
        self.check_schema().await?;

        let rows = sqlx::query(
            "SELECT item_id, position, raw_text, search_keywords, quality_buckets, metadata, embedding
             FROM indexed_items
             ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(Self::row_to_item)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(recorded) = self.meta_value("dimension").await? {
            let expected: usize = recorded
                .parse()
                .map_err(|_| IndexError::Corrupt(format!("bad dimension value {recorded}")))?;
            if let Some(item) = items.iter().find(|item| item.embedding.len() != expected) {
                return Err(IndexError::Corrupt(format!(
                    "item {} has {} dimensions, index records {}",
                    item.id,
                    item.embedding.len(),
                    expected
                )));
            }
        }

        let model = self.meta_value("embedding_model").await?;
        IndexSnapshot::new(items, model)
    }

    async fn replace_all(
        &self,
        items: Vec<IndexedItem>,
        embedding_model: &str,
    ) -> Result<(), IndexError> {
        let dimension = items.first().map(|item| item.embedding.len()).unwrap_or(0);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM indexed_items").execute(&mut *tx).await?;

        for item in &items {
            let keywords = serde_json::to_string(&item.search_keywords)
                .map_err(|e| IndexError::Storage(e.to_string()))?;
            let buckets = serde_json::to_string(&item.quality_buckets)
                .map_err(|e| IndexError::Storage(e.to_string()))?;
            let metadata =
                serde_json::to_string(&item.extra).map_err(|e| IndexError::Storage(e.to_string()))?;
            let position = i64::try_from(item.position)
                .map_err(|_| IndexError::Storage(format!("position overflow for {}", item.id)))?;

            sqlx::query(
                "INSERT INTO indexed_items (item_id, position, raw_text, search_keywords, quality_buckets, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&item.id)
            .bind(position)
            .bind(&item.raw_text)
            .bind(&keywords)
            .bind(&buckets)
            .bind(&metadata)
            .bind(Self::serialize_embedding(&item.embedding))
            .execute(&mut *tx)
            .await?;
        }

        for (key, value) in [
            ("embedding_model", embedding_model.to_string()),
            ("dimension", dimension.to_string()),
        ] {
            sqlx::query(
                "INSERT OR REPLACE INTO index_meta (key, value, updated_at)
                 VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indexed_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;
    use crate::index::{KeywordFilter, QualityTier};

    fn make_item(id: &str, position: u64, embedding: Vec<f32>, keywords: &[&str]) -> IndexedItem {
        let mut extra = Map::new();
        extra.insert("row_index".into(), Value::from(position));
        IndexedItem {
            id: id.to_string(),
            position,
            raw_text: format!("I feel {id}"),
            embedding,
            search_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            quality_buckets: QualityBuckets {
                high: vec![format!("high answer for {id}")],
                medium: Vec::new(),
                low: vec!["meh".into()],
            },
            extra,
        }
    }

    #[tokio::test]
    async fn write_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let store = SqliteIndexStore::create(&path).await.unwrap();
        store
            .replace_all(
                vec![
                    make_item("tired", 1, vec![0.0, 1.0], &["Sleep & Fatigue"]),
                    make_item("anxious", 0, vec![1.0, 0.0], &["Anxiety"]),
                ],
                "embed-v1",
            )
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let reopened = SqliteIndexStore::open(&path).await.unwrap();
        let snapshot = reopened.load_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.dimension(), 2);
        assert_eq!(snapshot.embedding_model(), Some("embed-v1"));
        assert_eq!(snapshot.items()[0].id, "anxious");

        let item = snapshot.get("tired").unwrap();
        assert_eq!(item.quality_buckets.tier(QualityTier::High), ["high answer for tired"]);
        assert_eq!(item.extra.get("row_index"), Some(&Value::from(1)));

        let results = snapshot
            .query(&[0.0, 1.0], &KeywordFilter::new(["Sleep & Fatigue"]), 5)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].similarity_score > 0.99);
    }

    #[tokio::test]
    async fn replace_all_discards_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::create(dir.path().join("index.db")).await.unwrap();

        store
            .replace_all(vec![make_item("a", 0, vec![1.0], &[])], "m1")
            .await
            .unwrap();
        store
            .replace_all(vec![make_item("b", 0, vec![1.0], &[])], "m2")
            .await
            .unwrap();

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("a").is_none());
        assert_eq!(snapshot.embedding_model(), Some("m2"));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteIndexStore::open(dir.path().join("absent.db"))
            .await
            .err()
            .expect("open should fail");
        assert!(matches!(err, IndexError::Missing(_)));
    }

    #[tokio::test]
    async fn attached_store_picks_up_database_built_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("later.db");
        let attached = SqliteIndexStore::attach(&path);

        let err = attached.load_snapshot().await.err().expect("nothing built yet");
        assert!(matches!(err, IndexError::Missing(_)));

        let builder = SqliteIndexStore::create(&path).await.unwrap();
        builder
            .replace_all(vec![make_item("calm", 0, vec![1.0, 0.0], &[])], "embed-v1")
            .await
            .unwrap();

        let snapshot = attached.load_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn database_without_tables_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        // A valid but empty SQLite database.
        drop(SqliteIndexStore::connect(path.clone(), true).await.unwrap());

        let err = SqliteIndexStore::open(&path).await.err().expect("open should fail");
        assert!(matches!(err, IndexError::Corrupt(_)));
    }

    #[tokio::test]
    async fn truncated_embedding_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteIndexStore::create(dir.path().join("index.db")).await.unwrap();
        store
            .replace_all(vec![make_item("a", 0, vec![1.0, 2.0], &[])], "m")
            .await
            .unwrap();

        sqlx::query("UPDATE indexed_items SET embedding = ?1 WHERE item_id = 'a'")
            .bind(vec![0u8, 1, 2])
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.load_snapshot().await.unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(_)));
    }
}
