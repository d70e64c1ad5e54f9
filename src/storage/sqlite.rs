//! SQLite storage implementation

use std::path::Path;

use async_trait::async_trait;
use sqlx::{sqlite::{SqlitePool, SqlitePoolOptions}, Row};
use anyhow::{Result, Context};
use tracing::{info, debug};

use super::traits::{FaceStore, FaceRecord};
use crate::utils::math::{embedding_from_bytes, embedding_to_bytes};

/// SQLite-based face storage
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) a SQLite store at `db_path`
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", db_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let storage = Self { pool };
        storage.initialize().await?;

        Ok(storage)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS faces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                folder_id TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite database initialized");
        Ok(())
    }
}

#[async_trait]
impl FaceStore for SqliteStorage {
    async fn insert_batch(&self, records: &[FaceRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO faces (file_id, file_name, folder_id, embedding)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&record.file_id)
            .bind(&record.file_name)
            .bind(&record.folder_id)
            .bind(embedding_to_bytes(&record.embedding))
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit face batch")?;

        debug!("Inserted {} faces", inserted);
        Ok(inserted)
    }

    async fn load_all(&self) -> Result<Vec<FaceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_id, file_name, folder_id, embedding
            FROM faces
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<FaceRecord> {
                let id: i64 = row.get("id");
                let blob: Vec<u8> = row.get("embedding");
                let embedding = embedding_from_bytes(&blob).with_context(|| {
                    format!("Face row {} has a {}-byte embedding blob", id, blob.len())
                })?;

                Ok(FaceRecord {
                    id: Some(id),
                    file_id: row.get("file_id"),
                    file_name: row.get("file_name"),
                    folder_id: row.get("folder_id"),
                    embedding,
                })
            })
            .collect()
    }

    async fn count_faces(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM faces")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_storage() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("faces.db");
        let storage = SqliteStorage::new(db_path.to_str().unwrap()).await.unwrap();

        assert_eq!(storage.count_faces().await.unwrap(), 0);

        let records = vec![
            FaceRecord::new("file-a", "a.jpg", "folder-1", vec![1.0, 2.0, 3.0, 4.0]),
            FaceRecord::new("file-a", "a.jpg", "folder-1", vec![0.5, 0.0, -1.0, 2.0]),
            FaceRecord::new("file-b", "b.arw", "", vec![-1.0, 0.25, 0.0, 8.0]),
        ];

        let inserted = storage.insert_batch(&records).await.unwrap();
        assert_eq!(inserted, 3);
        assert_eq!(storage.count_faces().await.unwrap(), 3);

        let loaded = storage.load_all().await.unwrap();
        assert_eq!(loaded.len(), 3);
        for (stored, original) in loaded.iter().zip(records.iter()) {
            assert!(stored.id.is_some());
            assert_eq!(stored.file_id, original.file_id);
            assert_eq!(stored.file_name, original.file_name);
            assert_eq!(stored.folder_id, original.folder_id);
            assert_eq!(stored.embedding, original.embedding);
        }

        // Ids are assigned in insertion order
        let ids: Vec<i64> = loaded.iter().filter_map(|r| r.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_reinsert_appends_duplicates() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("faces.db");
        let storage = SqliteStorage::new(db_path.to_str().unwrap()).await.unwrap();

        let record = FaceRecord::new("file-a", "a.jpg", "folder-1", vec![1.0, 0.0]);
        storage.insert_batch(&[record.clone()]).await.unwrap();
        storage.insert_batch(&[record]).await.unwrap();

        assert_eq!(storage.count_faces().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("faces.db");
        let path = db_path.to_str().unwrap();

        {
            let storage = SqliteStorage::new(path).await.unwrap();
            storage
                .insert_batch(&[FaceRecord::new("f", "f.png", "d", vec![0.0, 1.0])])
                .await
                .unwrap();
        }

        let storage = SqliteStorage::new(path).await.unwrap();
        assert_eq!(storage.count_faces().await.unwrap(), 1);
    }
}
