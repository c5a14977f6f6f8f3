//! Asynchronous store for item attachments and photos.
//!
//! Records live in their own SQLite file with two tables: `files` (many per
//! item) and `photos` (at most one per item, keyed by `photo_<itemId>`).
//! Calls run on the blocking pool and are awaited by the caller.

use std::sync::Arc;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{FileRecord, PhotoRecord, now_millis, photo_key};
use crate::sqlite::{Database, Migration};

static BLOB_MIGRATIONS: &[Migration] = &[migrate_to_v1, migrate_to_v2];

fn migrate_to_v1(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            last_modified INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            payload BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_files_item_id ON files(item_id);
        CREATE INDEX IF NOT EXISTS idx_files_created_at ON files(created_at);
        "#,
    )?;
    Ok(())
}

fn migrate_to_v2(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            payload BLOB NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_photos_item_id ON photos(item_id);
        "#,
    )?;
    Ok(())
}

const FILE_COLUMNS: &str = "id, item_id, name, mime_type, size, last_modified, created_at, payload";
const PHOTO_COLUMNS: &str = "id, item_id, name, mime_type, created_at, payload";

#[derive(Clone)]
pub struct BlobStore {
    db: Arc<Database>,
    max_blob_bytes: Option<usize>,
}

impl BlobStore {
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        let path = config.blobs_path();
        let db = tokio::task::spawn_blocking(move || Database::open(&path, BLOB_MIGRATIONS))
            .await
            .map_err(|err| StoreError::Unavailable(format!("blob store open task failed: {err}")))?
            .map_err(StoreError::from_anyhow)?;
        info!(path = %db.path().display(), "blob store ready");

        Ok(Self {
            db: Arc::new(db),
            max_blob_bytes: config.max_blob_bytes,
        })
    }

    async fn with_db<T, F>(&self, operation: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || operation(&db))
            .await
            .map_err(|err| StoreError::Unavailable(format!("blob store task failed: {err}")))?
            .map_err(StoreError::from_anyhow)
    }

    fn check_payload(&self, name: &str, len: usize) -> StoreResult<()> {
        match self.max_blob_bytes {
            Some(limit) if len > limit => Err(StoreError::QuotaExceeded(format!(
                "'{name}' is {len} bytes, limit is {limit}"
            ))),
            _ => Ok(()),
        }
    }

    pub async fn schema_version(&self) -> StoreResult<i64> {
        self.with_db(|db| db.schema_version()).await
    }

    /// Insert or replace by id.
    pub async fn put_file(&self, record: FileRecord) -> StoreResult<()> {
        self.check_payload(&record.name, record.payload.len())?;
        debug!(file_id = %record.id, item_id = %record.item_id, size = record.size, "put file");
        self.with_db(move |db| db.run(|conn| insert_file(conn, &record)))
            .await
    }

    pub async fn get_file(&self, file_id: &str) -> StoreResult<Option<FileRecord>> {
        let file_id = file_id.to_string();
        self.with_db(move |db| {
            db.run(|conn| {
                let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1");
                Ok(conn.query_row(&sql, [&file_id], file_from_row).optional()?)
            })
        })
        .await
    }

    pub async fn delete_file(&self, file_id: &str) -> StoreResult<bool> {
        let file_id = file_id.to_string();
        self.with_db(move |db| {
            db.run(|conn| Ok(conn.execute("DELETE FROM files WHERE id = ?1", [&file_id])? > 0))
        })
        .await
    }

    /// Files owned by `item_id`, in storage order.
    pub async fn list_files_by_item(&self, item_id: &str) -> StoreResult<Vec<FileRecord>> {
        let item_id = item_id.to_string();
        self.with_db(move |db| db.run(|conn| files_for_item(conn, &item_id)))
            .await
    }

    pub async fn list_files_newest_first(&self, item_id: &str) -> StoreResult<Vec<FileRecord>> {
        let mut files = self.list_files_by_item(item_id).await?;
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }

    pub async fn count_files_by_item(&self, item_id: &str) -> StoreResult<usize> {
        let item_id = item_id.to_string();
        self.with_db(move |db| {
            db.run(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM files WHERE item_id = ?1",
                    [&item_id],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
        })
        .await
    }

    /// Deletes every file owned by `item_id`, one record at a time. Stops at
    /// the first failure; files deleted before it stay deleted.
    pub async fn delete_files_by_item(&self, item_id: &str) -> StoreResult<usize> {
        let files = self.list_files_by_item(item_id).await?;
        let mut deleted = 0;
        for file in &files {
            if self.delete_file(&file.id).await? {
                deleted += 1;
            }
        }
        debug!(item_id, deleted, "deleted item files");
        Ok(deleted)
    }

    /// Stores the photo for `item_id` under its derived key, replacing any
    /// earlier one. Returns the record id.
    pub async fn upsert_photo_for_item(
        &self,
        item_id: &str,
        payload: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> StoreResult<String> {
        self.check_payload(name, payload.len())?;
        let record = PhotoRecord {
            id: photo_key(item_id),
            item_id: item_id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            created_at: now_millis(),
            payload,
        };
        debug!(photo_id = %record.id, size = record.payload.len(), "upsert photo");
        self.with_db(move |db| {
            db.run(|conn| {
                conn.execute(
                    "INSERT INTO photos(id, item_id, name, mime_type, created_at, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        mime_type = excluded.mime_type,
                        created_at = excluded.created_at,
                        payload = excluded.payload",
                    params![
                        record.id,
                        record.item_id,
                        record.name,
                        record.mime_type,
                        record.created_at,
                        record.payload
                    ],
                )?;
                Ok(record.id.clone())
            })
        })
        .await
    }

    pub async fn get_photo_by_item(&self, item_id: &str) -> StoreResult<Option<PhotoRecord>> {
        let item_id = item_id.to_string();
        self.with_db(move |db| {
            db.run(|conn| {
                let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE item_id = ?1");
                Ok(conn.query_row(&sql, [&item_id], photo_from_row).optional()?)
            })
        })
        .await
    }

    /// Returns `false` when the item had no photo.
    pub async fn delete_photo_by_item(&self, item_id: &str) -> StoreResult<bool> {
        let Some(photo) = self.get_photo_by_item(item_id).await? else {
            return Ok(false);
        };
        self.with_db(move |db| {
            db.run(|conn| Ok(conn.execute("DELETE FROM photos WHERE id = ?1", [&photo.id])? > 0))
        })
        .await
    }

    pub async fn list_all_photos(&self) -> StoreResult<Vec<PhotoRecord>> {
        self.with_db(|db| {
            db.run(|conn| {
                let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos ORDER BY item_id");
                let mut stmt = conn.prepare(&sql)?;
                let photos = stmt
                    .query_map([], photo_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(photos)
            })
        })
        .await
    }

    /// Empties both tables.
    pub async fn clear(&self) -> StoreResult<()> {
        self.with_db(|db| {
            db.run(|conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute("DELETE FROM files", [])?;
                tx.execute("DELETE FROM photos", [])?;
                tx.commit()?;
                Ok(())
            })
        })
        .await
    }
}

fn insert_file(conn: &Connection, record: &FileRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO files(id, item_id, name, mime_type, size, last_modified, created_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            item_id = excluded.item_id,
            name = excluded.name,
            mime_type = excluded.mime_type,
            size = excluded.size,
            last_modified = excluded.last_modified,
            created_at = excluded.created_at,
            payload = excluded.payload",
        params![
            record.id,
            record.item_id,
            record.name,
            record.mime_type,
            i64::try_from(record.size).unwrap_or(i64::MAX),
            record.last_modified,
            record.created_at,
            record.payload
        ],
    )?;
    Ok(())
}

fn files_for_item(conn: &Connection, item_id: &str) -> Result<Vec<FileRecord>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE item_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map([item_id], file_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(4)?;
    Ok(FileRecord {
        id: row.get(0)?,
        item_id: row.get(1)?,
        name: row.get(2)?,
        mime_type: row.get(3)?,
        size: u64::try_from(size).unwrap_or(0),
        last_modified: row.get(5)?,
        created_at: row.get(6)?,
        payload: row.get(7)?,
    })
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.get(0)?,
        item_id: row.get(1)?,
        name: row.get(2)?,
        mime_type: row.get(3)?,
        created_at: row.get(4)?,
        payload: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFile;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(&StoreConfig::in_dir(dir.path()))
            .await
            .unwrap();
        (dir, store)
    }

    fn doc(item_id: &str, name: &str, created_at: i64) -> FileRecord {
        let mut record = FileRecord::new(
            item_id,
            NewFile {
                name: name.to_string(),
                mime_type: Some("application/pdf".to_string()),
                last_modified: Some(1_600_000_000_000),
                payload: name.as_bytes().to_vec(),
            },
        );
        record.created_at = created_at;
        record
    }

    #[tokio::test]
    async fn file_put_get_delete() {
        let (_dir, store) = open_store().await;
        let record = doc("item-1", "facture.pdf", 10);

        store.put_file(record.clone()).await.unwrap();
        assert_eq!(store.get_file(&record.id).await.unwrap(), Some(record.clone()));

        assert!(store.delete_file(&record.id).await.unwrap());
        assert_eq!(store.get_file(&record.id).await.unwrap(), None);
        assert!(!store.delete_file(&record.id).await.unwrap());
    }

    #[tokio::test]
    async fn put_file_replaces_by_id() {
        let (_dir, store) = open_store().await;
        let mut record = doc("item-1", "notice.pdf", 10);
        store.put_file(record.clone()).await.unwrap();

        record.name = "notice-v2.pdf".to_string();
        store.put_file(record.clone()).await.unwrap();

        let files = store.list_files_by_item("item-1").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "notice-v2.pdf");
    }

    #[tokio::test]
    async fn files_are_scoped_by_item() {
        let (_dir, store) = open_store().await;
        store.put_file(doc("a", "old.pdf", 10)).await.unwrap();
        store.put_file(doc("a", "new.pdf", 30)).await.unwrap();
        store.put_file(doc("a", "mid.pdf", 20)).await.unwrap();
        store.put_file(doc("b", "other.pdf", 40)).await.unwrap();

        assert_eq!(store.count_files_by_item("a").await.unwrap(), 3);
        let names: Vec<_> = store
            .list_files_newest_first("a")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, ["new.pdf", "mid.pdf", "old.pdf"]);

        assert_eq!(store.delete_files_by_item("a").await.unwrap(), 3);
        assert!(store.list_files_by_item("a").await.unwrap().is_empty());
        assert_eq!(store.count_files_by_item("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_by_item_surfaces_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        let store = BlobStore::open(&config).await.unwrap();
        store.put_file(doc("item-1", "a.pdf", 1)).await.unwrap();
        store.put_file(doc("item-1", "b.pdf", 2)).await.unwrap();
        {
            let conn = Connection::open(config.blobs_path()).unwrap();
            conn.execute_batch(
                "CREATE TRIGGER refuse_b BEFORE DELETE ON files WHEN old.name = 'b.pdf'
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();
        }

        let err = store.delete_files_by_item("item-1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)), "{err:?}");
        let left: Vec<_> = store
            .list_files_by_item("item-1")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert!(left.contains(&"b.pdf".to_string()));
    }

    #[tokio::test]
    async fn photo_upsert_keeps_one_record_per_item() {
        let (_dir, store) = open_store().await;
        let first = store
            .upsert_photo_for_item("item-1", vec![1, 2, 3], "a.jpg", "image/jpeg")
            .await
            .unwrap();
        let second = store
            .upsert_photo_for_item("item-1", vec![9, 9], "b.png", "image/png")
            .await
            .unwrap();
        store
            .upsert_photo_for_item("item-2", vec![7], "c.jpg", "image/jpeg")
            .await
            .unwrap();

        assert_eq!(first, "photo_item-1");
        assert_eq!(first, second);

        let photos = store.list_all_photos().await.unwrap();
        let for_item: Vec<_> = photos.iter().filter(|p| p.item_id == "item-1").collect();
        assert_eq!(for_item.len(), 1);
        assert_eq!(for_item[0].payload, vec![9, 9]);
        assert_eq!(for_item[0].name, "b.png");
        assert_eq!(for_item[0].mime_type, "image/png");
    }

    #[tokio::test]
    async fn photo_lookup_and_delete() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.get_photo_by_item("item-1").await.unwrap(), None);
        assert!(!store.delete_photo_by_item("item-1").await.unwrap());

        store
            .upsert_photo_for_item("item-1", vec![1], "a.jpg", "image/jpeg")
            .await
            .unwrap();
        let photo = store.get_photo_by_item("item-1").await.unwrap().unwrap();
        assert_eq!(photo.id, "photo_item-1");

        assert!(store.delete_photo_by_item("item-1").await.unwrap());
        assert_eq!(store.get_photo_by_item("item-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_payload_is_quota_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::in_dir(dir.path());
        config.max_blob_bytes = Some(4);
        let store = BlobStore::open(&config).await.unwrap();

        let err = store.put_file(doc("a", "too-big.pdf", 1)).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        let err = store
            .upsert_photo_for_item("a", vec![0; 5], "big.jpg", "image/jpeg")
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(store.list_files_by_item("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_empties_both_tables() {
        let (_dir, store) = open_store().await;
        store.put_file(doc("a", "x.pdf", 1)).await.unwrap();
        store
            .upsert_photo_for_item("a", vec![1], "a.jpg", "image/jpeg")
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.count_files_by_item("a").await.unwrap(), 0);
        assert!(store.list_all_photos().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upgrade_from_files_only_schema_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        {
            let conn = Connection::open(config.blobs_path()).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE schema_version (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    version INTEGER NOT NULL
                );
                INSERT INTO schema_version(id, version) VALUES (1, 1);
                CREATE TABLE files (
                    id TEXT PRIMARY KEY,
                    item_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    mime_type TEXT NOT NULL,
                    size INTEGER NOT NULL DEFAULT 0,
                    last_modified INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL,
                    payload BLOB NOT NULL
                );
                INSERT INTO files VALUES ('f1', 'item-1', 'old.pdf', 'application/pdf', 3, 0, 5, x'010203');
                "#,
            )
            .unwrap();
        }

        let store = BlobStore::open(&config).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), 2);
        let kept = store.get_file("f1").await.unwrap().unwrap();
        assert_eq!(kept.payload, vec![1, 2, 3]);
        store
            .upsert_photo_for_item("item-1", vec![4], "p.jpg", "image/jpeg")
            .await
            .unwrap();
        drop(store);

        let reopened = BlobStore::open(&config).await.unwrap();
        assert_eq!(reopened.schema_version().await.unwrap(), 2);
        assert_eq!(reopened.count_files_by_item("item-1").await.unwrap(), 1);
        assert!(reopened.get_photo_by_item("item-1").await.unwrap().is_some());
    }
}
