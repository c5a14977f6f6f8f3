//! Synchronous key/value store for whole-collection JSON documents.

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{Item, Places};
use crate::sqlite::{Database, Migration};

static RECORD_MIGRATIONS: &[Migration] = &[migrate_to_v1];

fn migrate_to_v1(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

pub struct RecordStore {
    db: Database,
    items_key: String,
    places_key: String,
}

impl RecordStore {
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let db = Database::open(&config.records_path(), RECORD_MIGRATIONS)
            .map_err(StoreError::from_anyhow)?;
        Ok(Self {
            db,
            items_key: config.items_key.clone(),
            places_key: config.places_key.clone(),
        })
    }

    pub fn items_key(&self) -> &str {
        &self.items_key
    }

    pub fn places_key(&self) -> &str {
        &self.places_key
    }

    pub fn load_raw(&self, key: &str) -> StoreResult<Option<String>> {
        self.db
            .run(|conn| get_record(conn, key))
            .map_err(StoreError::from_anyhow)
    }

    pub fn store_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        self.db
            .run(|conn| set_record(conn, key, value))
            .map_err(StoreError::from_anyhow)
    }

    pub fn remove(&self, key: &str) -> StoreResult<bool> {
        self.db
            .run(|conn| Ok(conn.execute("DELETE FROM records WHERE key = ?1", [key])? > 0))
            .map_err(StoreError::from_anyhow)
    }

    /// Absent keys and unparseable contents both come back as `None`.
    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let Some(raw) = self.load_raw(key)? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key, error = %err, "stored JSON is unreadable, using default");
                Ok(None)
            }
        }
    }

    pub fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        debug!(key, bytes = raw.len(), "saving record");
        self.store_raw(key, &raw)
    }

    pub fn load_items(&self) -> StoreResult<Vec<Item>> {
        Ok(self.load_json(&self.items_key)?.unwrap_or_default())
    }

    pub fn save_items(&self, items: &[Item]) -> StoreResult<()> {
        self.save_json(&self.items_key, items)
    }

    pub fn load_places(&self) -> StoreResult<Places> {
        let persisted: Option<Map<String, Value>> = self.load_json(&self.places_key)?;
        Ok(match persisted {
            Some(map) => Places::merged_with_defaults(map),
            None => Places::defaults(),
        })
    }

    pub fn save_places(&self, places: &Places) -> StoreResult<()> {
        self.save_json(&self.places_key, places)
    }

    pub fn has_places(&self) -> StoreResult<bool> {
        Ok(self.load_raw(&self.places_key)?.is_some())
    }
}

fn get_record(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM records WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn set_record(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO records(key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
