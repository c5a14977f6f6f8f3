//! One-time import of item collections written by older app generations.

use serde_json::{Map, Value};
use tracing::info;

use crate::error::StoreResult;
use crate::models::{DEFAULT_ZONE, Item, new_id, now_millis};
use crate::records::RecordStore;

const UNNAMED: &str = "Sans nom";
const UNKNOWN_PLACE: &str = "—";

/// Normalizes a legacy item array to the current schema. Entries that are
/// not JSON objects are dropped.
pub fn migrate_legacy(legacy: &[Value]) -> Vec<Item> {
    legacy
        .iter()
        .filter(|entry| entry.is_object())
        .map(|entry| {
            let created_at = entry
                .get("createdAt")
                .and_then(Value::as_i64)
                .filter(|ts| *ts != 0)
                .unwrap_or_else(now_millis);
            Item {
                id: text(entry, "id").unwrap_or_else(new_id),
                name: text(entry, "name").unwrap_or_else(|| UNNAMED.to_string()),
                zone: text(entry, "zone").unwrap_or_else(|| DEFAULT_ZONE.to_string()),
                place: text(entry, "place").unwrap_or_else(|| UNKNOWN_PLACE.to_string()),
                brand: text(entry, "brand").unwrap_or_default(),
                reference: text(entry, "ref").unwrap_or_default(),
                buy_date: text(entry, "buyDate").unwrap_or_default(),
                note: text(entry, "note").unwrap_or_default(),
                created_at,
                extra: Map::new(),
            }
        })
        .collect()
}

// Non-empty string, or a number rendered as text (old ids were sometimes numeric).
fn text(entry: &Value, field: &str) -> Option<String> {
    match entry.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Adopts the first legacy key holding a non-empty array, but only while the
/// current collection is empty. Returns the key that was imported.
pub fn migrate_if_empty<'a>(
    records: &RecordStore,
    legacy_keys: &'a [String],
) -> StoreResult<Option<&'a str>> {
    if !records.load_items()?.is_empty() {
        return Ok(None);
    }

    for key in legacy_keys {
        let Some(Value::Array(old)) = records.load_json::<Value>(key)? else {
            continue;
        };
        if old.is_empty() {
            continue;
        }
        let migrated = migrate_legacy(&old);
        records.save_items(&migrated)?;
        info!(from = %key, to = records.items_key(), count = migrated.len(), "imported legacy items");
        return Ok(Some(key.as_str()));
    }

    Ok(None)
}
