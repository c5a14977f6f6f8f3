use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_ZONE: &str = "Garage";
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
pub const PHOTO_KEY_PREFIX: &str = "photo_";

static DEFAULT_PLACES: Lazy<Places> = Lazy::new(|| {
    let mut zones = IndexMap::new();
    zones.insert(
        DEFAULT_ZONE.to_string(),
        [
            "Servante noire",
            "Servante grise",
            "Étage bois",
            "Étagère métal",
            "Armoire simple",
            "Armoire double",
            "Servante rouge 1",
            "Servante rouge 2",
            "Établi",
            "Armoire établi",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    );
    for zone in ["Abri jardin", "Container", "Extérieur", "Véhicule"] {
        zones.insert(zone.to_string(), Vec::new());
    }
    Places(zones)
});

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Key of the single photo record an item may own.
pub fn photo_key(item_id: &str) -> String {
    format!("{PHOTO_KEY_PREFIX}{item_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub place: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default, rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub buy_date: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub created_at: i64,
    /// Fields this version does not know about, kept so that saving does not
    /// drop data written by other app generations.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        zone: impl Into<String>,
        place: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            zone: zone.into(),
            place: place.into(),
            brand: String::new(),
            reference: String::new(),
            buy_date: String::new(),
            note: String::new(),
            created_at: now_millis(),
            extra: Map::new(),
        }
    }

    pub fn place_label(&self) -> String {
        let or_dash = |s: &str| if s.is_empty() { "—".to_string() } else { s.to_string() };
        format!("{} > {}", or_dash(&self.zone), or_dash(&self.place))
    }

    /// Case-insensitive substring match over every text field.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [
            &self.name,
            &self.zone,
            &self.place,
            &self.brand,
            &self.reference,
            &self.buy_date,
            &self.note,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Zone name to ordered place names. Zones keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Places(IndexMap<String, Vec<String>>);

impl Places {
    pub fn defaults() -> Self {
        DEFAULT_PLACES.clone()
    }

    /// Overlays persisted zones on the defaults. A zone stored as an array
    /// replaces the default list wholesale; anything else is ignored, except
    /// that an unknown zone still becomes selectable with no places.
    pub fn merged_with_defaults(persisted: Map<String, Value>) -> Self {
        let mut merged = Self::defaults();
        for (zone, value) in persisted {
            match value {
                Value::Array(entries) => {
                    let places = entries
                        .into_iter()
                        .filter_map(|entry| match entry {
                            Value::String(place) => Some(place),
                            _ => None,
                        })
                        .collect();
                    merged.0.insert(zone, places);
                }
                _ => {
                    merged.0.entry(zone).or_default();
                }
            }
        }
        merged
    }

    pub fn zone(&self, zone: &str) -> Option<&[String]> {
        self.0.get(zone).map(Vec::as_slice)
    }

    pub fn contains_zone(&self, zone: &str) -> bool {
        self.0.contains_key(zone)
    }

    pub fn contains_place(&self, zone: &str, place: &str) -> bool {
        self.zone(zone)
            .is_some_and(|places| places.iter().any(|p| p == place))
    }

    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Appends `place` to `zone` unless already listed. Returns whether the
    /// hierarchy grew.
    pub fn ensure_place(&mut self, zone: &str, place: &str) -> bool {
        let places = self.0.entry(zone.to_string()).or_default();
        if places.iter().any(|p| p == place) {
            return false;
        }
        places.push(place.to_string());
        true
    }
}

/// A document attached to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    pub item_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub last_modified: i64,
    pub created_at: i64,
    pub payload: Vec<u8>,
}

/// Caller-supplied document before it is bound to an item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub last_modified: Option<i64>,
    pub payload: Vec<u8>,
}

impl FileRecord {
    pub fn new(item_id: impl Into<String>, file: NewFile) -> Self {
        Self {
            id: new_id(),
            item_id: item_id.into(),
            name: file.name,
            mime_type: file
                .mime_type
                .filter(|mime| !mime.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size: file.payload.len() as u64,
            last_modified: file.last_modified.unwrap_or(0),
            created_at: now_millis(),
            payload: file.payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    pub id: String,
    pub item_id: String,
    pub name: String,
    pub mime_type: String,
    pub created_at: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPhoto {
    pub name: String,
    pub mime_type: String,
    pub payload: Vec<u8>,
}
