//! State of one open item editing form.
//!
//! A creation form allocates its item id up front so documents can be
//! attached before the item exists; saving reuses that id, cancelling purges
//! whatever was written under it. The photo of a new item stays in memory
//! until the item is saved.

use serde_json::Map;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::inventory::Inventory;
use crate::models::{FileRecord, Item, NewFile, NewPhoto, now_millis};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("item name must not be empty")]
    MissingName,
    #[error("no zone selected")]
    MissingZone,
    #[error("no place selected")]
    MissingPlace,
    #[error("custom place must not be empty")]
    MissingOtherPlace,
    #[error("item not found: {0}")]
    ItemNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Free-text fields of the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDraft {
    pub name: String,
    pub brand: String,
    pub reference: String,
    pub buy_date: String,
    pub note: String,
}

impl From<&Item> for ItemDraft {
    fn from(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            brand: item.brand.clone(),
            reference: item.reference.clone(),
            buy_date: item.buy_date.clone(),
            note: item.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceChoice {
    Unset,
    /// A place already listed under the selected zone.
    Listed(String),
    /// Typed by the user; added to the zone on save.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Edit,
}

#[derive(Debug)]
pub struct FormSession {
    item_id: String,
    mode: Mode,
    zone: Option<String>,
    place: PlaceChoice,
    pending_photo: Option<NewPhoto>,
    pub draft: ItemDraft,
}

impl FormSession {
    pub(crate) fn create(temp_id: String, zone: &str) -> Self {
        debug!(temp_id = %temp_id, "opened creation form");
        Self {
            item_id: temp_id,
            mode: Mode::Create,
            zone: Some(zone.to_string()),
            place: PlaceChoice::Unset,
            pending_photo: None,
            draft: ItemDraft::default(),
        }
    }

    pub(crate) fn edit(item: &Item, zone: String, place: PlaceChoice) -> Self {
        Self {
            item_id: item.id.clone(),
            mode: Mode::Edit,
            zone: Some(zone),
            place,
            pending_photo: None,
            draft: ItemDraft::from(item),
        }
    }

    /// Id documents are written under; the temporary id for a new item.
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn is_new(&self) -> bool {
        self.mode == Mode::Create
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn place(&self) -> &PlaceChoice {
        &self.place
    }

    pub fn pending_photo(&self) -> Option<&NewPhoto> {
        self.pending_photo.as_ref()
    }

    /// Switching zone clears the place.
    pub fn choose_zone(&mut self, zone: impl Into<String>) {
        self.zone = Some(zone.into());
        self.place = PlaceChoice::Unset;
    }

    pub fn choose_place(&mut self, place: impl Into<String>) {
        self.place = PlaceChoice::Listed(place.into());
    }

    pub fn choose_other_place(&mut self, typed: impl Into<String>) {
        self.place = PlaceChoice::Other(typed.into());
    }

    pub async fn attach_file(
        &self,
        inventory: &Inventory,
        file: NewFile,
    ) -> Result<FileRecord, SessionError> {
        let record = FileRecord::new(self.item_id.clone(), file);
        inventory.blobs().put_file(record.clone()).await?;
        Ok(record)
    }

    pub async fn set_photo(
        &mut self,
        inventory: &Inventory,
        photo: NewPhoto,
    ) -> Result<(), SessionError> {
        match self.mode {
            Mode::Create => self.pending_photo = Some(photo),
            Mode::Edit => {
                inventory
                    .blobs()
                    .upsert_photo_for_item(&self.item_id, photo.payload, &photo.name, &photo.mime_type)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn remove_photo(&mut self, inventory: &Inventory) -> Result<(), SessionError> {
        match self.mode {
            Mode::Create => self.pending_photo = None,
            Mode::Edit => {
                inventory.blobs().delete_photo_by_item(&self.item_id).await?;
            }
        }
        Ok(())
    }

    /// Validates the form, grows the place hierarchy when the chosen place is
    /// not listed yet, persists the item and commits any pending photo.
    pub async fn save(self, inventory: &Inventory) -> Result<Item, SessionError> {
        let name = self.draft.name.trim();
        if name.is_empty() {
            return Err(SessionError::MissingName);
        }
        let zone = match self.zone.as_deref().map(str::trim) {
            Some(zone) if !zone.is_empty() => zone.to_string(),
            _ => return Err(SessionError::MissingZone),
        };
        let place = self.resolve_place(inventory, &zone)?;

        let records = inventory.records();
        let mut items = records.load_items()?;
        let saved = match self.mode {
            Mode::Edit => {
                let Some(item) = items.iter_mut().find(|item| item.id == self.item_id) else {
                    return Err(SessionError::ItemNotFound(self.item_id));
                };
                item.name = name.to_string();
                item.zone = zone;
                item.place = place;
                item.brand = self.draft.brand.trim().to_string();
                item.reference = self.draft.reference.trim().to_string();
                item.buy_date = self.draft.buy_date.trim().to_string();
                item.note = self.draft.note.trim().to_string();
                item.clone()
            }
            Mode::Create => {
                let item = Item {
                    id: self.item_id.clone(),
                    name: name.to_string(),
                    zone,
                    place,
                    brand: self.draft.brand.trim().to_string(),
                    reference: self.draft.reference.trim().to_string(),
                    buy_date: self.draft.buy_date.trim().to_string(),
                    note: self.draft.note.trim().to_string(),
                    created_at: now_millis(),
                    extra: Map::new(),
                };
                items.insert(0, item.clone());
                item
            }
        };
        records.save_items(&items)?;

        if let Some(photo) = self.pending_photo {
            inventory
                .blobs()
                .upsert_photo_for_item(&saved.id, photo.payload, &photo.name, &photo.mime_type)
                .await?;
        }

        info!(item_id = %saved.id, created = self.mode == Mode::Create, "saved item");
        Ok(saved)
    }

    /// Any place missing from `places[zone]` is appended and persisted,
    /// whether it was typed or picked.
    fn resolve_place(&self, inventory: &Inventory, zone: &str) -> Result<String, SessionError> {
        let place = match &self.place {
            PlaceChoice::Unset => return Err(SessionError::MissingPlace),
            PlaceChoice::Listed(place) => match place.trim() {
                "" => return Err(SessionError::MissingPlace),
                place => place,
            },
            PlaceChoice::Other(typed) => match typed.trim() {
                "" => return Err(SessionError::MissingOtherPlace),
                typed => typed,
            },
        };

        let mut places = inventory.records().load_places()?;
        if places.ensure_place(zone, place) {
            inventory.records().save_places(&places)?;
            debug!(zone, place, "added place to hierarchy");
        }
        Ok(place.to_string())
    }

    /// Closes the form without saving. For a new item every document and
    /// photo written under the temporary id is deleted.
    pub async fn cancel(self, inventory: &Inventory) -> Result<(), SessionError> {
        if self.mode == Mode::Create {
            let blobs = inventory.blobs();
            let files = blobs.delete_files_by_item(&self.item_id).await?;
            blobs.delete_photo_by_item(&self.item_id).await?;
            debug!(temp_id = %self.item_id, files, "discarded creation form");
        }
        Ok(())
    }
}
