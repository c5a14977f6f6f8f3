//! Entry point tying the record and blob stores together.

use tracing::info;

use crate::blobs::BlobStore;
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::migrate::migrate_if_empty;
use crate::models::{DEFAULT_ZONE, Item, Places, new_id};
use crate::records::RecordStore;
use crate::session::{FormSession, PlaceChoice};

pub struct Inventory {
    config: StoreConfig,
    records: RecordStore,
    blobs: BlobStore,
}

impl Inventory {
    /// Opens both stores, seeds the default places on first run and imports
    /// legacy items when the current collection is empty.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        let records = RecordStore::open(&config)?;
        if !records.has_places()? {
            records.save_places(&Places::defaults())?;
        }
        migrate_if_empty(&records, &config.legacy_item_keys)?;

        let blobs = BlobStore::open(&config).await?;
        info!(data_dir = %config.data_dir.display(), "inventory opened");

        Ok(Self {
            config,
            records,
            blobs,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn items(&self) -> StoreResult<Vec<Item>> {
        self.records.load_items()
    }

    pub fn places(&self) -> StoreResult<Places> {
        self.records.load_places()
    }

    pub fn get_item(&self, item_id: &str) -> StoreResult<Option<Item>> {
        Ok(self
            .records
            .load_items()?
            .into_iter()
            .find(|item| item.id == item_id))
    }

    pub fn search(&self, query: &str) -> StoreResult<Vec<Item>> {
        Ok(self
            .records
            .load_items()?
            .into_iter()
            .filter(|item| item.matches(query))
            .collect())
    }

    pub async fn docs_count(&self, item_id: &str) -> StoreResult<usize> {
        self.blobs.count_files_by_item(item_id).await
    }

    /// Removes the item's files and photo, then the item itself. Returns
    /// whether the item was in the collection.
    pub async fn delete_item(&self, item_id: &str) -> StoreResult<bool> {
        let files = self.blobs.delete_files_by_item(item_id).await?;
        let photo = self.blobs.delete_photo_by_item(item_id).await?;

        let mut items = self.records.load_items()?;
        let before = items.len();
        items.retain(|item| item.id != item_id);
        let existed = items.len() != before;
        if existed {
            self.records.save_items(&items)?;
        }
        info!(item_id, files, photo, existed, "deleted item");
        Ok(existed)
    }

    /// Wipes items, places and every blob, then restores the default places.
    pub async fn reset_all(&self) -> StoreResult<()> {
        self.records.remove(self.records.items_key())?;
        self.records.remove(self.records.places_key())?;
        self.blobs.clear().await?;
        self.records.save_places(&Places::defaults())?;
        info!("inventory reset");
        Ok(())
    }

    /// Starts a creation form under a fresh temporary id.
    pub fn open_new_form(&self) -> FormSession {
        FormSession::create(new_id(), DEFAULT_ZONE)
    }

    pub fn open_edit_form(&self, item_id: &str) -> StoreResult<Option<FormSession>> {
        let Some(item) = self.get_item(item_id)? else {
            return Ok(None);
        };
        let places = self.records.load_places()?;

        let zone = if places.contains_zone(&item.zone) {
            item.zone.clone()
        } else {
            DEFAULT_ZONE.to_string()
        };
        let place = if places.contains_place(&zone, &item.place) {
            PlaceChoice::Listed(item.place.clone())
        } else if item.place.is_empty() {
            PlaceChoice::Unset
        } else {
            PlaceChoice::Other(item.place.clone())
        };

        Ok(Some(FormSession::edit(&item, zone, place)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFile;
    use tempfile::TempDir;

    async fn open_inventory() -> (TempDir, Inventory) {
        let dir = tempfile::tempdir().unwrap();
        let inventory = Inventory::open(StoreConfig::in_dir(dir.path()))
            .await
            .unwrap();
        (dir, inventory)
    }

    fn pdf(name: &str) -> NewFile {
        NewFile {
            name: name.to_string(),
            mime_type: Some("application/pdf".to_string()),
            last_modified: None,
            payload: vec![0x25, 0x50, 0x44, 0x46],
        }
    }

    #[tokio::test]
    async fn open_seeds_default_places() {
        let (_dir, inventory) = open_inventory().await;
        assert!(inventory.records().has_places().unwrap());
        assert_eq!(inventory.places().unwrap(), Places::defaults());
        assert!(inventory.items().unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_imports_legacy_items() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::in_dir(dir.path());
        {
            let records = RecordStore::open(&config).unwrap();
            records
                .store_raw("garagemate_items_v1", r#"[{"name": "Brouette"}]"#)
                .unwrap();
        }

        let inventory = Inventory::open(config).await.unwrap();
        let items = inventory.items().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Brouette");
        assert_eq!(items[0].zone, "Garage");
    }

    #[tokio::test]
    async fn delete_item_cascades_to_blobs() {
        let (_dir, inventory) = open_inventory().await;
        let mut form = inventory.open_new_form();
        form.draft.name = "Ponceuse".to_string();
        form.choose_place("Établi");
        for name in ["facture.pdf", "notice.pdf", "garantie.pdf"] {
            form.attach_file(&inventory, pdf(name)).await.unwrap();
        }
        let item = form.save(&inventory).await.unwrap();
        inventory
            .blobs()
            .upsert_photo_for_item(&item.id, vec![1, 2], "p.jpg", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(inventory.docs_count(&item.id).await.unwrap(), 3);

        assert!(inventory.delete_item(&item.id).await.unwrap());
        assert_eq!(inventory.docs_count(&item.id).await.unwrap(), 0);
        assert!(inventory.blobs().list_files_by_item(&item.id).await.unwrap().is_empty());
        assert_eq!(inventory.blobs().get_photo_by_item(&item.id).await.unwrap(), None);
        assert_eq!(inventory.get_item(&item.id).unwrap(), None);
    }

    #[tokio::test]
    async fn delete_unknown_item_still_purges_blobs() {
        let (_dir, inventory) = open_inventory().await;
        inventory
            .blobs()
            .upsert_photo_for_item("ghost", vec![1], "p.jpg", "image/jpeg")
            .await
            .unwrap();

        assert!(!inventory.delete_item("ghost").await.unwrap());
        assert_eq!(inventory.blobs().get_photo_by_item("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn search_filters_items() {
        let (_dir, inventory) = open_inventory().await;
        let mut drill = Item::new("a", "Perceuse", "Garage", "Établi");
        drill.brand = "Bosch".to_string();
        let saw = Item::new("b", "Scie", "Abri jardin", "Mur");
        inventory.records().save_items(&[drill, saw]).unwrap();

        let hits: Vec<_> = inventory
            .search("bosch")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(hits, ["a"]);
        assert_eq!(inventory.search("").unwrap().len(), 2);
        assert_eq!(inventory.search("jardin").unwrap()[0].id, "b");
    }

    #[tokio::test]
    async fn reset_all_wipes_everything() {
        let (_dir, inventory) = open_inventory().await;
        let mut places = inventory.places().unwrap();
        places.ensure_place("Container", "Palette");
        inventory.records().save_places(&places).unwrap();
        inventory
            .records()
            .save_items(&[Item::new("a", "Perceuse", "Garage", "Établi")])
            .unwrap();
        inventory
            .blobs()
            .put_file(crate::models::FileRecord::new("a", pdf("x.pdf")))
            .await
            .unwrap();

        inventory.reset_all().await.unwrap();
        assert!(inventory.items().unwrap().is_empty());
        assert_eq!(inventory.places().unwrap(), Places::defaults());
        assert_eq!(inventory.docs_count("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn edit_form_maps_unknown_place_to_other() {
        let (_dir, inventory) = open_inventory().await;
        inventory
            .records()
            .save_items(&[
                Item::new("a", "Perceuse", "Garage", "Établi"),
                Item::new("b", "Pompe", "Cave", "Coin"),
            ])
            .unwrap();

        let form = inventory.open_edit_form("a").unwrap().unwrap();
        assert!(!form.is_new());
        assert_eq!(form.zone(), Some("Garage"));
        assert_eq!(form.place(), &PlaceChoice::Listed("Établi".to_string()));

        let form = inventory.open_edit_form("b").unwrap().unwrap();
        assert_eq!(form.zone(), Some("Garage"));
        assert_eq!(form.place(), &PlaceChoice::Other("Coin".to_string()));

        assert!(inventory.open_edit_form("missing").unwrap().is_none());
    }
}
