//! Local storage for a personal inventory: items filed under a zone and a
//! place, the zone/place hierarchy, and the documents and photo attached to
//! each item.
//!
//! Small collections live as JSON documents in a synchronous key/value
//! store ([`RecordStore`]); binary payloads live in an asynchronous blob
//! store ([`BlobStore`]). [`Inventory`] opens both and enforces the rules
//! that span them.

pub mod blobs;
pub mod config;
pub mod error;
pub mod inventory;
pub mod migrate;
pub mod models;
pub mod records;
pub mod session;
mod sqlite;

pub use blobs::BlobStore;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use inventory::Inventory;
pub use models::{FileRecord, Item, NewFile, NewPhoto, PhotoRecord, Places};
pub use records::RecordStore;
pub use session::{FormSession, ItemDraft, PlaceChoice, SessionError};
