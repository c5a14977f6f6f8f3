use crate::sqlite::{SchemaUpgradeFailed, is_storage_full};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage full: {0}")]
    QuotaExceeded(String),
    #[error("schema upgrade failed: {0}")]
    Schema(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Classifies an error coming out of the SQLite layer.
    pub(crate) fn from_anyhow(err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        if err.downcast_ref::<SchemaUpgradeFailed>().is_some() {
            return StoreError::Schema(message);
        }
        if is_storage_full(&err) {
            return StoreError::QuotaExceeded(message);
        }
        StoreError::Unavailable(message)
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Serialization(value.to_string())
    }
}
