//! The persisted list of chart records for one document (or installation).
//!
//! Every operation reads the stored list afresh, so nothing is cached across
//! awaited I/O.

use tracing::{debug, trace};

use crate::{
    BoxError,
    record::{ChartId, ChartRecord},
    store::KeyValueStore,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("store ({key}): {error}")]
    Store { key: String, error: BoxError },
    #[error("decode ({key}): {error}")]
    Decode {
        key: String,
        error: serde_json::Error,
    },
    #[error("encode ({key}): {error}")]
    Encode {
        key: String,
        error: serde_json::Error,
    },
}

pub struct Registry<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> Registry<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    fn store_error(&self, error: S::Error) -> RegistryError {
        RegistryError::Store {
            key: self.key.clone(),
            error: Box::new(error),
        }
    }

    /// Records in insertion order. A missing key is an empty registry.
    pub async fn load(&self) -> Result<Vec<ChartRecord>, RegistryError> {
        let Some(raw) = self
            .store
            .get(&self.key)
            .await
            .map_err(|error| self.store_error(error))?
        else {
            trace!(key = %self.key, "registry is empty");
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|error| RegistryError::Decode {
            key: self.key.clone(),
            error,
        })
    }

    pub async fn save(&self, records: &[ChartRecord]) -> Result<(), RegistryError> {
        let raw = serde_json::to_string(records).map_err(|error| RegistryError::Encode {
            key: self.key.clone(),
            error,
        })?;
        self.store
            .set(&self.key, raw)
            .await
            .map_err(|error| self.store_error(error))?;
        debug!(key = %self.key, count = records.len(), "registry saved");
        Ok(())
    }

    pub async fn find(&self, id: &ChartId) -> Result<Option<ChartRecord>, RegistryError> {
        Ok(self.load().await?.into_iter().find(|record| &record.id == id))
    }

    pub async fn append(&self, record: ChartRecord) -> Result<(), RegistryError> {
        let mut records = self.load().await?;
        records.push(record);
        self.save(&records).await
    }

    /// Applies `f` to the record with `id` and persists the result. Returns
    /// the updated record, or `None` when no record has that id.
    pub async fn update<F>(&self, id: &ChartId, f: F) -> Result<Option<ChartRecord>, RegistryError>
    where
        F: FnOnce(&mut ChartRecord),
    {
        let mut records = self.load().await?;
        let Some(record) = records.iter_mut().find(|record| &record.id == id) else {
            return Ok(None);
        };
        f(record);
        let updated = record.clone();
        self.save(&records).await?;
        Ok(Some(updated))
    }

    /// Removes every record whose url is `url`, returning how many went.
    pub async fn remove_by_url(&self, url: &str) -> Result<usize, RegistryError> {
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|record| record.url != url);
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records).await?;
        }
        Ok(removed)
    }
}
