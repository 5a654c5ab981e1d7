use std::{collections::HashMap, convert::Infallible};

use crate::store::KeyValueStore;

#[derive(Default)]
pub struct MemoryStore {
    map: tokio::sync::Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl KeyValueStore for MemoryStore {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), Self::Error> {
        self.map.lock().await.insert(key.to_owned(), value);
        Ok(())
    }
}
