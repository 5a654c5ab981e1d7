//! Durable key-value storage the chart registry is persisted in.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait KeyValueStore {
    type Error: std::error::Error + Send + Sync + 'static;
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, Self::Error>>;
    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), Self::Error>>;
}
