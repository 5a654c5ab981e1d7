//! Capabilities consumed from the document-editing host.

mod local;

pub use local::{Error as LocalError, LocalDocument, RecordingChannel, StdoutChannel};

use crate::message::{Event, FileContext};

/// Key under which a chart record is embedded on a placeholder.
pub const METADATA_KEY: &str = "chartData";

/// An image uploaded to the host, addressed by the hash of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub hash: blake3::Hash,
    pub key: String,
}

/// A rectangular node whose fill shows a chart image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub node_id: String,
    pub name: String,
    /// Raw `chartData` metadata, when present.
    pub metadata: Option<String>,
    pub fill: Option<ImageHandle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPlaceholder {
    pub name: String,
    pub image: ImageHandle,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Info,
    Error,
}

pub trait DocumentHost {
    type Error: std::error::Error + Send + Sync + 'static;

    fn document(&self) -> FileContext;
    fn selection(&self) -> impl Future<Output = Result<Vec<Placeholder>, Self::Error>>;
    /// Every image placeholder on every page, in document order.
    fn placeholders(&self) -> impl Future<Output = Result<Vec<Placeholder>, Self::Error>>;
    fn viewport_center(&self) -> (f64, f64);
    /// Uploads image bytes and returns the host's key for them.
    fn create_image(&self, bytes: &[u8]) -> impl Future<Output = Result<String, Self::Error>>;
    fn create_placeholder(
        &self,
        placeholder: NewPlaceholder,
    ) -> impl Future<Output = Result<Placeholder, Self::Error>>;
    fn set_fill(
        &self,
        node_id: &str,
        image: &ImageHandle,
    ) -> impl Future<Output = Result<(), Self::Error>>;
    fn rename(&self, node_id: &str, name: &str) -> impl Future<Output = Result<(), Self::Error>>;
    fn set_metadata(
        &self,
        node_id: &str,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;
    /// Scrolls the viewport to the node and selects it.
    fn focus(&self, node_id: &str) -> impl Future<Output = Result<(), Self::Error>>;
    fn notify(&self, message: &str, kind: NotifyKind);
}

/// Channel to the presentation layer.
pub trait UiChannel {
    fn post(&self, event: Event);
}
