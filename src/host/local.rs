use std::{cell::RefCell, collections::HashMap, io::Write as _};

use indexmap::IndexMap;
use tracing::{error, trace};

use crate::{
    host::{DocumentHost, ImageHandle, NewPlaceholder, NotifyKind, Placeholder, UiChannel},
    message::{Event, FileContext},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("unknown image: {0}")]
    UnknownImage(String),
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    name: String,
    metadata: HashMap<String, String>,
    fill: Option<ImageHandle>,
    bounds: (f64, f64, f64, f64),
}

impl Node {
    fn placeholder(&self) -> Placeholder {
        Placeholder {
            node_id: self.id.clone(),
            name: self.name.clone(),
            metadata: self.metadata.get(super::METADATA_KEY).cloned(),
            fill: self.fill.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    selection: Vec<String>,
    images: IndexMap<String, Box<[u8]>>,
    notifications: Vec<(NotifyKind, String)>,
    next_id: usize,
}

impl State {
    fn node_mut(&mut self, node_id: &str) -> Result<&mut Node, Error> {
        self.nodes
            .iter_mut()
            .find(|node| node.id == node_id)
            .ok_or_else(|| Error::UnknownNode(node_id.to_owned()))
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("1:{}", self.next_id)
    }
}

/// In-memory document used by the command line front end and tests.
pub struct LocalDocument {
    context: FileContext,
    state: RefCell<State>,
}

impl LocalDocument {
    pub fn new(document_id: impl Into<String>, document_name: impl Into<String>) -> Self {
        Self {
            context: FileContext {
                document_id: document_id.into(),
                document_name: document_name.into(),
            },
            state: Default::default(),
        }
    }

    /// Adds a placeholder the way an older release (or a copy/paste) would
    /// have left it. Returns its node id.
    pub fn add_placeholder(
        &self,
        name: impl Into<String>,
        metadata: Option<String>,
        image: Option<&[u8]>,
    ) -> String {
        let mut state = self.state.borrow_mut();
        let id = state.allocate_id();
        let fill = image.map(|bytes| {
            let hash = blake3::hash(bytes);
            let key = hash.to_hex().to_string();
            state.images.insert(key.clone(), bytes.into());
            ImageHandle { hash, key }
        });
        state.nodes.push(Node {
            id: id.clone(),
            name: name.into(),
            metadata: metadata
                .into_iter()
                .map(|value| (super::METADATA_KEY.to_owned(), value))
                .collect(),
            fill,
            bounds: (0.0, 0.0, 0.0, 0.0),
        });
        id
    }

    pub fn select(&self, node_ids: &[&str]) {
        self.state.borrow_mut().selection = node_ids.iter().map(|id| (*id).to_owned()).collect();
    }

    pub fn placeholder(&self, node_id: &str) -> Option<Placeholder> {
        self.state
            .borrow()
            .nodes
            .iter()
            .find(|node| node.id == node_id)
            .map(Node::placeholder)
    }

    #[cfg(test)]
    pub(crate) fn bounds(&self, node_id: &str) -> Option<(f64, f64, f64, f64)> {
        self.state
            .borrow()
            .nodes
            .iter()
            .find(|node| node.id == node_id)
            .map(|node| node.bounds)
    }

    pub fn image_count(&self) -> usize {
        self.state.borrow().images.len()
    }

    pub fn notifications(&self) -> Vec<(NotifyKind, String)> {
        self.state.borrow().notifications.clone()
    }
}

impl DocumentHost for LocalDocument {
    type Error = Error;

    fn document(&self) -> FileContext {
        self.context.clone()
    }

    async fn selection(&self) -> Result<Vec<Placeholder>, Self::Error> {
        let state = self.state.borrow();
        Ok(state
            .selection
            .iter()
            .filter_map(|id| state.nodes.iter().find(|node| &node.id == id))
            .map(Node::placeholder)
            .collect())
    }

    async fn placeholders(&self) -> Result<Vec<Placeholder>, Self::Error> {
        Ok(self
            .state
            .borrow()
            .nodes
            .iter()
            .filter(|node| node.fill.is_some())
            .map(Node::placeholder)
            .collect())
    }

    fn viewport_center(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    async fn create_image(&self, bytes: &[u8]) -> Result<String, Self::Error> {
        let key = blake3::hash(bytes).to_hex().to_string();
        self.state
            .borrow_mut()
            .images
            .entry(key.clone())
            .or_insert_with(|| bytes.into());
        Ok(key)
    }

    async fn create_placeholder(
        &self,
        placeholder: NewPlaceholder,
    ) -> Result<Placeholder, Self::Error> {
        let mut state = self.state.borrow_mut();
        if !state.images.contains_key(&placeholder.image.key) {
            return Err(Error::UnknownImage(placeholder.image.key));
        }
        let node = Node {
            id: state.allocate_id(),
            name: placeholder.name,
            metadata: placeholder
                .metadata
                .into_iter()
                .map(|value| (super::METADATA_KEY.to_owned(), value))
                .collect(),
            fill: Some(placeholder.image),
            bounds: (
                placeholder.x,
                placeholder.y,
                placeholder.width,
                placeholder.height,
            ),
        };
        trace!(id = %node.id, name = %node.name, "placeholder created");
        let created = node.placeholder();
        state.nodes.push(node);
        Ok(created)
    }

    async fn set_fill(&self, node_id: &str, image: &ImageHandle) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if !state.images.contains_key(&image.key) {
            return Err(Error::UnknownImage(image.key.clone()));
        }
        state.node_mut(node_id)?.fill = Some(image.clone());
        Ok(())
    }

    async fn rename(&self, node_id: &str, name: &str) -> Result<(), Self::Error> {
        self.state.borrow_mut().node_mut(node_id)?.name = name.to_owned();
        Ok(())
    }

    async fn set_metadata(&self, node_id: &str, key: &str, value: &str) -> Result<(), Self::Error> {
        self.state
            .borrow_mut()
            .node_mut(node_id)?
            .metadata
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn focus(&self, node_id: &str) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.node_mut(node_id)?;
        state.selection = vec![node_id.to_owned()];
        Ok(())
    }

    fn notify(&self, message: &str, kind: NotifyKind) {
        self.state
            .borrow_mut()
            .notifications
            .push((kind, message.to_owned()));
    }
}

/// Keeps every posted event, for inspection.
#[derive(Default)]
pub struct RecordingChannel {
    events: RefCell<Vec<Event>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl UiChannel for RecordingChannel {
    fn post(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

/// Writes each event as one JSON line on stdout.
pub struct StdoutChannel;

impl UiChannel for StdoutChannel {
    fn post(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(error) => {
                error!(%error, ?event, "failed to encode event");
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(error) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
            error!(%error, "failed to write event");
        }
    }
}
