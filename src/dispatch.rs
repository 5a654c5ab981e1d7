//! Command handling: one command runs to completion before the next.
//!
//! Every handler funnels image work through [`Dispatcher::acquire`] and
//! [`Dispatcher::apply`], so fetching, validation and host upload happen in
//! one place regardless of whether the result creates, replaces or is only
//! probed.

use std::cell::RefCell;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::{
    Error, ErrorDetail,
    config::Config,
    fetch::{FetchedImage, ImageSource},
    host::{
        DocumentHost, ImageHandle, METADATA_KEY, NewPlaceholder, NotifyKind, Placeholder,
        UiChannel,
    },
    message::{ChartInfo, Command, CommandKind, Event, StatusType},
    normalize::{append_cache_buster, normalize},
    record::{ChartId, ChartRecord},
    registry::Registry,
    resolve::{self, Resolved, Resolver},
    store::KeyValueStore,
    validate::validate,
};

fn host_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> ErrorDetail {
    ErrorDetail::Host(Box::new(error))
}

fn encode_metadata(record: &ChartRecord) -> Option<String> {
    serde_json::to_string(record)
        .inspect_err(|error| warn!(id = %record.id, %error, "failed to encode chart metadata"))
        .ok()
}

/// Validated image bytes ready to be committed.
pub struct Acquired {
    pub image: FetchedImage,
    pub hash: blake3::Hash,
}

pub enum Action<'a> {
    Create { record: &'a ChartRecord },
    Replace { placeholder: &'a Placeholder },
    Probe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(Placeholder),
    Replaced,
    /// The fetched bytes hash to the placeholder's current fill.
    Unchanged,
    Probed { size: usize, content_type: String },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BulkSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct Dispatcher<H, S, F, U> {
    host: H,
    registry: Registry<S>,
    source: F,
    ui: U,
    config: Config,
    images: RefCell<IndexMap<blake3::Hash, ImageHandle>>,
}

impl<H, S, F, U> Dispatcher<H, S, F, U>
where
    H: DocumentHost,
    S: KeyValueStore,
    F: ImageSource,
    U: UiChannel,
{
    pub fn new(host: H, store: S, source: F, ui: U, config: Config) -> Self {
        let key = config.registry.storage_key(&host.document().document_id);
        Self {
            host,
            registry: Registry::new(store, key),
            source,
            ui,
            config,
            images: Default::default(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            legacy_name: &self.config.placeholder.legacy_name,
        }
    }

    /// Sends the initial chart list to the presentation layer.
    pub async fn start(&self) {
        if let Err(detail) = self.post_charts().await {
            self.report(Error::new(CommandKind::RefreshCharts, detail));
        }
    }

    pub fn selection_changed(&self) {
        self.ui.post(Event::SelectionChanged);
    }

    pub async fn dispatch(&self, command: Command) {
        let kind = command.kind();
        debug!(%kind, "dispatching command");
        if let Err(detail) = self.handle(command).await {
            self.report(Error::new(kind, detail));
        }
    }

    fn report(&self, error: Error) {
        error!(%error, "command failed");
        let message = error.detail.guidance();
        self.host.notify(&message, NotifyKind::Error);
        self.ui.post(Event::Error {
            message,
            context: Some(error.context),
            status_type: Some(StatusType::Error),
        });
    }

    fn complete(&self, kind: CommandKind, message: String, status_type: StatusType) {
        info!(%kind, %message, "command completed");
        self.ui.post(Event::Completion {
            message,
            context: Some(kind),
            status_type: Some(status_type),
        });
    }

    async fn handle(&self, command: Command) -> Result<(), ErrorDetail> {
        match command {
            Command::InsertChart { url, name } => self.insert(&url, name.as_deref()).await,
            Command::UpdateChart => self.update_selected().await,
            Command::UpdateAllCharts => self.update_all().await.map(|_| ()),
            Command::UpdateChartUrl { chart_id, new_url } => {
                self.change_url(&chart_id, &new_url).await
            }
            Command::UpdateChartName { chart_id, new_name } => {
                self.rename(&chart_id, &new_name).await
            }
            Command::DeleteChart { url } => self.delete(&url).await,
            Command::TestChartUrl { url } => self.test_url(&url).await,
            Command::GetSelectedChartInfo => self.selected_info().await,
            Command::RefreshCharts => self.post_charts().await,
        }
    }

    async fn post_charts(&self) -> Result<(), ErrorDetail> {
        let charts = self.registry.load().await?;
        self.ui.post(Event::LoadCharts {
            charts,
            file_context: Some(self.host.document()),
        });
        Ok(())
    }

    /// Normalize, fetch and validate. The cache buster is added after
    /// normalization and never reaches the validator's diagnostics.
    pub async fn acquire(&self, url: &str) -> Result<Acquired, ErrorDetail> {
        let normalized = normalize(url, &self.config.links)?;
        let target = if self.config.fetch.cache_bust {
            append_cache_buster(
                &normalized,
                &self.config.fetch.cache_bust_param,
                &Utc::now().timestamp_millis().to_string(),
            )
        } else {
            normalized.clone()
        };
        let image = self.source.fetch(&target).await?;
        validate(&image.bytes, &image.content_type, &normalized)?;
        Ok(Acquired {
            hash: blake3::hash(&image.bytes),
            image,
        })
    }

    /// Uploads bytes to the host once per distinct hash.
    async fn upload(&self, acquired: &Acquired) -> Result<ImageHandle, ErrorDetail> {
        if let Some(handle) = self.images.borrow().get(&acquired.hash) {
            debug!(hash = %acquired.hash, "reusing uploaded image");
            return Ok(handle.clone());
        }
        let key = self
            .host
            .create_image(&acquired.image.bytes)
            .await
            .map_err(host_error)?;
        let handle = ImageHandle {
            hash: acquired.hash,
            key,
        };
        self.images
            .borrow_mut()
            .insert(acquired.hash, handle.clone());
        Ok(handle)
    }

    pub async fn apply(
        &self,
        acquired: &Acquired,
        action: Action<'_>,
    ) -> Result<Outcome, ErrorDetail> {
        match action {
            Action::Probe => Ok(Outcome::Probed {
                size: acquired.image.bytes.len(),
                content_type: acquired.image.content_type.clone(),
            }),
            Action::Replace { placeholder } => {
                if placeholder
                    .fill
                    .as_ref()
                    .is_some_and(|fill| fill.hash == acquired.hash)
                {
                    debug!(node = %placeholder.node_id, "image unchanged");
                    return Ok(Outcome::Unchanged);
                }
                let image = self.upload(acquired).await?;
                self.host
                    .set_fill(&placeholder.node_id, &image)
                    .await
                    .map_err(host_error)?;
                Ok(Outcome::Replaced)
            }
            Action::Create { record } => {
                let image = self.upload(acquired).await?;
                let (cx, cy) = self.host.viewport_center();
                let width = self.config.placeholder.width;
                let height = self.config.placeholder.height;
                let placeholder = self
                    .host
                    .create_placeholder(NewPlaceholder {
                        name: record.placeholder_name(),
                        image,
                        x: cx - width / 2.0,
                        y: cy - height / 2.0,
                        width,
                        height,
                        metadata: encode_metadata(record),
                    })
                    .await
                    .map_err(host_error)?;
                self.host
                    .focus(&placeholder.node_id)
                    .await
                    .map_err(host_error)?;
                Ok(Outcome::Created(placeholder))
            }
        }
    }

    pub async fn run_pipeline(
        &self,
        url: &str,
        action: Action<'_>,
    ) -> Result<Outcome, ErrorDetail> {
        let acquired = self.acquire(url).await?;
        self.apply(&acquired, action).await
    }

    async fn single_selection(&self) -> Result<Placeholder, ErrorDetail> {
        let mut selection = self.host.selection().await.map_err(host_error)?;
        match selection.len() {
            0 => Err(ErrorDetail::Precondition(
                "Select a chart to update.".to_owned(),
            )),
            1 => Ok(selection.remove(0)),
            _ => Err(ErrorDetail::Precondition(
                "Select only one chart at a time.".to_owned(),
            )),
        }
    }

    /// Placeholders carrying `id` in their metadata or name.
    async fn tracked(&self, id: &ChartId) -> Result<Vec<Placeholder>, ErrorDetail> {
        Ok(self
            .host
            .placeholders()
            .await
            .map_err(host_error)?
            .into_iter()
            .filter(|placeholder| {
                resolve::embedded(placeholder).map(|record| record.id).as_ref() == Some(id)
                    || ChartId::from_name(&placeholder.name).as_ref() == Some(id)
            })
            .collect())
    }

    async fn insert(&self, url: &str, name: Option<&str>) -> Result<(), ErrorDetail> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ErrorDetail::Precondition(
                "Please enter a chart URL.".to_owned(),
            ));
        }
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.config.placeholder.default_name.as_str());
        let record = ChartRecord::new(url, name);
        let outcome = self.run_pipeline(url, Action::Create { record: &record }).await?;
        if let Outcome::Created(placeholder) = &outcome {
            debug!(node = %placeholder.node_id, id = %record.id, "chart placed");
        }
        self.registry.append(record.clone()).await?;

        let message = format!("Chart \"{}\" inserted.", record.display_name);
        self.host.notify(&message, NotifyKind::Info);
        self.complete(CommandKind::InsertChart, message, StatusType::Success);
        self.post_charts().await
    }

    /// Refreshes one resolved placeholder. `lastUpdated` is bumped whether or
    /// not the refresh succeeds.
    async fn refresh(
        &self,
        placeholder: &Placeholder,
        resolved: &Resolved,
    ) -> Result<Outcome, ErrorDetail> {
        let outcome = self
            .run_pipeline(&resolved.record.url, Action::Replace { placeholder })
            .await;
        self.registry
            .update(&resolved.record.id, ChartRecord::touch)
            .await?;
        if placeholder.metadata.is_some() {
            let mut record = resolved.record.clone();
            record.touch();
            if let Some(metadata) = encode_metadata(&record) {
                self.host
                    .set_metadata(&placeholder.node_id, METADATA_KEY, &metadata)
                    .await
                    .map_err(host_error)?;
            }
        }
        outcome
    }

    async fn update_selected(&self) -> Result<(), ErrorDetail> {
        let placeholder = self.single_selection().await?;
        let records = self.registry.load().await?;
        let resolved = self
            .resolver()
            .resolve(&placeholder, &records)
            .ok_or_else(|| ErrorDetail::NotFoundInRegistry(placeholder.name.clone()))?;

        let (message, status) = match self.refresh(&placeholder, &resolved).await? {
            Outcome::Unchanged => (
                format!(
                    "\"{}\" is unchanged; the chart image is already current.",
                    resolved.record.display_name
                ),
                StatusType::Info,
            ),
            _ => (
                format!("\"{}\" updated.", resolved.record.display_name),
                StatusType::Success,
            ),
        };
        self.host.notify(&message, NotifyKind::Info);
        self.complete(CommandKind::UpdateChart, message, status);
        self.post_charts().await
    }

    /// Refreshes every tracked placeholder, one at a time. A failing item is
    /// counted and skipped.
    pub async fn update_all(&self) -> Result<BulkSummary, ErrorDetail> {
        let records = self.registry.load().await?;
        let resolver = self.resolver();
        let candidates = self
            .host
            .placeholders()
            .await
            .map_err(host_error)?
            .into_iter()
            .filter_map(|placeholder| {
                let resolved = if self.config.placeholder.loose_match {
                    resolver.resolve_loose(&placeholder, &records)
                } else {
                    resolver.resolve(&placeholder, &records)
                }?;
                Some((placeholder, resolved))
            })
            .collect::<Vec<_>>();

        let mut summary = BulkSummary::default();
        if candidates.is_empty() {
            self.ui.post(Event::Status {
                message: "No charts found to update.".to_owned(),
                status_type: StatusType::Info,
            });
            return Ok(summary);
        }

        let total = candidates.len();
        self.ui.post(Event::ProgressStart {
            percentage: Some(0),
            message: format!("Updating {total} charts..."),
        });
        for (done, (placeholder, resolved)) in candidates.iter().enumerate() {
            match self.refresh(placeholder, resolved).await {
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Ok(_) => summary.updated += 1,
                Err(error) => {
                    warn!(
                        node = %placeholder.node_id,
                        id = %resolved.record.id,
                        %error,
                        "chart update failed"
                    );
                    summary.failed += 1;
                }
            }
            self.ui.post(Event::ProgressUpdate {
                percentage: Some(((done + 1) * 100 / total) as u8),
                message: format!("Updated {}/{total}: {}", done + 1, resolved.record.display_name),
            });
        }

        let message = format!(
            "Updated {} charts, {} unchanged, {} failed.",
            summary.updated, summary.unchanged, summary.failed
        );
        self.ui.post(Event::ProgressComplete {
            percentage: Some(100),
            message: message.clone(),
        });
        self.host.notify(&message, NotifyKind::Info);
        let status = if summary.failed == 0 {
            StatusType::Success
        } else {
            StatusType::Warning
        };
        self.complete(CommandKind::UpdateAllCharts, message, status);
        self.post_charts().await?;
        Ok(summary)
    }

    /// The new link is probed before anything is committed.
    async fn change_url(&self, id: &ChartId, new_url: &str) -> Result<(), ErrorDetail> {
        let new_url = new_url.trim();
        if new_url.is_empty() {
            return Err(ErrorDetail::Precondition(
                "Please enter a chart URL.".to_owned(),
            ));
        }
        if self.registry.find(id).await?.is_none() {
            return Err(ErrorDetail::NotFoundInRegistry(id.to_string()));
        }
        let acquired = self.acquire(new_url).await?;
        let record = self
            .registry
            .update(id, |record| {
                record.url = new_url.to_owned();
                record.touch();
            })
            .await?
            .ok_or_else(|| ErrorDetail::NotFoundInRegistry(id.to_string()))?;

        let tracked = self.tracked(id).await?;
        for placeholder in &tracked {
            self.apply(&acquired, Action::Replace { placeholder }).await?;
            if placeholder.metadata.is_some()
                && let Some(metadata) = encode_metadata(&record)
            {
                self.host
                    .set_metadata(&placeholder.node_id, METADATA_KEY, &metadata)
                    .await
                    .map_err(host_error)?;
            }
        }

        self.complete(
            CommandKind::UpdateChartUrl,
            format!(
                "Link for \"{}\" updated; {} layer(s) refreshed.",
                record.display_name,
                tracked.len()
            ),
            StatusType::Success,
        );
        self.post_charts().await
    }

    async fn rename(&self, id: &ChartId, new_name: &str) -> Result<(), ErrorDetail> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(ErrorDetail::Precondition(
                "Chart name cannot be empty.".to_owned(),
            ));
        }
        let record = self
            .registry
            .update(id, |record| record.display_name = new_name.to_owned())
            .await?
            .ok_or_else(|| ErrorDetail::NotFoundInRegistry(id.to_string()))?;

        let name = record.placeholder_name();
        for placeholder in self.tracked(id).await? {
            self.host
                .rename(&placeholder.node_id, &name)
                .await
                .map_err(host_error)?;
            if placeholder.metadata.is_some()
                && let Some(metadata) = encode_metadata(&record)
            {
                self.host
                    .set_metadata(&placeholder.node_id, METADATA_KEY, &metadata)
                    .await
                    .map_err(host_error)?;
            }
        }

        self.complete(
            CommandKind::UpdateChartName,
            format!("Chart renamed to \"{new_name}\"."),
            StatusType::Success,
        );
        self.post_charts().await
    }

    /// Drops the record from the registry. Placeholders already in the
    /// document are left as they are.
    async fn delete(&self, url: &str) -> Result<(), ErrorDetail> {
        let removed = self.registry.remove_by_url(url).await?;
        if removed == 0 {
            return Err(ErrorDetail::NotFoundInRegistry(url.to_owned()));
        }
        self.complete(
            CommandKind::DeleteChart,
            "Chart removed from the list.".to_owned(),
            StatusType::Success,
        );
        self.post_charts().await
    }

    async fn test_url(&self, url: &str) -> Result<(), ErrorDetail> {
        if url.trim().is_empty() {
            return Err(ErrorDetail::Precondition(
                "Please enter a chart URL.".to_owned(),
            ));
        }
        if let Outcome::Probed { size, content_type } =
            self.run_pipeline(url, Action::Probe).await?
        {
            let content_type = if content_type.is_empty() {
                "image/png"
            } else {
                content_type.as_str()
            };
            self.complete(
                CommandKind::TestChartUrl,
                format!("Chart link works ({size} bytes, {content_type})."),
                StatusType::Success,
            );
        }
        Ok(())
    }

    async fn selected_info(&self) -> Result<(), ErrorDetail> {
        let selection = self.host.selection().await.map_err(host_error)?;
        let chart_info = match selection.as_slice() {
            [placeholder] => {
                let records = self.registry.load().await?;
                self.resolver()
                    .resolve(placeholder, &records)
                    .map(|resolved| ChartInfo {
                        record: resolved.record,
                        node_id: placeholder.node_id.clone(),
                        resolved_by: resolved.by,
                    })
            }
            _ => None,
        };
        self.ui.post(Event::SelectedChartInfo { chart_info });
        Ok(())
    }
}
