use std::{cell::RefCell, collections::HashMap};

use bytes::Bytes;

use crate::{
    config::{Config, RegistryScope},
    dispatch::{BulkSummary, Dispatcher},
    fetch::{FetchError, FetchedImage, ImageSource, NetworkError},
    host::{DocumentHost as _, LocalDocument, METADATA_KEY, NotifyKind, RecordingChannel},
    message::{Command, CommandKind, Event, ResolvedBy, StatusType},
    record::{ChartId, ChartRecord},
    store::{KeyValueStore, MemoryStore, SqliteStore},
    validate::PNG_MAGIC,
};

/// Serves canned responses keyed by URL prefix, so cache busting parameters
/// do not need to be predicted.
#[derive(Default)]
struct ScriptedSource {
    responses: RefCell<HashMap<String, Result<FetchedImage, u16>>>,
    requests: RefCell<Vec<String>>,
}

impl ScriptedSource {
    fn serve(&self, url: &str, content_type: &str, bytes: &[u8]) {
        self.responses.borrow_mut().insert(
            url.to_owned(),
            Ok(FetchedImage {
                bytes: Bytes::copy_from_slice(bytes),
                content_type: content_type.to_owned(),
            }),
        );
    }

    fn fail(&self, url: &str, status: u16) {
        self.responses
            .borrow_mut()
            .insert(url.to_owned(), Err(status));
    }
}

impl ImageSource for &ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        self.requests.borrow_mut().push(url.to_owned());
        let responses = self.responses.borrow();
        let (_, response) = responses
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .unwrap_or_else(|| panic!("unexpected fetch: {url}"));
        response.clone().map_err(|status| {
            FetchError::Status(NetworkError {
                status,
                status_text: "Not Found".to_owned(),
                url: url.to_owned(),
            })
        })
    }
}

fn png(tail: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(tail);
    bytes
}

const Q1_URL: &str = "https://x/pubchart?oid=1";
const Q1_IMAGE: &str = "https://x/pubchart?oid=1&format=image";
const Q2_URL: &str = "https://x/pubchart?oid=2";
const Q2_IMAGE: &str = "https://x/pubchart?oid=2&format=image";

type TestDispatcher<'s> =
    Dispatcher<LocalDocument, MemoryStore, &'s ScriptedSource, RecordingChannel>;

fn dispatcher(source: &ScriptedSource) -> TestDispatcher<'_> {
    Dispatcher::new(
        LocalDocument::new("doc1", "Quarterly review"),
        MemoryStore::new(),
        source,
        RecordingChannel::new(),
        Config::default(),
    )
}

fn last_outcome(events: &[Event]) -> &Event {
    events
        .iter()
        .rev()
        .find(|event| matches!(event, Event::Completion { .. } | Event::Error { .. }))
        .expect("an outcome event")
}

async fn insert<S: KeyValueStore>(
    dispatcher: &Dispatcher<LocalDocument, S, &ScriptedSource, RecordingChannel>,
    url: &str,
    name: &str,
) -> ChartRecord {
    dispatcher
        .dispatch(Command::InsertChart {
            url: url.into(),
            name: Some(name.into()),
        })
        .await;
    dispatcher.ui().take();
    dispatcher
        .registry()
        .load()
        .await
        .unwrap()
        .into_iter()
        .last()
        .unwrap()
}

#[tokio::test]
async fn insert_creates_record_and_named_placeholder() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);

    dispatcher
        .dispatch(Command::InsertChart {
            url: format!("  {Q1_URL} "),
            name: Some("Q1".into()),
        })
        .await;

    let requests = source.requests.borrow().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with(&format!("{Q1_IMAGE}&t=")));

    let records = dispatcher.registry().load().await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.url, Q1_URL);
    assert_eq!(record.display_name, "Q1");
    assert!(record.id.as_str().starts_with("chart_"));

    let selection = dispatcher.host().selection().await.unwrap();
    assert_eq!(selection.len(), 1);
    let placeholder = &selection[0];
    assert_eq!(placeholder.name, format!("Q1 ({})", record.id));
    let embedded: ChartRecord =
        serde_json::from_str(placeholder.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(&embedded, record);
    assert_eq!(
        placeholder.fill.as_ref().unwrap().hash,
        blake3::hash(&png(b"q1"))
    );
    assert_eq!(
        dispatcher.host().bounds(&placeholder.node_id),
        Some((-200.0, -150.0, 400.0, 300.0))
    );

    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Completion {
            context: Some(CommandKind::InsertChart),
            status_type: Some(StatusType::Success),
            ..
        }
    ));
    assert!(matches!(
        events.last(),
        Some(Event::LoadCharts { charts, file_context: Some(context) })
            if charts.len() == 1 && context.document_id == "doc1"
    ));
}

#[tokio::test]
async fn insert_without_name_uses_default() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);

    dispatcher
        .dispatch(Command::InsertChart {
            url: Q1_URL.into(),
            name: Some("   ".into()),
        })
        .await;
    let records = dispatcher.registry().load().await.unwrap();
    assert_eq!(records[0].display_name, "Google Sheets Chart");
}

#[tokio::test]
async fn insert_rejects_non_image_content_without_committing() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "text/html", b"<html>  <body>Sign in</body></html>");
    let dispatcher = dispatcher(&source);

    dispatcher
        .dispatch(Command::InsertChart {
            url: Q1_URL.into(),
            name: None,
        })
        .await;

    assert!(dispatcher.registry().load().await.unwrap().is_empty());
    assert!(dispatcher.host().placeholders().await.unwrap().is_empty());
    let events = dispatcher.ui().take();
    let Event::Error {
        message, context, ..
    } = last_outcome(&events)
    else {
        panic!("expected an error");
    };
    assert_eq!(*context, Some(CommandKind::InsertChart));
    assert!(message.contains("text/html"));
    assert!(matches!(
        dispatcher.host().notifications().last(),
        Some((NotifyKind::Error, _))
    ));
}

#[tokio::test]
async fn insert_of_unsupported_link_asks_to_publish() {
    let source = ScriptedSource::default();
    let dispatcher = dispatcher(&source);

    dispatcher
        .dispatch(Command::InsertChart {
            url: "https://docs.google.com/spreadsheets/d/abc/edit".into(),
            name: None,
        })
        .await;

    assert!(source.requests.borrow().is_empty());
    let events = dispatcher.ui().take();
    let Event::Error { message, .. } = last_outcome(&events) else {
        panic!("expected an error");
    };
    assert!(message.contains("publish"));
}

#[tokio::test]
async fn update_with_identical_image_reports_unchanged() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);
    let record = insert(&dispatcher, Q1_URL, "Q1").await;
    let stale = "2020-01-01T00:00:00Z".parse().unwrap();
    dispatcher
        .registry()
        .update(&record.id, |record| record.last_updated = stale)
        .await
        .unwrap();
    let before = dispatcher.host().selection().await.unwrap().remove(0);

    dispatcher.dispatch(Command::UpdateChart).await;

    let events = dispatcher.ui().take();
    let Event::Completion {
        message,
        status_type,
        ..
    } = last_outcome(&events)
    else {
        panic!("expected completion, got {events:?}");
    };
    assert_eq!(*status_type, Some(StatusType::Info));
    assert!(message.contains("unchanged"));

    let after = dispatcher.host().placeholder(&before.node_id).unwrap();
    assert_eq!(after.fill, before.fill);
    let refreshed = dispatcher.registry().find(&record.id).await.unwrap().unwrap();
    assert!(refreshed.last_updated > stale);
    let embedded: ChartRecord =
        serde_json::from_str(after.metadata.as_deref().unwrap()).unwrap();
    assert!(embedded.last_updated >= record.last_updated);
}

#[tokio::test]
async fn update_replaces_fill_when_image_changes() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);
    insert(&dispatcher, Q1_URL, "Q1").await;
    source.serve(Q1_IMAGE, "image/png", &png(b"q1 v2"));

    dispatcher.dispatch(Command::UpdateChart).await;

    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Completion {
            status_type: Some(StatusType::Success),
            ..
        }
    ));
    let placeholder = dispatcher.host().selection().await.unwrap().remove(0);
    assert_eq!(
        placeholder.fill.unwrap().hash,
        blake3::hash(&png(b"q1 v2"))
    );
}

#[tokio::test]
async fn update_needs_exactly_one_tracked_selection() {
    let source = ScriptedSource::default();
    let dispatcher = dispatcher(&source);

    dispatcher.dispatch(Command::UpdateChart).await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { message, context: Some(CommandKind::UpdateChart), .. }
            if message == "Select a chart to update."
    ));

    let logo = dispatcher
        .host()
        .add_placeholder("Logo", None, Some(png(b"logo").as_slice()));
    dispatcher.host().select(&[logo.as_str()]);
    dispatcher.dispatch(Command::UpdateChart).await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { message, .. } if message.contains("not linked")
    ));
}

#[tokio::test]
async fn update_leaves_legacy_layer_of_another_chart_alone() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);
    insert(&dispatcher, Q1_URL, "Revenue").await;
    let old = png(b"legacy");
    let legacy = dispatcher
        .host()
        .add_placeholder("Google Sheets Chart", None, Some(old.as_slice()));
    dispatcher.host().select(&[legacy.as_str()]);

    dispatcher.dispatch(Command::UpdateChart).await;

    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { message, context: Some(CommandKind::UpdateChart), .. }
            if message.contains("not linked")
    ));
    let placeholder = dispatcher.host().placeholder(&legacy).unwrap();
    assert_eq!(placeholder.fill.unwrap().hash, blake3::hash(&old));
}

#[tokio::test]
async fn network_failures_map_to_status_guidance() {
    let source = ScriptedSource::default();
    source.fail(Q1_IMAGE, 404);
    let dispatcher = dispatcher(&source);

    dispatcher
        .dispatch(Command::TestChartUrl { url: Q1_URL.into() })
        .await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { message, context: Some(CommandKind::TestChartUrl), .. }
            if message.contains("404")
    ));
}

#[tokio::test]
async fn test_url_probes_without_mutation() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "", &png(b"probe"));
    let dispatcher = dispatcher(&source);

    dispatcher
        .dispatch(Command::TestChartUrl { url: Q1_URL.into() })
        .await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Completion { context: Some(CommandKind::TestChartUrl), .. }
    ));
    assert!(dispatcher.registry().load().await.unwrap().is_empty());
    assert_eq!(dispatcher.host().image_count(), 0);
}

#[tokio::test]
async fn update_all_counts_updated_unchanged_and_failed() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    source.serve(Q2_IMAGE, "image/png", &png(b"q2"));
    let dispatcher = dispatcher(&source);
    insert(&dispatcher, Q1_URL, "Q1").await;
    insert(&dispatcher, Q2_URL, "Q2").await;
    // Left behind by a release without ids; loosely matched to the first record.
    dispatcher
        .host()
        .add_placeholder("Revenue Chart", None, Some(png(b"old").as_slice()));
    dispatcher
        .host()
        .add_placeholder("Logo", None, Some(png(b"logo").as_slice()));
    source.fail(Q2_IMAGE, 404);

    let summary = dispatcher.update_all().await.unwrap();
    assert_eq!(
        summary,
        BulkSummary {
            updated: 1,
            unchanged: 1,
            failed: 1
        }
    );

    let events = dispatcher.ui().take();
    let updates = events
        .iter()
        .filter(|event| matches!(event, Event::ProgressUpdate { .. }))
        .count();
    assert_eq!(updates, 3);
    assert!(matches!(events.first(), Some(Event::ProgressStart { .. })));
    assert!(matches!(
        last_outcome(&events),
        Event::Completion {
            status_type: Some(StatusType::Warning),
            ..
        }
    ));
}

#[tokio::test]
async fn update_all_without_loose_matching_skips_legacy_layers() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let mut config = Config::default();
    config.placeholder.loose_match = false;
    let dispatcher = Dispatcher::new(
        LocalDocument::new("doc1", "Quarterly review"),
        MemoryStore::new(),
        &source,
        RecordingChannel::new(),
        config,
    );
    insert(&dispatcher, Q1_URL, "Q1").await;
    dispatcher
        .host()
        .add_placeholder("Revenue Chart", None, Some(png(b"old").as_slice()));

    let summary = dispatcher.update_all().await.unwrap();
    assert_eq!(summary.unchanged + summary.updated + summary.failed, 1);
}

#[tokio::test]
async fn update_all_uploads_identical_images_once() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);
    let record = insert(&dispatcher, Q1_URL, "Q1").await;
    let metadata = serde_json::to_string(&record).unwrap();
    dispatcher.host().add_placeholder(
        record.placeholder_name(),
        Some(metadata),
        Some(png(b"a").as_slice()),
    );
    dispatcher
        .host()
        .add_placeholder(record.placeholder_name(), None, Some(png(b"b").as_slice()));
    source.serve(Q1_IMAGE, "image/png", &png(b"q1 v2"));
    let images_before = dispatcher.host().image_count();

    let summary = dispatcher.update_all().await.unwrap();
    assert_eq!(summary.updated, 3);
    assert_eq!(dispatcher.host().image_count(), images_before + 1);
}

#[tokio::test]
async fn update_all_with_nothing_tracked_reports_status() {
    let source = ScriptedSource::default();
    let dispatcher = dispatcher(&source);
    dispatcher.dispatch(Command::UpdateAllCharts).await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        events.as_slice(),
        [Event::Status {
            status_type: StatusType::Info,
            ..
        }]
    ));
}

#[tokio::test]
async fn delete_removes_only_the_matching_record() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    source.serve(Q2_IMAGE, "image/png", &png(b"q2"));
    let dispatcher = dispatcher(&source);
    insert(&dispatcher, Q1_URL, "Q1").await;
    let kept = insert(&dispatcher, Q2_URL, "Q2").await;
    let placeholders = dispatcher.host().placeholders().await.unwrap();

    dispatcher
        .dispatch(Command::DeleteChart { url: Q1_URL.into() })
        .await;

    assert_eq!(dispatcher.registry().load().await.unwrap(), vec![kept]);
    assert_eq!(dispatcher.host().placeholders().await.unwrap(), placeholders);

    dispatcher
        .dispatch(Command::DeleteChart { url: Q1_URL.into() })
        .await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { context: Some(CommandKind::DeleteChart), .. }
    ));
}

#[tokio::test]
async fn rename_updates_record_and_tracked_placeholders() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);
    let record = insert(&dispatcher, Q1_URL, "Q1").await;

    dispatcher
        .dispatch(Command::UpdateChartName {
            chart_id: record.id.clone(),
            new_name: "Revenue".into(),
        })
        .await;

    let placeholder = dispatcher.host().selection().await.unwrap().remove(0);
    assert_eq!(placeholder.name, format!("Revenue ({})", record.id));
    let embedded: ChartRecord =
        serde_json::from_str(placeholder.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(embedded.display_name, "Revenue");
    assert_eq!(
        dispatcher.registry().find(&record.id).await.unwrap().unwrap().display_name,
        "Revenue"
    );

    dispatcher
        .dispatch(Command::UpdateChartName {
            chart_id: ChartId::from("chart_0_missing"),
            new_name: "X".into(),
        })
        .await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { context: Some(CommandKind::UpdateChartName), .. }
    ));
}

#[tokio::test]
async fn change_url_probes_before_committing() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    source.fail(Q2_IMAGE, 403);
    let dispatcher = dispatcher(&source);
    let record = insert(&dispatcher, Q1_URL, "Q1").await;

    dispatcher
        .dispatch(Command::UpdateChartUrl {
            chart_id: record.id.clone(),
            new_url: Q2_URL.into(),
        })
        .await;
    let events = dispatcher.ui().take();
    assert!(matches!(
        last_outcome(&events),
        Event::Error { message, .. } if message.contains("403")
    ));
    assert_eq!(
        dispatcher.registry().find(&record.id).await.unwrap().unwrap().url,
        Q1_URL
    );

    source.serve(Q2_IMAGE, "image/png", &png(b"q2"));
    dispatcher
        .dispatch(Command::UpdateChartUrl {
            chart_id: record.id.clone(),
            new_url: Q2_URL.into(),
        })
        .await;
    let updated = dispatcher.registry().find(&record.id).await.unwrap().unwrap();
    assert_eq!(updated.url, Q2_URL);
    let placeholder = dispatcher.host().selection().await.unwrap().remove(0);
    assert_eq!(placeholder.fill.unwrap().hash, blake3::hash(&png(b"q2")));
    let embedded: ChartRecord =
        serde_json::from_str(placeholder.metadata.as_deref().unwrap()).unwrap();
    assert_eq!(embedded.url, Q2_URL);
}

#[tokio::test]
async fn selected_info_prefers_embedded_metadata() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let dispatcher = dispatcher(&source);
    let registered = insert(&dispatcher, Q1_URL, "Q1").await;
    let pasted = ChartRecord::new(Q2_URL, "Pasted");
    let node = dispatcher.host().add_placeholder(
        registered.placeholder_name(),
        Some(serde_json::to_string(&pasted).unwrap()),
        Some(png(b"p").as_slice()),
    );
    dispatcher.host().select(&[node.as_str()]);

    dispatcher.dispatch(Command::GetSelectedChartInfo).await;
    let events = dispatcher.ui().take();
    let [Event::SelectedChartInfo {
        chart_info: Some(info),
    }] = events.as_slice()
    else {
        panic!("unexpected events: {events:?}");
    };
    assert_eq!(info.record, pasted);
    assert_eq!(info.resolved_by, ResolvedBy::Metadata);
    assert_eq!(info.node_id, node);

    dispatcher.host().select(&[]);
    dispatcher.dispatch(Command::GetSelectedChartInfo).await;
    assert_eq!(
        dispatcher.ui().take(),
        vec![Event::SelectedChartInfo { chart_info: None }]
    );
}

#[tokio::test]
async fn start_and_refresh_post_the_chart_list() {
    let source = ScriptedSource::default();
    let dispatcher = dispatcher(&source);
    dispatcher.start().await;
    dispatcher.dispatch(Command::RefreshCharts).await;
    dispatcher.selection_changed();
    let events = dispatcher.ui().take();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], Event::LoadCharts { charts, .. } if charts.is_empty()));
    assert_eq!(events[2], Event::SelectionChanged);
}

#[tokio::test]
async fn registry_persists_in_sqlite_under_the_global_key() {
    let source = ScriptedSource::default();
    source.serve(Q1_IMAGE, "image/png", &png(b"q1"));
    let mut config = Config::default();
    config.registry.scope = RegistryScope::Global;
    config.fetch.cache_bust = false;
    let store = SqliteStore::open("sqlite::memory:").await.unwrap();
    let dispatcher = Dispatcher::new(
        LocalDocument::new("doc1", "Quarterly review"),
        store,
        &source,
        RecordingChannel::new(),
        config,
    );

    let record = insert(&dispatcher, Q1_URL, "Q1").await;
    assert_eq!(source.requests.borrow().as_slice(), [Q1_IMAGE]);
    assert_eq!(dispatcher.registry().key(), "charts");
    let raw: String = sqlx::query_scalar("SELECT value FROM kv WHERE key = 'charts'")
        .fetch_one(dispatcher.registry().store().pool())
        .await
        .unwrap();
    let stored: Vec<ChartRecord> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored, vec![record.clone()]);

    let placeholder = dispatcher.host().selection().await.unwrap().remove(0);
    dispatcher
        .host()
        .set_metadata(&placeholder.node_id, METADATA_KEY, "")
        .await
        .unwrap();
    dispatcher.dispatch(Command::GetSelectedChartInfo).await;
    assert!(matches!(
        dispatcher.ui().take().as_slice(),
        [Event::SelectedChartInfo { chart_info: Some(info) }] if info.resolved_by == ResolvedBy::Id
    ));
}
