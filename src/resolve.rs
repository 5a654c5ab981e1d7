//! Maps a placeholder back to the chart record it displays.

use tracing::warn;

use crate::{
    host::Placeholder,
    message::ResolvedBy,
    record::{ChartId, ChartRecord},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub record: ChartRecord,
    pub by: ResolvedBy,
}

pub struct Resolver<'a> {
    /// Name given to placeholders by releases that predate chart ids.
    pub legacy_name: &'a str,
}

impl Resolver<'_> {
    /// Resolution order: embedded metadata, id suffix in the name, exact
    /// name. A placeholder carrying the legacy default name only matches a
    /// record of that same name. `None` means "untracked placeholder".
    pub fn resolve(&self, placeholder: &Placeholder, records: &[ChartRecord]) -> Option<Resolved> {
        if let Some(record) = embedded(placeholder) {
            return Some(Resolved {
                record,
                by: ResolvedBy::Metadata,
            });
        }

        if let Some(id) = ChartId::from_name(&placeholder.name) {
            // An id that the registry never saw does not fall through to name
            // matching.
            return records
                .iter()
                .find(|record| record.id == id)
                .map(|record| Resolved {
                    record: record.clone(),
                    by: ResolvedBy::Id,
                });
        }

        let by = if placeholder.name == self.legacy_name {
            ResolvedBy::LegacyName
        } else {
            ResolvedBy::Name
        };
        records
            .iter()
            .find(|record| record.display_name == placeholder.name)
            .map(|record| Resolved {
                record: record.clone(),
                by,
            })
    }

    /// Bulk update matching. On top of [`Self::resolve`], a legacy-named
    /// placeholder, or one whose name merely contains `Chart`, is matched to
    /// the first record. This keeps historical installs updating, at the risk
    /// of picking up unrelated layers that happen to carry the word.
    pub fn resolve_loose(
        &self,
        placeholder: &Placeholder,
        records: &[ChartRecord],
    ) -> Option<Resolved> {
        self.resolve(placeholder, records).or_else(|| {
            if ChartId::from_name(&placeholder.name).is_some() {
                return None;
            }
            let by = if placeholder.name == self.legacy_name {
                ResolvedBy::LegacyName
            } else if placeholder.name.contains("Chart") {
                ResolvedBy::Loose
            } else {
                return None;
            };
            records.first().map(|record| Resolved {
                record: record.clone(),
                by,
            })
        })
    }
}

pub(crate) fn embedded(placeholder: &Placeholder) -> Option<ChartRecord> {
    let raw = placeholder.metadata.as_deref()?;
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(raw)
        .inspect_err(|error| {
            warn!(node = %placeholder.node_id, %error, "ignoring malformed chart metadata")
        })
        .ok()
}
