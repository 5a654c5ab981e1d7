//! JSON message contract with the presentation layer.

use serde::{Deserialize, Serialize};

use crate::record::{ChartId, ChartRecord};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Command {
    InsertChart {
        url: String,
        #[serde(default)]
        name: Option<String>,
    },
    UpdateChart,
    UpdateAllCharts,
    UpdateChartUrl {
        chart_id: ChartId,
        new_url: String,
    },
    UpdateChartName {
        chart_id: ChartId,
        new_name: String,
    },
    DeleteChart {
        url: String,
    },
    TestChartUrl {
        url: String,
    },
    GetSelectedChartInfo,
    RefreshCharts,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::InsertChart { .. } => CommandKind::InsertChart,
            Self::UpdateChart => CommandKind::UpdateChart,
            Self::UpdateAllCharts => CommandKind::UpdateAllCharts,
            Self::UpdateChartUrl { .. } => CommandKind::UpdateChartUrl,
            Self::UpdateChartName { .. } => CommandKind::UpdateChartName,
            Self::DeleteChart { .. } => CommandKind::DeleteChart,
            Self::TestChartUrl { .. } => CommandKind::TestChartUrl,
            Self::GetSelectedChartInfo => CommandKind::GetSelectedChartInfo,
            Self::RefreshCharts => CommandKind::RefreshCharts,
        }
    }
}

/// Which command an outcome belongs to; serialized as the command's `type`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    InsertChart,
    UpdateChart,
    UpdateAllCharts,
    UpdateChartUrl,
    UpdateChartName,
    DeleteChart,
    TestChartUrl,
    GetSelectedChartInfo,
    RefreshCharts,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsertChart => "insert-chart",
            Self::UpdateChart => "update-chart",
            Self::UpdateAllCharts => "update-all-charts",
            Self::UpdateChartUrl => "update-chart-url",
            Self::UpdateChartName => "update-chart-name",
            Self::DeleteChart => "delete-chart",
            Self::TestChartUrl => "test-chart-url",
            Self::GetSelectedChartInfo => "get-selected-chart-info",
            Self::RefreshCharts => "refresh-charts",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileContext {
    pub document_id: String,
    pub document_name: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResolvedBy {
    Metadata,
    Id,
    Name,
    LegacyName,
    Loose,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    #[serde(flatten)]
    pub record: ChartRecord,
    pub node_id: String,
    pub resolved_by: ResolvedBy,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Event {
    LoadCharts {
        charts: Vec<ChartRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_context: Option<FileContext>,
    },
    Status {
        message: String,
        status_type: StatusType,
    },
    Completion {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<CommandKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_type: Option<StatusType>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<CommandKind>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_type: Option<StatusType>,
    },
    ProgressStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        percentage: Option<u8>,
        message: String,
    },
    ProgressUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        percentage: Option<u8>,
        message: String,
    },
    ProgressComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        percentage: Option<u8>,
        message: String,
    },
    SelectedChartInfo {
        chart_info: Option<ChartInfo>,
    },
    SelectionChanged,
}
