//! Wire types for the catalog sync progress channel.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

/// Which reconciliation the sync job performs
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncKind {
    /// Partial: refresh price and stock of products already in the catalog
    Manual,
    /// Full: also create new products and deactivate the ones the ERP dropped
    Full,
}

impl TryFrom<String> for SyncKind {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, strum::ParseError> {
        value.parse()
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Running,
    Completed,
    Error,
}

impl SyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Error)
    }
}

impl TryFrom<String> for SyncStatus {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, strum::ParseError> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventType {
    #[default]
    Progress,
}

/// One tick of a running sync job, serialized as the `data:` of an SSE frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
pub struct ProgressEvent {
    #[serde(rename = "type", default)]
    pub event_type: ProgressEventType,
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: SyncStatus,
}

impl ProgressEvent {
    pub fn running(percent: Option<f64>, message: impl Into<String>) -> Self {
        Self {
            event_type: ProgressEventType::Progress,
            percent,
            message: Some(message.into()),
            status: SyncStatus::Running,
        }
    }

    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            event_type: ProgressEventType::Progress,
            percent: Some(100.0),
            message: Some(message.into()),
            status: SyncStatus::Completed,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            event_type: ProgressEventType::Progress,
            percent: None,
            message: Some(message.into()),
            status: SyncStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Percent of `done` over `total`, clamped to 0-100. An empty job counts as done.
pub fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}
