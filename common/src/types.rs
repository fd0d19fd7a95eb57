use serde::{Deserialize, Serialize};

/// Status of one task slot as rendered on the strip.
///
/// `Pending` means the task was completed on this device but the completion
/// has not been acknowledged by the backend yet; it degrades to `Done` once
/// the outbox record is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Todo,
    Pending,
    Done,
    Undone,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Undone => "UNDONE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub name: String,
    pub status: &'static str,
    pub streak: u32,
}

/// Snapshot published over the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub date: Option<String>,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    pub timezone: String,
    pub awake: bool,
    #[serde(rename = "loadingPixel")]
    pub loading_pixel: usize,
    #[serde(rename = "pixelCount")]
    pub pixel_count: usize,
    #[serde(rename = "nextSyncEpoch")]
    pub next_sync_epoch: Option<i64>,
    #[serde(rename = "nextRolloverEpoch")]
    pub next_rollover_epoch: Option<i64>,
    #[serde(rename = "unsyncedCompletions")]
    pub unsynced_completions: usize,
    pub tasks: Vec<TaskView>,
}
