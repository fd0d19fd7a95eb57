use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base path for day snapshots; the full resource is `{TASKS_PATH}/{date}`.
pub const TASKS_PATH: &str = "/tasks";
/// Completion report endpoint.
pub const DONE_PATH: &str = "/tasks/done";

/// Remote task state for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub date: String,
    pub tasks: Vec<TaskRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub done: bool,
    pub streak: u32,
}

/// Completions recorded on this device for one date, pushed upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneReport {
    pub date: String,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneReceipt {
    pub added: u32,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend rejected request with HTTP {0}")]
    Status(u16),
    #[error("malformed backend payload: {0}")]
    Payload(String),
}

/// The two operations required of the network collaborator: pull the remote
/// task list and push local completions. Both are short, bounded calls with
/// no partial-result contract; failures are recoverable by retrying on a
/// later sync.
pub trait TaskService {
    fn fetch_tasks(&mut self, date: &str) -> Result<TaskSnapshot, ServiceError>;
    fn report_done(&mut self, report: &DoneReport) -> Result<DoneReceipt, ServiceError>;
}
