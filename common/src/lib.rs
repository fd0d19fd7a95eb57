pub mod clock;
pub mod config;
pub mod protocol;
pub mod schedule;
pub mod strip;
pub mod tasks;
pub mod types;

pub use clock::{ClockError, SystemTimeSource, TimeSource, WallClock};
pub use config::{NetworkConfig, RuntimeConfig, StripConfig, SyncConfig};
pub use protocol::{
    DoneReceipt, DoneReport, ServiceError, TaskRecord, TaskService, TaskSnapshot, DONE_PATH,
    TASKS_PATH,
};
pub use schedule::{Callback, Scheduler};
pub use strip::{PixelDriver, Strip, StripError};
pub use tasks::{Task, TaskError, TaskList};
pub use types::{DeviceStatus, TaskStatus, TaskView};
