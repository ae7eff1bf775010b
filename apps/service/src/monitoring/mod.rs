/// Monitoring engine module - watches hosts on behalf of connected clients
///
/// This module is responsible for:
/// - Tracking which sessions watch which host
/// - Scheduling one periodic TCP probe per watched host
/// - Pushing each probe result to the host's current watchers
pub mod checker;
pub mod fanout;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod types;

pub use checker::{Checker, TcpChecker};
pub use fanout::{FanoutReport, StatusFanout};
pub use registry::{RegistrySnapshot, WatcherRegistry};
pub use scheduler::{MonitoringScheduler, SchedulePolicy, TaskPlan};
pub use service::WatchService;
pub use types::{DeliveryError, SessionId, StatusSink, Watcher};
