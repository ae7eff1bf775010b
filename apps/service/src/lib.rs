//! Uppe Watch: clients connect over a line protocol, name a host, port and
//! polling interval, and get `/status <bool>` pushes while they stay
//! connected. Watchers of the same host share one probe schedule.

pub mod config;
pub mod error;
pub mod monitoring;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::ServiceError;
pub use server::MonitorServer;
