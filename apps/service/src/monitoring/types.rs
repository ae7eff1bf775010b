use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use uuid::Uuid;

/// Identity of one client session.
///
/// Watchers are compared by this id, never by their requested values, so two
/// clients asking for the same host/port/interval are still two watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("status sink is closed")]
    Closed,
}

/// Where probe results for one watcher are pushed.
pub trait StatusSink: Send + Sync {
    fn deliver_status(&self, up: bool) -> Result<(), DeliveryError>;
}

/// One client's registered interest in a host.
pub struct Watcher {
    id: SessionId,
    port: u16,
    interval_seconds: u64,
    last_status: AtomicBool,
    sink: Arc<dyn StatusSink>,
}

impl Watcher {
    pub fn new(id: SessionId, port: u16, interval_seconds: u64, sink: Arc<dyn StatusSink>) -> Self {
        Self { id, port, interval_seconds, last_status: AtomicBool::new(false), sink }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    /// Last reachability pushed to this watcher, `false` until the first probe.
    pub fn last_status(&self) -> bool {
        self.last_status.load(Ordering::Relaxed)
    }

    /// Record the status and push it to the sink.
    pub fn notify(&self, up: bool) -> Result<(), DeliveryError> {
        self.last_status.store(up, Ordering::Relaxed);
        self.sink.deliver_status(up)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("interval_seconds", &self.interval_seconds)
            .field("last_status", &self.last_status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Sink that records every status it is given.
    #[derive(Default)]
    pub struct RecordingSink {
        received: Mutex<Vec<bool>>,
        closed: AtomicBool,
    }

    impl RecordingSink {
        pub fn received(&self) -> Vec<bool> {
            self.received.lock().clone()
        }

        pub fn close(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    impl StatusSink for RecordingSink {
        fn deliver_status(&self, up: bool) -> Result<(), DeliveryError> {
            if self.closed.load(Ordering::Relaxed) {
                return Err(DeliveryError::Closed);
            }
            self.received.lock().push(up);
            Ok(())
        }
    }

    pub fn watcher(port: u16, interval_seconds: u64) -> (Arc<Watcher>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let watcher = Arc::new(Watcher::new(SessionId::new(), port, interval_seconds, sink.clone()));
        (watcher, sink)
    }
}
