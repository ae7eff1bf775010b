use std::sync::Arc;

use tracing::debug;

use super::checker::Checker;
use super::registry::WatcherRegistry;

/// Outcome of one probe-and-notify cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub up: bool,
    pub delivered: usize,
    pub failed: usize,
}

/// Body of every scheduled task: probe a host, tell whoever watches it now.
pub struct StatusFanout {
    registry: Arc<WatcherRegistry>,
    checker: Arc<dyn Checker>,
}

impl StatusFanout {
    pub fn new(registry: Arc<WatcherRegistry>, checker: Arc<dyn Checker>) -> Self {
        Self { registry, checker }
    }

    /// Probe `host:port`, then push the result to the host's current watchers.
    ///
    /// The watcher list is read after the probe returns, so sessions that
    /// joined or left while the probe was in flight are taken into account.
    pub async fn run_cycle(&self, host: &str, port: u16) -> FanoutReport {
        let up = self.checker.check(host, port).await;
        let watchers = self.registry.watchers_for(host);

        let mut report = FanoutReport { up, delivered: 0, failed: 0 };
        for watcher in &watchers {
            match watcher.notify(up) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(host, session = %watcher.id(), error = %e, "status delivery failed");
                }
            }
        }

        debug!(host, port, up, delivered = report.delivered, failed = report.failed, "fanout complete");
        report
    }
}
