use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::checker::Checker;
use super::fanout::StatusFanout;
use super::registry::{RegistrySnapshot, WatcherRegistry};
use super::scheduler::{MonitoringScheduler, SchedulePolicy, TaskPlan};
use super::types::{SessionId, Watcher};

/// How long shutdown waits for in-flight probes before giving up on them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Entry point sessions use to watch and unwatch hosts.
///
/// A registry change and the reschedule it triggers happen under one lock,
/// so concurrent sessions never rebuild the task set from a stale view.
/// Fanout reads the registry without taking this lock.
pub struct WatchService {
    registry: Arc<WatcherRegistry>,
    scheduler: Mutex<MonitoringScheduler>,
}

impl WatchService {
    pub fn new(checker: Arc<dyn Checker>, policy: SchedulePolicy, probe_slots: usize) -> Self {
        let registry = Arc::new(WatcherRegistry::new());
        let fanout = Arc::new(StatusFanout::new(registry.clone(), checker));
        let scheduler = MonitoringScheduler::new(registry.clone(), fanout, policy, probe_slots);

        Self { registry, scheduler: Mutex::new(scheduler) }
    }

    pub fn register(&self, host: &str, watcher: Arc<Watcher>) {
        let mut scheduler = self.scheduler.lock();
        self.registry.register(host, watcher);
        scheduler.reschedule();
    }

    /// Returns whether the watcher was still registered.
    pub fn unregister(&self, host: &str, id: SessionId) -> bool {
        let mut scheduler = self.scheduler.lock();
        let removed = self.registry.unregister(host, id);
        scheduler.reschedule();
        removed
    }

    /// Rebuild the task set without changing the registry.
    pub fn refresh(&self) {
        self.scheduler.lock().reschedule();
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    pub fn watchers_for(&self, host: &str) -> Vec<Arc<Watcher>> {
        self.registry.watchers_for(host)
    }

    pub fn active_tasks(&self) -> Vec<TaskPlan> {
        self.scheduler.lock().active_tasks()
    }

    /// Cancel every task and stop scheduling new ones.
    ///
    /// Probes already running get [`SHUTDOWN_GRACE`] to finish, then their
    /// tasks are aborted.
    pub async fn shutdown(&self) {
        let handles = self.scheduler.lock().shutdown();
        if handles.is_empty() {
            return;
        }

        let aborts: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(handles)).await.is_err() {
            warn!(tasks = aborts.len(), "probes still running after shutdown grace, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("watch service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::fanout::testing::{HangingChecker, StaticChecker};
    use crate::monitoring::types::testing::watcher;

    fn service() -> (Arc<WatchService>, Arc<StaticChecker>) {
        let checker = Arc::new(StaticChecker::default());
        let service = Arc::new(WatchService::new(checker.clone(), SchedulePolicy::default(), 10));
        (service, checker)
    }

    fn task_hosts(service: &WatchService) -> Vec<String> {
        service.active_tasks().into_iter().map(|plan| plan.host).collect()
    }

    fn snapshot_hosts(service: &WatchService) -> Vec<String> {
        service.snapshot().hosts().map(str::to_string).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_unregister_reschedule() {
        let (service, _) = service();
        let (w, _) = watcher(80, 7);

        service.register("a", w.clone());
        assert_eq!(service.active_tasks()[0].period, Duration::from_secs(7));

        assert!(service.unregister("a", w.id()));
        assert!(service.active_tasks().is_empty());
        assert!(!service.unregister("a", w.id()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_are_not_lost() {
        let (service, _) = service();
        let hosts = ["a", "b", "c", "d"];

        let mut joins = Vec::new();
        for i in 0..40u16 {
            let service = service.clone();
            let host = hosts[usize::from(i) % hosts.len()];
            joins.push(tokio::spawn(async move {
                let (w, _) = watcher(1000 + i, 30);
                service.register(host, w.clone());
                if i % 3 == 0 {
                    service.unregister(host, w.id());
                }
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        let snapshot = service.snapshot();
        let total: usize = snapshot.iter().map(|(_, watchers)| watchers.len()).sum();
        // 14 of the 40 unregistered again (i % 3 == 0).
        assert_eq!(total, 26);
        assert_eq!(task_hosts(&service), snapshot_hosts(&service));

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reaches_watchers_through_schedule() {
        let (service, checker) = service();
        checker.set("x", 9999, true);
        let (w, sink) = watcher(9999, 3);

        service.register("x", w.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.received(), vec![true]);
        assert!(w.last_status());

        service.unregister("x", w.id());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.received(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_task_set() {
        let (service, _) = service();
        let (w, _) = watcher(80, 7);

        service.register("a", w);
        let before = service.active_tasks();
        service.refresh();

        assert_eq!(service.active_tasks(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_after_shutdown_schedules_nothing() {
        let (service, checker) = service();
        let (w, _) = watcher(80, 1);

        service.shutdown().await;
        service.register("a", w);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(service.active_tasks().is_empty());
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_host_does_not_starve_other_hosts() {
        let checker = Arc::new(HangingChecker::new("stuck"));
        let service = WatchService::new(checker.clone(), SchedulePolicy::default(), 3);
        let (stuck, _) = watcher(80, 1);

        service.register("stuck", stuck);
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            service.refresh();
        }

        let (healthy, sink) = watcher(443, 1);
        service.register("healthy", healthy);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert!(sink.received().len() >= 20, "healthy host got {:?}", sink.received());
        assert_eq!(checker.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_checks_stuck_past_grace() {
        let checker = Arc::new(HangingChecker::new("stuck"));
        let service = WatchService::new(checker.clone(), SchedulePolicy::default(), 3);
        let (w, _) = watcher(80, 1);

        service.register("stuck", w);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(checker.started(), 1);

        let began = tokio::time::Instant::now();
        service.shutdown().await;
        assert!(began.elapsed() >= SHUTDOWN_GRACE);

        // Aborted tasks are torn down the next time the runtime gets to them.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(checker.dropped(), 1);
        assert!(service.active_tasks().is_empty());
    }
}
