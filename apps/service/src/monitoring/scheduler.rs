use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::fanout::StatusFanout;
use super::registry::{RegistrySnapshot, WatcherRegistry};
use super::types::Watcher;

/// How a host's watchers are merged into one polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Period for any host with two or more watchers, whatever they asked for.
    pub shared_interval: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self { shared_interval: Duration::from_secs(5) }
    }
}

impl SchedulePolicy {
    pub fn from_seconds(shared_interval_seconds: u64) -> Self {
        Self { shared_interval: Duration::from_secs(shared_interval_seconds.max(1)) }
    }

    /// Port and period to poll a host with, `None` when nobody watches it.
    ///
    /// The port always comes from the first watcher in registration order,
    /// later watchers get probed on that port too.
    pub fn merge(&self, watchers: &[Arc<Watcher>]) -> Option<(u16, Duration)> {
        let first = watchers.first()?;
        let period = match watchers.len() {
            1 => Duration::from_secs(first.interval_seconds().max(1)),
            _ => self.shared_interval,
        };
        Some((first.port(), period))
    }
}

/// What one scheduled task polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPlan {
    pub host: String,
    pub port: u16,
    pub period: Duration,
}

struct ScheduledTask {
    plan: TaskPlan,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the periodic probe tasks, one per watched host.
///
/// Every change to the registry throws all tasks away and derives a fresh
/// set from a snapshot. Callers serialise access (see
/// [`WatchService`](super::WatchService)).
pub struct MonitoringScheduler {
    registry: Arc<WatcherRegistry>,
    fanout: Arc<StatusFanout>,
    policy: SchedulePolicy,
    probe_slots: Arc<Semaphore>,
    /// Hosts with a check in progress, shared by old and new tasks.
    in_flight: Arc<DashSet<String>>,
    tasks: Vec<ScheduledTask>,
    shut_down: bool,
}

/// Claim on a host's single check slot, released on drop.
struct InFlight {
    hosts: Arc<DashSet<String>>,
    host: String,
}

impl InFlight {
    fn claim(hosts: &Arc<DashSet<String>>, host: &str) -> Option<Self> {
        hosts
            .insert(host.to_string())
            .then(|| Self { hosts: hosts.clone(), host: host.to_string() })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.hosts.remove(&self.host);
    }
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    ///
    /// `probe_slots` bounds how many probes may run at the same time.
    pub fn new(
        registry: Arc<WatcherRegistry>,
        fanout: Arc<StatusFanout>,
        policy: SchedulePolicy,
        probe_slots: usize,
    ) -> Self {
        Self {
            registry,
            fanout,
            policy,
            probe_slots: Arc::new(Semaphore::new(probe_slots.max(1))),
            in_flight: Arc::new(DashSet::new()),
            tasks: Vec::new(),
            shut_down: false,
        }
    }

    /// Tasks that a reschedule from `snapshot` would run.
    pub fn plan_tasks(&self, snapshot: &RegistrySnapshot) -> Vec<TaskPlan> {
        snapshot
            .iter()
            .filter_map(|(host, watchers)| {
                let (port, period) = self.policy.merge(watchers)?;
                Some(TaskPlan { host: host.to_string(), port, period })
            })
            .collect()
    }

    /// Cancel every task and start one per host currently in the registry.
    ///
    /// Returns the number of tasks now running. Does nothing after
    /// [`shutdown`](Self::shutdown).
    pub fn reschedule(&mut self) -> usize {
        if self.shut_down {
            debug!("reschedule requested after shutdown, ignoring");
            return 0;
        }

        let cancelled = self.cancel_all().len();
        let plans = self.plan_tasks(&self.registry.snapshot());
        self.tasks = plans.into_iter().map(|plan| self.schedule_task(plan)).collect();

        info!(cancelled, scheduled = self.tasks.len(), "rescheduled monitoring tasks");
        self.tasks.len()
    }

    /// Cancel all tasks and refuse any further scheduling.
    ///
    /// Returns the task handles so the caller can wait for in-flight probes.
    pub fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        self.shut_down = true;
        self.probe_slots.close();
        let handles = self.cancel_all();
        info!(cancelled = handles.len(), "monitoring scheduler shut down");
        handles
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn active_tasks(&self) -> Vec<TaskPlan> {
        self.tasks.iter().map(|task| task.plan.clone()).collect()
    }

    fn cancel_all(&mut self) -> Vec<JoinHandle<()>> {
        self.tasks
            .drain(..)
            .map(|task| {
                debug!(host = %task.plan.host, "cancelling monitoring task");
                task.cancel.cancel();
                task.handle
            })
            .collect()
    }

    /// Spawn the periodic task for one host. First probe fires immediately.
    fn schedule_task(&self, plan: TaskPlan) -> ScheduledTask {
        let fanout = self.fanout.clone();
        let probe_slots = self.probe_slots.clone();
        let in_flight = self.in_flight.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_plan = plan.clone();

        debug!(
            host = %plan.host,
            port = plan.port,
            period_secs = plan.period.as_secs(),
            "scheduling monitoring task"
        );

        let handle = tokio::spawn(async move {
            let mut timer = interval(task_plan.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                // A cancelled task may still be stuck checking this host; at
                // most one check per host holds a slot.
                let Some(_claim) = InFlight::claim(&in_flight, &task_plan.host) else {
                    debug!(host = %task_plan.host, "previous check still running, skipping");
                    continue;
                };

                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    permit = probe_slots.acquire() => permit,
                };
                // Closed semaphore means the scheduler shut down.
                let Ok(_permit) = permit else { break };

                // Not raced against cancellation: a started cycle always finishes.
                fanout.run_cycle(&task_plan.host, task_plan.port).await;
            }
        });

        ScheduledTask { plan, cancel, handle }
    }
}

impl Drop for MonitoringScheduler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.cancel.cancel();
        }
    }
}
