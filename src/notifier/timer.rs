//! Notification schedulers: cancellable tokio timers for real use and a
//! manually driven recorder for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{NotificationScheduler, NotificationSink, ReminderNotification, TicketHandle};
use crate::clock::Clock;

type TaskMap = Arc<Mutex<HashMap<TicketHandle, JoinHandle<()>>>>;

/// One tokio task per ticket; cancelling aborts the task.
pub struct TokioNotificationScheduler {
    runtime: Handle,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    tasks: TaskMap,
}

impl TokioNotificationScheduler {
    pub fn new(runtime: Handle, sink: Arc<dyn NotificationSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runtime,
            sink,
            clock,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Scheduler on the runtime of the calling task.
    pub fn on_current_runtime(sink: Arc<dyn NotificationSink>, clock: Arc<dyn Clock>) -> Self {
        Self::new(Handle::current(), sink, clock)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.tasks).len()
    }
}

impl NotificationScheduler for TokioNotificationScheduler {
    fn schedule(&self, fire_at: DateTime<Utc>, payload: ReminderNotification) -> TicketHandle {
        let handle = TicketHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        let delay = fire_at
            .signed_duration_since(self.clock.now())
            .to_std()
            .unwrap_or_default();

        let sink = self.sink.clone();
        let tasks = self.tasks.clone();

        // Hold the map while spawning so the task cannot fire before it is
        // registered.
        let mut guard = lock(&self.tasks);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if lock(&tasks).remove(&handle).is_some() {
                tracing::debug!(ticket = handle.0, prescription_id = %payload.prescription_id, "Reminder fired");
                sink.show(&payload);
            }
        });
        guard.insert(handle, task);
        handle
    }

    fn cancel(&self, handle: TicketHandle) -> bool {
        match lock(&self.tasks).remove(&handle) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn is_pending(&self, handle: TicketHandle) -> bool {
        lock(&self.tasks).contains_key(&handle)
    }
}

impl Drop for TokioNotificationScheduler {
    fn drop(&mut self) {
        for (_, task) in lock(&self.tasks).drain() {
            task.abort();
        }
    }
}

/// Scheduler that only fires when told to (for testing).
#[derive(Default)]
pub struct RecordingScheduler {
    pending: Mutex<BTreeMap<TicketHandle, (DateTime<Utc>, ReminderNotification)>>,
    fired: Mutex<Vec<ReminderNotification>>,
    next_id: AtomicU64,
    scheduled: AtomicUsize,
    cancelled: AtomicUsize,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every pending ticket due at or before `now`, earliest first.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<ReminderNotification> {
        let mut pending = lock(&self.pending);
        let due: Vec<TicketHandle> = pending
            .iter()
            .filter(|(_, (fire_at, _))| *fire_at <= now)
            .map(|(h, _)| *h)
            .collect();
        let mut fired: Vec<(DateTime<Utc>, ReminderNotification)> =
            due.iter().filter_map(|h| pending.remove(h)).collect();
        fired.sort_by_key(|(fire_at, _)| *fire_at);
        let fired: Vec<ReminderNotification> = fired.into_iter().map(|(_, n)| n).collect();
        lock(&self.fired).extend(fired.iter().cloned());
        fired
    }

    pub fn pending(&self) -> Vec<ReminderNotification> {
        lock(&self.pending)
            .values()
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn fired(&self) -> Vec<ReminderNotification> {
        lock(&self.fired).clone()
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl NotificationScheduler for RecordingScheduler {
    fn schedule(&self, fire_at: DateTime<Utc>, payload: ReminderNotification) -> TicketHandle {
        let handle = TicketHandle(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).insert(handle, (fire_at, payload));
        handle
    }

    fn cancel(&self, handle: TicketHandle) -> bool {
        let removed = lock(&self.pending).remove(&handle).is_some();
        if removed {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn is_pending(&self, handle: TicketHandle) -> bool {
        lock(&self.pending).contains_key(&handle)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::notifier::RecordingSink;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn payload(fire_at: DateTime<Utc>) -> ReminderNotification {
        ReminderNotification {
            prescription_id: Uuid::new_v4(),
            title: "Medication reminder".into(),
            body: "Time to take Amoxicillin (500mg)".into(),
            icon: String::new(),
            fire_at,
        }
    }

    fn tokio_scheduler(sink: Arc<RecordingSink>) -> TokioNotificationScheduler {
        TokioNotificationScheduler::on_current_runtime(sink, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn ticket_fires_through_sink() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = tokio_scheduler(sink.clone());
        let fire_at = Utc::now() + chrono::Duration::milliseconds(30);

        let handle = scheduler.schedule(fire_at, payload(fire_at));
        assert!(scheduler.is_pending(handle));

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(sink.shown().len(), 1);
        assert!(!scheduler.is_pending(handle));
        assert!(!scheduler.cancel(handle));
    }

    #[tokio::test]
    async fn past_fire_time_fires_immediately() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = tokio_scheduler(sink.clone());
        let fire_at = Utc::now() - chrono::Duration::minutes(5);

        scheduler.schedule(fire_at, payload(fire_at));
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        assert_eq!(sink.shown().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_ticket_never_fires() {
        let sink = Arc::new(RecordingSink::new());
        let scheduler = tokio_scheduler(sink.clone());
        let fire_at = Utc::now() + chrono::Duration::milliseconds(50);

        let handle = scheduler.schedule(fire_at, payload(fire_at));
        assert!(scheduler.cancel(handle));
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(sink.shown().is_empty());
    }

    #[tokio::test]
    async fn dropping_scheduler_aborts_timers() {
        let sink = Arc::new(RecordingSink::new());
        let fire_at = Utc::now() + chrono::Duration::milliseconds(50);
        {
            let scheduler = tokio_scheduler(sink.clone());
            scheduler.schedule(fire_at, payload(fire_at));
        }
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(sink.shown().is_empty());
    }

    #[test]
    fn recording_scheduler_fires_due_tickets_in_order() {
        let scheduler = RecordingScheduler::new();
        let base = Utc::now();
        let hours = |h| base + chrono::Duration::hours(h);
        let late = scheduler.schedule(hours(2), payload(hours(2)));
        scheduler.schedule(hours(1), payload(hours(1)));
        scheduler.schedule(hours(3), payload(hours(3)));

        let fired = scheduler.fire_due(base + chrono::Duration::hours(2));
        assert_eq!(fired.len(), 2);
        assert!(fired[0].fire_at < fired[1].fire_at);
        assert!(!scheduler.is_pending(late));
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.fired().len(), 2);
        assert_eq!(scheduler.scheduled_count(), 3);
    }

    #[test]
    fn recording_scheduler_counts_cancellations() {
        let scheduler = RecordingScheduler::new();
        let at = Utc::now();
        let handle = scheduler.schedule(at, payload(at));
        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert_eq!(scheduler.cancelled_count(), 1);
        assert!(scheduler.pending().is_empty());
    }
}
