//! FIFO admission gate shared by every operation touching the backup store.
//!
//! Callers register a [`TaskKind`]. If a task of an incompatible kind is
//! already queued, registration fails immediately with that kind. Otherwise
//! the caller joins the queue and blocks until it reaches the head, then holds
//! the execution lock until its [`TaskGuard`] is dropped.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

use crate::{QuickSlotError, Result};

/// Default re-check interval while waiting for the queue head.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Kinds of work competing for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Backup,
    Restore,
    Delete,
    List,
    ReconfigureSetting,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Backup,
        TaskKind::Restore,
        TaskKind::Delete,
        TaskKind::List,
        TaskKind::ReconfigureSetting,
    ];

    /// Whether a task of kind `self` may queue behind an already registered
    /// task of kind `ahead` instead of failing fast.
    pub fn tolerates(self, ahead: TaskKind) -> bool {
        use TaskKind::*;
        match self {
            // Backup rewrites the whole numbering and must never be dropped,
            // so it waits behind anything. Read-mostly kinds do the same.
            Backup | List | ReconfigureSetting => true,
            Restore | Delete => matches!(ahead, List | ReconfigureSetting),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Delete => "delete",
            Self::List => "list",
            Self::ReconfigureSetting => "settings change",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Default)]
struct Registry {
    queue: VecDeque<(TaskKind, u64)>,
    next_seq: u64,
}

/// The admission queue plus the exclusive execution lock.
///
/// The registry mutex only guards queue bookkeeping and is held briefly; the
/// execution mutex is held by the admitted task for its whole run.
pub struct TaskCoordinator {
    registry: Mutex<Registry>,
    head_changed: Condvar,
    execution: Mutex<()>,
    poll_interval: Duration,
}

impl Default for TaskCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCoordinator {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            head_changed: Condvar::new(),
            execution: Mutex::new(()),
            poll_interval,
        }
    }

    /// Request admission for `kind`.
    ///
    /// Fails with [`QuickSlotError::Conflict`] without queueing when an
    /// intolerable kind is already registered. `on_wait` runs once if the
    /// caller has to wait behind other tasks.
    pub fn register(&self, kind: TaskKind, on_wait: impl FnOnce()) -> Result<TaskGuard<'_>> {
        let seq = {
            let mut registry = self.registry.lock();
            if let Some(&(blocking, _)) = registry
                .queue
                .iter()
                .find(|(ahead, _)| !kind.tolerates(*ahead))
            {
                debug!(%kind, %blocking, "Admission refused");
                return Err(QuickSlotError::Conflict { blocking });
            }

            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.queue.push_back((kind, seq));

            if registry.queue.len() == 1 {
                drop(registry);
                return Ok(self.admit(kind, seq));
            }
            seq
        };

        on_wait();

        let mut registry = self.registry.lock();
        loop {
            if registry.queue.front().map(|&(_, s)| s) == Some(seq) {
                drop(registry);
                return Ok(self.admit(kind, seq));
            }
            trace!(%kind, seq, "Waiting for queue head");
            self.head_changed
                .wait_for(&mut registry, self.poll_interval);
        }
    }

    fn admit(&self, kind: TaskKind, seq: u64) -> TaskGuard<'_> {
        let execution = self.execution.lock();
        debug!(%kind, seq, "Task admitted");
        TaskGuard {
            coordinator: self,
            kind,
            seq,
            _execution: execution,
        }
    }

    fn unregister(&self, kind: TaskKind, seq: u64) {
        let mut registry = self.registry.lock();
        match registry.queue.front() {
            Some(&(_, head)) if head == seq => {
                registry.queue.pop_front();
            }
            _ => {
                // Only the head can hold a guard; recover rather than wedge.
                registry.queue.retain(|&(_, s)| s != seq);
            }
        }
        debug!(%kind, seq, queued = registry.queue.len(), "Task released");
        self.head_changed.notify_all();
    }

    /// Kind of the task at the head of the queue.
    pub fn active_kind(&self) -> Option<TaskKind> {
        self.registry.lock().queue.front().map(|&(kind, _)| kind)
    }

    /// Number of registered tasks, the active one included.
    pub fn queued(&self) -> usize {
        self.registry.lock().queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queued() == 0
    }
}

/// Admission held by the running task. Dropping it unregisters the task
/// and releases the execution lock, on every exit path.
pub struct TaskGuard<'a> {
    coordinator: &'a TaskCoordinator,
    kind: TaskKind,
    seq: u64,
    _execution: MutexGuard<'a, ()>,
}

impl TaskGuard<'_> {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.unregister(self.kind, self.seq);
    }
}

impl fmt::Debug for TaskGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGuard")
            .field("kind", &self.kind)
            .field("seq", &self.seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_compatibility_table() {
        use TaskKind::*;
        let expected = [
            // ahead:  Backup Restore Delete List  Config
            (Backup, [true, true, true, true, true]),
            (Restore, [false, false, false, true, true]),
            (Delete, [false, false, false, true, true]),
            (List, [true, true, true, true, true]),
            (ReconfigureSetting, [true, true, true, true, true]),
        ];
        for (kind, row) in expected {
            for (ahead, allowed) in TaskKind::ALL.into_iter().zip(row) {
                assert_eq!(kind.tolerates(ahead), allowed, "{kind:?} behind {ahead:?}");
            }
        }
    }

    #[test]
    fn test_idle_admission() {
        let coordinator = TaskCoordinator::new();
        let guard = coordinator.register(TaskKind::Backup, || panic!("should not wait")).unwrap();
        assert_eq!(guard.kind(), TaskKind::Backup);
        assert_eq!(coordinator.active_kind(), Some(TaskKind::Backup));
        drop(guard);
        assert!(coordinator.is_idle());
    }

    #[test]
    fn test_conflict_is_immediate() {
        let coordinator = TaskCoordinator::new();
        let _backup = coordinator.register(TaskKind::Backup, || {}).unwrap();

        let err = coordinator.register(TaskKind::Restore, || {}).unwrap_err();
        assert!(matches!(err, QuickSlotError::Conflict { blocking: TaskKind::Backup }));
        let err = coordinator.register(TaskKind::Delete, || {}).unwrap_err();
        assert!(matches!(err, QuickSlotError::Conflict { blocking: TaskKind::Backup }));
        // Refused registrations leave no trace.
        assert_eq!(coordinator.queued(), 1);
    }

    #[test]
    fn test_waiter_admitted_after_release() {
        let coordinator = Arc::new(TaskCoordinator::new());
        let list = coordinator.register(TaskKind::List, || {}).unwrap();

        let waited = Arc::new(AtomicBool::new(false));
        let handle = {
            let coordinator = Arc::clone(&coordinator);
            let waited = Arc::clone(&waited);
            thread::spawn(move || {
                let guard = coordinator
                    .register(TaskKind::Restore, || waited.store(true, Ordering::SeqCst))
                    .unwrap();
                guard.sequence()
            })
        };

        while coordinator.queued() < 2 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!handle.is_finished());
        drop(list);

        assert_eq!(handle.join().unwrap(), 1);
        assert!(waited.load(Ordering::SeqCst));
        assert!(coordinator.is_idle());
    }

    #[test]
    fn test_fifo_order() {
        let coordinator = Arc::new(TaskCoordinator::new());
        let first = coordinator.register(TaskKind::Backup, || {}).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            // Each waiter joins only after the previous one is queued.
            while coordinator.queued() < i + 1 {
                thread::sleep(Duration::from_millis(1));
            }
            let coordinator = Arc::clone(&coordinator);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _guard = coordinator.register(TaskKind::List, || {}).unwrap();
                order.lock().push(i);
            }));
        }
        while coordinator.queued() < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        drop(first);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_release_on_panic() {
        let coordinator = Arc::new(TaskCoordinator::new());
        let c = Arc::clone(&coordinator);
        let result = thread::spawn(move || {
            let _guard = c.register(TaskKind::Delete, || {}).unwrap();
            panic!("boom");
        })
        .join();
        assert!(result.is_err());
        assert!(coordinator.is_idle());
        assert!(coordinator.register(TaskKind::Delete, || {}).is_ok());
    }

    #[test]
    fn test_stress_mutual_exclusion() {
        let coordinator = Arc::new(TaskCoordinator::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for round in 0..20 {
                        let kind = TaskKind::ALL[(i + round) % TaskKind::ALL.len()];
                        let Ok(_guard) = coordinator.register(kind, || {}) else {
                            continue;
                        };
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(200 + (i as u64 * 37) % 300));
                        active.fetch_sub(1, Ordering::SeqCst);
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(admitted.load(Ordering::SeqCst) > 0);
        assert!(coordinator.is_idle());
    }
}
