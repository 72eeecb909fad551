//! Task bookkeeping: the id generator, the task map, the FIFO pending
//! queue, and the admission cap on in-flight tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::task::DownloadTask;
use crate::types::{TaskId, TaskStatus};

struct ManagerState {
    tasks: HashMap<TaskId, Arc<DownloadTask>>,
    pending: VecDeque<TaskId>,
    max_concurrent: usize,
    active: usize,
}

pub struct TaskManager {
    state: Mutex<ManagerState>,
    changed: Condvar,
    next_id: AtomicU64,
}

impl TaskManager {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            state: Mutex::new(ManagerState {
                tasks: HashMap::new(),
                pending: VecDeque::new(),
                max_concurrent: max_concurrent.max(1),
                active: 0,
            }),
            changed: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Ids are monotonically increasing and never reused.
    pub fn next_id(&self) -> TaskId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_task(&self, task: Arc<DownloadTask>) {
        let mut state = self.state.lock().unwrap();
        let id = task.id();
        state.tasks.insert(id, task);
        state.pending.push_back(id);
    }

    /// Removes a task; only terminal tasks may be removed.
    pub fn remove_task(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().unwrap();
        let finished = match state.tasks.get(&id) {
            Some(task) => task.is_finished(),
            None => return false,
        };
        if !finished {
            return false;
        }
        state.pending.retain(|p| *p != id);
        state.tasks.remove(&id);
        true
    }

    /// Removes every terminal task; returns how many were removed.
    pub fn remove_finished(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let finished: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(_, t)| t.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            state.pending.retain(|p| p != id);
            state.tasks.remove(id);
        }
        finished.len()
    }

    pub fn get_task(&self, id: TaskId) -> Option<Arc<DownloadTask>> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.state.lock().unwrap().tasks.values().cloned().collect()
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> Vec<Arc<DownloadTask>> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.status() == status)
            .cloned()
            .collect()
    }

    pub fn active_tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.is_active())
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active
    }

    pub fn total_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.state.lock().unwrap().max_concurrent
    }

    pub fn set_max_concurrent(&self, max: usize) {
        self.state.lock().unwrap().max_concurrent = max.max(1);
        self.changed.notify_all();
    }

    pub fn can_start_more(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.active < state.max_concurrent
    }

    /// Re-enqueues a task id (used when a paused task resumes).
    pub fn requeue(&self, id: TaskId) {
        let mut state = self.state.lock().unwrap();
        if state.tasks.contains_key(&id) && !state.pending.contains(&id) {
            state.pending.push_back(id);
        }
    }

    /// Pops the next Pending task if the admission cap allows starting it,
    /// reserving an active slot. Stale queue entries (cancelled or already
    /// started tasks) are discarded along the way.
    pub fn claim_next_pending(&self) -> Option<Arc<DownloadTask>> {
        let mut state = self.state.lock().unwrap();
        if state.active >= state.max_concurrent {
            return None;
        }
        while let Some(id) = state.pending.pop_front() {
            if let Some(task) = state.tasks.get(&id) {
                if task.status() == TaskStatus::Pending {
                    let task = Arc::clone(task);
                    state.active += 1;
                    return Some(task);
                }
            }
        }
        None
    }

    /// Releases the active slot claimed for a task; wakes `wait_all`.
    pub fn release_active(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Wakes waiters after an out-of-band status change (cancel of a
    /// never-started task, for instance).
    pub fn notify(&self) {
        self.changed.notify_all();
    }

    /// Blocks until every known task is terminal.
    pub fn wait_all(&self) {
        let state = self.state.lock().unwrap();
        let _guard = self
            .changed
            .wait_while(state, |s| s.tasks.values().any(|t| !t.is_finished()))
            .unwrap();
    }

    /// `wait_all` with a deadline; returns false on timeout.
    pub fn wait_all_timeout(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (guard, result) = self
            .changed
            .wait_timeout_while(state, timeout, |s| {
                s.tasks.values().any(|t| !t.is_finished())
            })
            .unwrap();
        drop(guard);
        !result.timed_out()
    }
}
