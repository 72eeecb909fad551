//! Fan-out of engine events to registered listeners.
//!
//! Synchronous mode delivers on the publisher's thread. Asynchronous mode
//! pushes into a bounded FIFO drained by worker threads and never blocks
//! the publisher: a full queue drops the event and bumps a counter.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use super::{Event, EventListener};

/// Delivery mode, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub enum DispatchMode {
    /// Deliver on the publishing thread.
    Sync,
    /// Queue up to `capacity` events, drained by `workers` threads.
    /// A single worker preserves per-producer ordering; more workers trade
    /// ordering for throughput.
    Async { capacity: usize, workers: usize },
}

struct Queue {
    events: VecDeque<Event>,
    shutdown: bool,
}

struct AsyncState {
    queue: Mutex<Queue>,
    available: Condvar,
    capacity: usize,
}

pub struct EventDispatcher {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
    state: Option<Arc<AsyncState>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dropped: AtomicU64,
    shutdown: AtomicBool,
}

impl EventDispatcher {
    pub fn new(mode: DispatchMode) -> Arc<Self> {
        let dispatcher = match mode {
            DispatchMode::Sync => Arc::new(Self {
                listeners: Mutex::new(Vec::new()),
                state: None,
                workers: Mutex::new(Vec::new()),
                dropped: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
            DispatchMode::Async { capacity, workers } => {
                let state = Arc::new(AsyncState {
                    queue: Mutex::new(Queue {
                        events: VecDeque::new(),
                        shutdown: false,
                    }),
                    available: Condvar::new(),
                    capacity: capacity.max(1),
                });
                let dispatcher = Arc::new(Self {
                    listeners: Mutex::new(Vec::new()),
                    state: Some(Arc::clone(&state)),
                    workers: Mutex::new(Vec::new()),
                    dropped: AtomicU64::new(0),
                    shutdown: AtomicBool::new(false),
                });
                let mut handles = Vec::new();
                for _ in 0..workers.max(1) {
                    let state = Arc::clone(&state);
                    let weak = Arc::downgrade(&dispatcher);
                    handles.push(std::thread::spawn(move || loop {
                        let event = {
                            let mut q = state.queue.lock().unwrap();
                            loop {
                                if let Some(e) = q.events.pop_front() {
                                    break Some(e);
                                }
                                if q.shutdown {
                                    break None;
                                }
                                q = state.available.wait(q).unwrap();
                            }
                        };
                        match event {
                            Some(e) => {
                                if let Some(d) = weak.upgrade() {
                                    d.deliver(&e);
                                }
                            }
                            None => break,
                        }
                    }));
                }
                *dispatcher.workers.lock().unwrap() = handles;
                dispatcher
            }
        };
        dispatcher
    }

    /// Registers a listener; already-registered handles are ignored.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Deregisters by handle identity.
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Events discarded because the async queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publishes an event. Returns `false` only in async mode when the
    /// queue is full and the event was dropped; the publisher never blocks.
    pub fn publish(&self, event: Event) -> bool {
        if self.shutdown.load(Ordering::Relaxed) {
            return false;
        }
        match &self.state {
            None => {
                self.deliver(&event);
                true
            }
            Some(state) => {
                let mut q = state.queue.lock().unwrap();
                if q.events.len() >= state.capacity {
                    drop(q);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                q.events.push_back(event);
                drop(q);
                state.available.notify_one();
                true
            }
        }
    }

    /// Stops async delivery after draining the queue. Idempotent; a no-op
    /// in sync mode.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(state) = &self.state {
            state.queue.lock().unwrap().shutdown = true;
            state.available.notify_all();
        }
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let current = std::thread::current().id();
        for h in handles {
            // A drain worker can hold the last Arc and trigger shutdown
            // from its own thread; it must not join itself.
            if h.thread().id() != current {
                let _ = h.join();
            }
        }
    }

    /// Delivers to a snapshot of the listener list. Each delivery is
    /// isolated: a panicking listener does not affect its siblings.
    fn deliver(&self, event: &Event) {
        let snapshot: Vec<_> = self.listeners.lock().unwrap().clone();
        for listener in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            if result.is_err() {
                tracing::warn!("event listener panicked; continuing with remaining listeners");
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    impl EventListener for Recorder {
        fn on_event(&self, event: &Event) {
            if let Event::Error { task_id, .. } = event {
                self.seen.lock().unwrap().push(*task_id);
            }
        }
    }

    fn error_event(id: u64) -> Event {
        Event::Error {
            task_id: id,
            message: "boom".into(),
        }
    }

    #[test]
    fn sync_mode_delivers_in_order() {
        let d = EventDispatcher::new(DispatchMode::Sync);
        let r = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        d.add_listener(r.clone());
        for i in 1..=5 {
            assert!(d.publish(error_event(i)));
        }
        assert_eq!(*r.seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn remove_listener_stops_delivery() {
        let d = EventDispatcher::new(DispatchMode::Sync);
        let r = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let handle: Arc<dyn EventListener> = r.clone();
        d.add_listener(Arc::clone(&handle));
        d.publish(error_event(1));
        d.remove_listener(&handle);
        d.publish(error_event(2));
        assert_eq!(*r.seen.lock().unwrap(), vec![1]);
        assert_eq!(d.listener_count(), 0);
    }

    struct Panicker;

    impl EventListener for Panicker {
        fn on_event(&self, _: &Event) {
            panic!("listener bug");
        }
    }

    #[test]
    fn panicking_listener_does_not_affect_siblings() {
        let d = EventDispatcher::new(DispatchMode::Sync);
        let r = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        d.add_listener(Arc::new(Panicker));
        d.add_listener(r.clone());
        d.publish(error_event(7));
        assert_eq!(*r.seen.lock().unwrap(), vec![7]);
    }

    struct Blocker {
        delivered: Arc<AtomicUsize>,
    }

    impl EventListener for Blocker {
        fn on_event(&self, _: &Event) {
            std::thread::sleep(Duration::from_millis(200));
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn async_mode_drops_instead_of_blocking() {
        let d = EventDispatcher::new(DispatchMode::Async {
            capacity: 2,
            workers: 1,
        });
        let delivered = Arc::new(AtomicUsize::new(0));
        d.add_listener(Arc::new(Blocker {
            delivered: Arc::clone(&delivered),
        }));

        let mut dropped = 0;
        for i in 0..20 {
            if !d.publish(error_event(i)) {
                dropped += 1;
            }
        }
        assert!(dropped > 0, "a burst past capacity must drop");
        assert_eq!(d.dropped_events(), dropped as u64);
        d.shutdown();
        assert!(delivered.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn async_mode_delivers_queued_events() {
        let d = EventDispatcher::new(DispatchMode::Async {
            capacity: 64,
            workers: 1,
        });
        let r = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        d.add_listener(r.clone());
        for i in 1..=10 {
            assert!(d.publish(error_event(i)));
        }
        d.shutdown();
        assert_eq!(*r.seen.lock().unwrap(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn status_changed_round_trips_through_dispatch() {
        struct StatusRecorder(Mutex<Vec<(TaskStatus, TaskStatus)>>);
        impl EventListener for StatusRecorder {
            fn on_event(&self, event: &Event) {
                if let Event::StatusChanged { old, new, .. } = event {
                    self.0.lock().unwrap().push((*old, *new));
                }
            }
        }
        let d = EventDispatcher::new(DispatchMode::Sync);
        let r = Arc::new(StatusRecorder(Mutex::new(Vec::new())));
        d.add_listener(r.clone());
        d.publish(Event::StatusChanged {
            task_id: 3,
            old: TaskStatus::Pending,
            new: TaskStatus::Preparing,
        });
        assert_eq!(
            *r.0.lock().unwrap(),
            vec![(TaskStatus::Pending, TaskStatus::Preparing)]
        );
    }
}
