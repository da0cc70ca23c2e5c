//! Fixed-size pool of summarizer threads with crash recovery.
//!
//! Every worker slot is a dedicated OS thread that builds its own
//! [`Summarizer`] and pulls tasks from a shared FIFO queue, so at most
//! `capacity` tasks run at once. A panic inside a slot only fails the task it
//! was running: the slot thread dies, its submitter sees
//! [`PoolError::WorkerCrashed`], and the supervisor thread spawns a fresh slot
//! in its place.

use super::SummarizerFactory;
use crate::server::metrics;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Summarizer pool is shut down")]
    Closed,
    #[error("Worker slot crashed while running the task")]
    WorkerCrashed,
    #[error("Summarization failed: {0}")]
    Summarize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub respawns: u64,
}

struct Task {
    id: u64,
    text: String,
    respond: oneshot::Sender<Result<String, PoolError>>,
}

enum SlotEvent {
    Crashed(usize),
    Exited(usize),
}

struct PoolShared {
    queue: Mutex<mpsc::Receiver<Task>>,
    factory: SummarizerFactory,
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    respawns: AtomicU64,
}

impl PoolShared {
    /// Block until the next task is available. `None` once the pool is shut
    /// down and the queue is drained.
    fn next_task(&self) -> Option<Task> {
        // Slots never panic while holding the queue lock, a poisoned lock is still usable.
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.recv().ok()
    }

    fn publish_load(&self) {
        metrics::set_summarizer_load(
            self.active.load(Ordering::SeqCst),
            self.queued.load(Ordering::SeqCst),
        );
    }
}

/// Tracks one task occupying a slot. Dropping it without `finish` means the
/// slot is unwinding, which counts as a crashed task.
struct ActiveTask<'a> {
    shared: &'a PoolShared,
    settled: bool,
}

impl<'a> ActiveTask<'a> {
    fn start(shared: &'a PoolShared) -> Self {
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::SeqCst);
        shared.publish_load();
        Self {
            shared,
            settled: false,
        }
    }

    fn finish(mut self, succeeded: bool) {
        self.settled = true;
        if succeeded {
            self.shared.completed.fetch_add(1, Ordering::SeqCst);
            metrics::record_summarizer_task("success");
        } else {
            self.shared.failed.fetch_add(1, Ordering::SeqCst);
            metrics::record_summarizer_task("failure");
        }
    }
}

impl Drop for ActiveTask<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.failed.fetch_add(1, Ordering::SeqCst);
            metrics::record_summarizer_task("crashed");
        }
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.publish_load();
    }
}

/// Reports to the supervisor how a slot thread ended.
struct SlotExitNotifier {
    slot: usize,
    events: mpsc::Sender<SlotEvent>,
}

impl Drop for SlotExitNotifier {
    fn drop(&mut self) {
        let event = if thread::panicking() {
            SlotEvent::Crashed(self.slot)
        } else {
            SlotEvent::Exited(self.slot)
        };
        let _ = self.events.send(event);
    }
}

fn spawn_slot(
    slot: usize,
    shared: Arc<PoolShared>,
    events: mpsc::Sender<SlotEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("summarizer-{}", slot))
        .spawn(move || {
            let _notifier = SlotExitNotifier { slot, events };
            run_slot(slot, &shared);
        })
}

fn run_slot(slot: usize, shared: &PoolShared) {
    let mut summarizer = (shared.factory)();
    debug!("Summarizer slot {} ready", slot);

    while let Some(task) = shared.next_task() {
        let active = ActiveTask::start(shared);
        let result = summarizer
            .summarize(&task.text)
            .map_err(|e| PoolError::Summarize(format!("{:#}", e)));
        active.finish(result.is_ok());

        if task.respond.send(result).is_err() {
            debug!("Submitter of summarization task {} went away", task.id);
        }
    }

    debug!("Summarizer slot {} stopping", slot);
}

fn supervise(
    shared: Arc<PoolShared>,
    mut slots: HashMap<usize, JoinHandle<()>>,
    events_tx: mpsc::Sender<SlotEvent>,
    events_rx: mpsc::Receiver<SlotEvent>,
) {
    while !slots.is_empty() {
        let event = match events_rx.recv() {
            Ok(event) => event,
            Err(_) => break,
        };

        match event {
            SlotEvent::Crashed(slot) => {
                if let Some(handle) = slots.remove(&slot) {
                    let _ = handle.join();
                }
                warn!("Summarizer slot {} crashed, respawning", slot);
                match spawn_slot(slot, Arc::clone(&shared), events_tx.clone()) {
                    Ok(handle) => {
                        slots.insert(slot, handle);
                        shared.respawns.fetch_add(1, Ordering::SeqCst);
                        metrics::record_summarizer_respawn();
                    }
                    Err(e) => error!("Failed to respawn summarizer slot {}: {}", slot, e),
                }
            }
            SlotEvent::Exited(slot) => {
                if let Some(handle) = slots.remove(&slot) {
                    let _ = handle.join();
                }
            }
        }
    }

    info!("All summarizer slots stopped");
}

pub struct SummarizerPool {
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    shared: Arc<PoolShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    next_task_id: AtomicU64,
}

impl SummarizerPool {
    /// Start `capacity` worker slots (at least one), each running a summarizer
    /// built by `factory`.
    pub fn new(capacity: usize, factory: SummarizerFactory) -> Result<Self> {
        let capacity = capacity.max(1);
        let (task_tx, task_rx) = mpsc::channel();
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(task_rx),
            factory,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            respawns: AtomicU64::new(0),
        });

        let (events_tx, events_rx) = mpsc::channel();
        let mut slots = HashMap::with_capacity(capacity);
        for slot in 0..capacity {
            let handle = spawn_slot(slot, Arc::clone(&shared), events_tx.clone())
                .with_context(|| format!("Failed to spawn summarizer slot {}", slot))?;
            slots.insert(slot, handle);
        }

        let supervisor_shared = Arc::clone(&shared);
        let supervisor = thread::Builder::new()
            .name("summarizer-supervisor".to_string())
            .spawn(move || supervise(supervisor_shared, slots, events_tx, events_rx))
            .context("Failed to spawn summarizer supervisor")?;

        info!("Summarizer pool started with {} worker slots", capacity);

        Ok(Self {
            capacity,
            sender: Mutex::new(Some(task_tx)),
            shared,
            supervisor: Mutex::new(Some(supervisor)),
            next_task_id: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue `text` for summarization.
    ///
    /// The task is enqueued when this is called, not when the returned future
    /// is first polled, so submission order is dispatch order.
    pub fn submit(
        &self,
        text: impl Into<String>,
    ) -> impl Future<Output = Result<String, PoolError>> + Send + 'static {
        let (respond, response) = oneshot::channel();
        let task = Task {
            id: self.next_task_id.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            respond,
        };
        let enqueued = self.enqueue(task);

        async move {
            enqueued?;
            response.await.map_err(|_| PoolError::WorkerCrashed)?
        }
    }

    fn enqueue(&self, task: Task) -> Result<(), PoolError> {
        let sender = self.sender.lock().map_err(|_| PoolError::Closed)?;
        let sender = sender.as_ref().ok_or(PoolError::Closed)?;

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(task).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Closed);
        }
        self.shared.publish_load();
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            active: self.shared.active.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
            respawns: self.shared.respawns.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting tasks, let the slots drain whatever is already queued,
    /// then wait for every slot thread to exit.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut sender| sender.take());
        if sender.is_none() {
            return;
        }
        drop(sender);

        info!(
            "Shutting down summarizer pool ({} tasks still queued)",
            self.shared.queued.load(Ordering::SeqCst)
        );

        let supervisor = self
            .supervisor
            .lock()
            .ok()
            .and_then(|mut supervisor| supervisor.take());
        if let Some(handle) = supervisor {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => info!("Summarizer pool shut down"),
                Ok(Err(_)) => error!("Summarizer supervisor panicked"),
                Err(e) => error!("Failed to join summarizer supervisor: {}", e),
            }
        }
    }
}
