//! Background solving for interactive frontends.
//!
//! One worker thread, at most one solve in flight. A submitted request
//! replaces any request still waiting, and every submission bumps a
//! generation counter. Results from a generation older than the latest
//! submission are dropped instead of delivered, so only the newest edit
//! ever reaches the frontend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dk_model::{Solution, SystemDef};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::orchestrate::{self, SolveRequest};

#[derive(Debug)]
pub enum WorkerMessage {
    Solved { generation: u64, solution: Solution },
    Failed { generation: u64, message: String },
}

impl WorkerMessage {
    pub fn generation(&self) -> u64 {
        match self {
            WorkerMessage::Solved { generation, .. } | WorkerMessage::Failed { generation, .. } => {
                *generation
            }
        }
    }
}

struct Job {
    generation: u64,
    sys: SystemDef,
    request: SolveRequest,
}

#[derive(Default)]
struct Slot {
    pending: Option<Job>,
    shutdown: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    latest: AtomicU64,
}

pub struct SolveWorker {
    shared: Arc<Shared>,
    results: Receiver<WorkerMessage>,
    handle: Option<JoinHandle<()>>,
}

impl SolveWorker {
    pub fn start() -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            latest: AtomicU64::new(0),
        });
        let (tx, rx) = channel();
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || Self::run(&thread_shared, &tx));

        Self {
            shared,
            results: rx,
            handle: Some(handle),
        }
    }

    fn run(shared: &Shared, tx: &Sender<WorkerMessage>) {
        loop {
            let job = {
                let Ok(mut slot) = shared.slot.lock() else {
                    return;
                };
                loop {
                    if slot.shutdown {
                        return;
                    }
                    if let Some(job) = slot.pending.take() {
                        break job;
                    }
                    slot = match shared.wake.wait(slot) {
                        Ok(slot) => slot,
                        Err(_) => return,
                    };
                }
            };

            let message = match orchestrate::solve(&job.sys, &job.request) {
                Ok(solution) => WorkerMessage::Solved {
                    generation: job.generation,
                    solution,
                },
                Err(err) => WorkerMessage::Failed {
                    generation: job.generation,
                    message: err.to_string(),
                },
            };

            let latest = shared.latest.load(Ordering::SeqCst);
            if job.generation < latest {
                debug!(generation = job.generation, latest, "dropping superseded solve");
                continue;
            }
            if tx.send(message).is_err() {
                return;
            }
        }
    }

    /// Queue a solve, replacing any request not yet started. Returns the
    /// generation number the result will carry.
    pub fn submit(&self, sys: SystemDef, request: SolveRequest) -> AppResult<u64> {
        let generation = self.shared.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slot = self
            .shared
            .slot
            .lock()
            .map_err(|_| AppError::Worker("worker state poisoned".to_string()))?;
        if let Some(replaced) = slot.pending.replace(Job {
            generation,
            sys,
            request,
        }) {
            debug!(replaced = replaced.generation, generation, "superseded queued solve");
        }
        self.shared.wake.notify_one();
        Ok(generation)
    }

    pub fn latest_generation(&self) -> u64 {
        self.shared.latest.load(Ordering::SeqCst)
    }

    pub fn try_recv(&self) -> Option<WorkerMessage> {
        self.results.try_recv().ok()
    }

    /// Wait for the next delivered result.
    pub fn recv_timeout(&self, timeout: Duration) -> AppResult<Option<WorkerMessage>> {
        match self.results.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(AppError::Worker("worker thread exited".to_string()))
            }
        }
    }
}

impl Drop for SolveWorker {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.slot.lock() {
            slot.shutdown = true;
            slot.pending = None;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take()
            && let Err(panic) = handle.join()
        {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            warn!(%message, "solve worker thread panicked");
        }
    }
}
