use std::collections::VecDeque;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use crate::artifact;
use crate::entry::Entry;
use crate::fingerprint;
use crate::store::Store;
use crate::transcode::Transcoder;

/// Maximum number of entries waiting for a worker
pub const QUEUE_DEPTH: usize = 1024;

/// How often blocked threads re-check the cancel flag
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What the pool does with each entry
#[derive(Clone)]
pub enum Mode {
    /// Fingerprint the entry's file and upsert it; nothing to undo for unprocessed entries
    Update,
    /// Transcode a claimed entry and complete its job; unprocessed entries have their job cancelled
    Transcode { transcoder: Arc<dyn Transcoder> },
}

impl Mode {
    fn name(&self) -> &'static str {
        match self {
            Mode::Update => "update",
            Mode::Transcode { .. } => "transcode",
        }
    }

    fn consume(&self, store: &Store, mut entry: Entry) -> Result<()> {
        match self {
            Mode::Update => {
                entry.hash = fingerprint::hash_file(&entry.path)
                    .with_context(|| format!("Failed to fingerprint {}", entry.path.display()))?;
                store.upsert(&entry).context("Failed to upsert entry")?;
            }
            Mode::Transcode { transcoder } => {
                info!("Beginning job to transcode entry {}", entry);

                transcoder
                    .transcode(&entry.path)
                    .with_context(|| format!("Failed to transcode {}", entry.path.display()))?;

                fs::remove_file(&entry.path)
                    .with_context(|| format!("Failed to remove source file {}", entry.path.display()))?;

                let target = artifact::target_path(&entry.path);
                fs::rename(artifact::transcoding_path(&entry.path), &target)
                    .with_context(|| format!("Failed to rename transcoded file to {}", target.display()))?;

                entry.path = target;
                store.complete_transcoding(&entry).context("Failed to complete job")?;
            }
        }

        Ok(())
    }

    fn drain(&self, store: &Store, entry: &Entry) -> Result<()> {
        match self {
            Mode::Update => Ok(()),
            Mode::Transcode { .. } => store
                .cancel_transcoding(entry)
                .with_context(|| format!("Failed to cancel job for {}", entry.path.display())),
        }
    }
}

impl std::fmt::Debug for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of offering an entry to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// The cancel flag is set; stop offering and call [`Pool::stop`]
    Cancelled,
    /// A worker has failed; stop offering and call [`Pool::stop`] to get the error
    Failed,
}

struct QueueState {
    items: VecDeque<Entry>,
    closed: bool,
    /// Bounded by the worker count, each worker reports at most once
    errors: Vec<anyhow::Error>,
}

struct Shared {
    store: Arc<Store>,
    mode: Mode,
    cancel: Arc<AtomicBool>,
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, QueueState>) -> MutexGuard<'a, QueueState> {
        match self.changed.wait_timeout(guard, POLL_INTERVAL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Next entry for a worker, or `None` once cancelled or closed and empty
    fn pop(&self) -> Option<Entry> {
        let mut state = self.lock();
        loop {
            if self.cancelled() {
                return None;
            }
            if let Some(entry) = state.items.pop_front() {
                self.changed.notify_all();
                return Some(entry);
            }
            if state.closed {
                return None;
            }
            state = self.wait(state);
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.changed.notify_all();
    }

    fn report(&self, err: anyhow::Error) {
        let mut state = self.lock();
        state.errors.push(err);
        self.changed.notify_all();
    }
}

/// A running set of workers sharing one store
///
/// Callers [`Pool::submit`] entries into a bounded queue and each worker hands them to the pool's
/// [`Mode`]. A worker that fails reports its error and exits, which callers observe as
/// [`Offer::Failed`]. Setting the cancel flag makes workers exit between items, leaving whatever
/// is queued for [`Pool::stop`] to drain.
pub struct Pool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Spawn `concurrency` workers (at least one) processing entries in `mode`
    pub fn start(store: Arc<Store>, mode: Mode, concurrency: usize, cancel: Arc<AtomicBool>) -> Result<Self> {
        Self::start_with(store, mode, concurrency, cancel, |name, shared, id| {
            thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(id, &shared))
        })
    }

    fn start_with(
        store: Arc<Store>,
        mode: Mode,
        concurrency: usize,
        cancel: Arc<AtomicBool>,
        mut spawn: impl FnMut(String, Arc<Shared>, usize) -> io::Result<JoinHandle<()>>,
    ) -> Result<Self> {
        let concurrency = concurrency.max(1);
        let shared = Arc::new(Shared {
            store,
            mode,
            cancel,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(QUEUE_DEPTH),
                closed: false,
                errors: Vec::with_capacity(concurrency),
            }),
            changed: Condvar::new(),
        });

        info!("Starting {} pool with {} worker(s)", shared.mode.name(), concurrency);

        let mut workers = Vec::with_capacity(concurrency);
        for id in 0..concurrency {
            let name = format!("{}-worker-{}", shared.mode.name(), id);
            match spawn(name, Arc::clone(&shared), id) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Workers already running would otherwise wait on the queue forever
                    shared.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(e).context("Failed to spawn worker thread");
                }
            }
        }

        Ok(Self { shared, workers })
    }

    /// Offer an entry, blocking while the queue is full
    pub fn submit(&self, entry: Entry) -> Offer {
        let mut state = self.shared.lock();
        loop {
            if self.shared.cancelled() {
                return Offer::Cancelled;
            }
            if !state.errors.is_empty() {
                return Offer::Failed;
            }
            if state.items.len() < QUEUE_DEPTH {
                state.items.push_back(entry);
                self.shared.changed.notify_one();
                return Offer::Queued;
            }
            state = self.shared.wait(state);
        }
    }

    /// Close the queue, wait for every worker, then drain anything left unprocessed
    ///
    /// The first error reported by a worker wins. Without one, every remaining entry is drained
    /// and the first drain failure is returned.
    pub fn stop(self) -> Result<()> {
        self.shared.close();

        for handle in self.workers {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                self.shared.report(anyhow!("{} panicked", name));
            }
        }

        let (remaining, first_error) = {
            let mut state = self.shared.lock();
            let remaining: Vec<Entry> = state.items.drain(..).collect();
            let first_error = if state.errors.is_empty() { None } else { Some(state.errors.remove(0)) };
            (remaining, first_error)
        };

        if let Some(err) = first_error {
            return Err(err);
        }

        if !remaining.is_empty() {
            info!("Draining {} unprocessed entries", remaining.len());
        }

        let mut first_failure = None;
        for entry in &remaining {
            if let Err(err) = self.shared.mode.drain(&self.shared.store, entry) {
                error!("{:#}", err);
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    debug!("Worker {} started", id);

    while let Some(entry) = shared.pop() {
        if let Err(err) = shared.mode.consume(&shared.store, entry) {
            warn!("Worker {} failed: {:#}", id, err);
            shared.report(err);
            return;
        }
    }

    debug!("Worker {} exiting", id);
}
