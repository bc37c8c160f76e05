use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use crate::entry::Entry;
use crate::error::StoreError;
use crate::pool::{Mode, Offer, Pool};
use crate::scan;
use crate::store::Store;
use crate::transcode::Transcoder;

/// Create a new, empty library database
pub fn create(database: &Path) -> Result<()> {
    let store = Store::create(database).context("Failed to create database")?;
    store.close().context("Failed to close database")
}

/// Walk `root`, fingerprinting every candidate and recording it in the database
pub fn update(database: &Path, root: &Path, threads: usize, cancel: &Arc<AtomicBool>) -> Result<()> {
    let store = Arc::new(Store::open(database).context("Failed to open database")?);
    let pool = Pool::start(Arc::clone(&store), Mode::Update, threads, Arc::clone(cancel))?;

    let walked = scan::walk_library(root, |path| {
        Ok(pool.submit(Entry::discovered(path, Utc::now().timestamp())) == Offer::Queued)
    });

    let stopped = pool.stop().context("Failed to stop worker pool");
    walked.context("Unexpected error during library walk")?;
    stopped?;

    store.close().context("Failed to close database")
}

/// Claim up to `entries` pending entries and transcode them on `threads` workers
///
/// Claims whose source file has disappeared are removed from the database. Claims which couldn't
/// be handed to a worker, because of cancellation or a failed worker, are released again.
pub fn transcode(
    database: &Path,
    entries: usize,
    threads: usize,
    transcoder: Arc<dyn Transcoder>,
    cancel: &Arc<AtomicBool>,
) -> Result<()> {
    let store = Arc::new(Store::open(database).context("Failed to open database")?);

    let claimed = claim_entries(&store, entries, cancel)?;
    info!("Claimed {} entries for transcoding", claimed.len());

    let mode = Mode::Transcode { transcoder };
    let pool = Pool::start(Arc::clone(&store), mode, threads, Arc::clone(cancel))?;

    let mut claimed = claimed.into_iter();
    let mut unqueued = Vec::new();
    for entry in claimed.by_ref() {
        match pool.submit(entry.clone()) {
            Offer::Queued => {}
            offer => {
                debug!("Stopped queueing entries: {:?}", offer);
                unqueued.push(entry);
                break;
            }
        }
    }
    unqueued.extend(claimed);

    let stopped = pool.stop().context("Failed to stop worker pool");

    for entry in &unqueued {
        store
            .cancel_transcoding(entry)
            .with_context(|| format!("Failed to cancel job for {}", entry.path.display()))?;
    }

    stopped?;

    store.close().context("Failed to close database")
}

fn claim_entries(store: &Store, limit: usize, cancel: &AtomicBool) -> Result<Vec<Entry>> {
    let mut claimed = Vec::with_capacity(limit);

    while claimed.len() < limit && !cancel.load(Ordering::Relaxed) {
        let entry = match store.begin_transcoding() {
            Ok(entry) => entry,
            Err(StoreError::NoEligibleWork) => break,
            Err(e) => return Err(e).context("Failed to claim entry for transcoding"),
        };

        if !entry.path.exists() {
            warn!("Found an entry that no longer exists, will remove: {}", entry);
            store.remove(&entry).context("Failed to remove entry")?;
            continue;
        }

        claimed.push(entry);
    }

    Ok(claimed)
}

/// A library exported by the previous tool: one list of finished paths and one of pending paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyLibrary {
    pub transcoded: Vec<PathBuf>,
    pub untranscoded: Vec<PathBuf>,
}

impl LegacyLibrary {
    /// Parse a `.toml` file as TOML and anything else as JSON
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file: {}", path.display()))?;

        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content).with_context(|| format!("Failed to decode source file: {}", path.display()))
        } else {
            serde_json::from_str(&content).with_context(|| format!("Failed to decode source file: {}", path.display()))
        }
    }
}

/// Build a new database at `sink` from a legacy library listing at `source`
///
/// Pending paths are queued before transcoded ones. The first record of a file wins: a later
/// record with the same path and fingerprint is left untouched, so with a single worker a path in
/// both lists stays pending.
pub fn convert(source: &Path, sink: &Path, threads: usize, cancel: &Arc<AtomicBool>) -> Result<()> {
    if !source.exists() {
        anyhow::bail!("source file '{}' not found", source.display());
    }

    if sink.exists() {
        anyhow::bail!("sink file '{}' already exists", sink.display());
    }

    let mut legacy = LegacyLibrary::load(source)?;
    debug!(
        "Decoded source file: {} transcoded, {} untranscoded",
        legacy.transcoded.len(),
        legacy.untranscoded.len()
    );

    legacy.untranscoded.sort();
    legacy.transcoded.sort();

    let store = Arc::new(Store::create(sink).context("Failed to create sink database")?);
    let pool = Pool::start(Arc::clone(&store), Mode::Update, threads, Arc::clone(cancel))?;

    if queue_paths(&pool, legacy.untranscoded, false) {
        queue_paths(&pool, legacy.transcoded, true);
    }

    pool.stop().context("Failed to stop worker pool")?;
    store.close().context("Failed to close database")
}

/// Offer every path to the pool, returning false if the pool stopped accepting entries
fn queue_paths(pool: &Pool, paths: Vec<PathBuf>, transcoded: bool) -> bool {
    for path in paths {
        let discovered = Utc::now().timestamp();
        let entry = Entry {
            path,
            discovered,
            transcoded: transcoded.then_some(discovered),
            ..Default::default()
        };

        if pool.submit(entry) != Offer::Queued {
            return false;
        }
    }

    true
}
