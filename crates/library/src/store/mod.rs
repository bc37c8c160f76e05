mod recovery;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use chrono::Utc;
use log::{debug, error, info};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use crate::entry::{Entry, Job};
use crate::error::{StoreError, StoreResult};
use crate::fingerprint;

pub use recovery::RecoveryAction;

/// Handle to a library database, safe to share between worker threads
///
/// One SQLite connection sits behind a store-wide mutex and every mutating operation runs as one
/// transaction while holding it. Fingerprinting happens outside the lock. Opening an existing
/// store resolves leftover jobs before the handle is returned.
pub struct Store {
    path: PathBuf,
    inner: Mutex<Option<Connected>>,
}

struct Connected {
    conn: Connection,
    /// Number of transactions finished on this handle, used to correlate log lines
    txns: u64,
}

impl Store {
    /// Create a new, empty store at `path`
    ///
    /// Fails with [`StoreError::AlreadyExists`] if anything already exists at that path.
    pub fn create(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;

        schema::set_user_version(&conn, schema::SCHEMA_VERSION_CURRENT)?;
        schema::configure(&conn)?;
        conn.execute_batch(schema::CREATE_TABLES)?;

        info!("Created new database {} (version {})", path.display(), schema::SCHEMA_VERSION_CURRENT);

        Ok(Self::with_connection_at(path, conn))
    }

    /// Open an existing store, recovering any jobs left behind by a previous process
    ///
    /// Fails with [`StoreError::NotFound`] if nothing exists at `path` and
    /// [`StoreError::UnsupportedVersion`] if the store was written by an unknown version. A
    /// failure while recovering is returned as [`StoreError::Recovery`]; the store is not usable
    /// until recovery succeeds.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;

        let version = schema::user_version(&conn)?;
        info!("Opened existing database {} (version {})", path.display(), version);

        if !schema::is_supported(version) {
            return Err(StoreError::UnsupportedVersion { path: path.to_path_buf(), version });
        }

        schema::configure(&conn)?;

        let store = Self::with_connection_at(path, conn);
        recovery::recover_incomplete_jobs(&store)?;

        Ok(store)
    }

    fn with_connection_at(path: &Path, conn: Connection) -> Self {
        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Some(Connected { conn, txns: 0 })),
        }
    }

    /// Insert the provided entry, or update the existing entry with the same fingerprint
    ///
    /// A fingerprint match is the same file having moved: only its path is updated (when it
    /// differs) and the stored `discovered`/`transcoded` values are kept. Otherwise the entry is
    /// inserted, replacing any existing row at the same path whose content has changed.
    pub fn upsert(&self, entry: &Entry) -> StoreResult<()> {
        let path = sql_path(&entry.path)?;

        self.with_transaction(|conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    "select id, path from library where hash = ?1;",
                    params![entry.hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((id, existing_path)) if existing_path != path => {
                    info!("Entry #{}: moved from {} to {}", id, existing_path, path);
                    conn.execute("update library set path = ?1 where id = ?2;", params![path, id])?;
                }
                Some((id, _)) => {
                    debug!("Entry #{}: already up to date", id);
                }
                None => {
                    info!("Adding entry {}", entry);
                    conn.execute(
                        "insert or replace into library (path, discovered, transcoded, hash)
                            values (?1, ?2, ?3, ?4);",
                        params![path, entry.discovered, entry.transcoded, entry.hash],
                    )?;
                }
            }

            Ok(())
        })
    }

    /// Remove the provided entry along with any job for it
    pub fn remove(&self, entry: &Entry) -> StoreResult<()> {
        self.with_transaction(|conn| {
            info!("Removing entry {}", entry);
            remove_job(conn, entry.id)?;
            conn.execute("delete from library where id = ?1;", params![entry.id])?;
            Ok(())
        })
    }

    /// Claim the oldest untranscoded entry which has no job
    ///
    /// A job is recorded for the returned entry; it must be completed or cancelled. If the
    /// process exits first, the next [`Store::open`] resolves it. Returns
    /// [`StoreError::NoEligibleWork`] when nothing is waiting.
    pub fn begin_transcoding(&self) -> StoreResult<Entry> {
        self.with_transaction(|conn| {
            let entry = conn
                .query_row(
                    "select id, path, discovered, transcoded, hash from library
                        where transcoded is null and id not in (select library_id from jobs)
                        order by discovered asc, id asc limit 1;",
                    [],
                    entry_from_row,
                )
                .optional()?
                .ok_or(StoreError::NoEligibleWork)?;

            info!("Scheduling job to transcode entry {}", entry);
            add_job(conn, entry.id)?;

            Ok(entry)
        })
    }

    /// Re-fingerprint the entry at its (possibly renamed) path, mark it transcoded and drop its job
    pub fn complete_transcoding(&self, entry: &Entry) -> StoreResult<()> {
        let hash = fingerprint::hash_file(&entry.path).map_err(|source| StoreError::Fingerprint {
            path: entry.path.clone(),
            source,
        })?;
        let path = sql_path(&entry.path)?;
        let transcoded = Utc::now().timestamp();

        self.with_transaction(|conn| {
            conn.execute(
                "update library set path = ?1, transcoded = ?2, hash = ?3 where id = ?4;",
                params![path, transcoded, hash, entry.id],
            )?;

            info!("Completing job to transcode entry {}", entry);
            remove_job(conn, entry.id)?;

            Ok(())
        })
    }

    /// Drop the job for the provided entry without marking it transcoded
    pub fn cancel_transcoding(&self, entry: &Entry) -> StoreResult<()> {
        info!("Cancelling job to transcode entry {}", entry);
        self.release_job(entry)
    }

    fn release_job(&self, entry: &Entry) -> StoreResult<()> {
        self.with_transaction(|conn| remove_job(conn, entry.id))
    }

    /// All tracked entries, ordered by id
    pub fn entries(&self) -> StoreResult<Vec<Entry>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "select id, path, discovered, transcoded, hash from library order by id asc;",
            )?;
            let entries = stmt
                .query_map([], entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
    }

    /// All open jobs, ordered by id
    pub fn jobs(&self) -> StoreResult<Vec<Job>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("select id, library_id, start_time from jobs order by id asc;")?;
            let jobs = stmt
                .query_map([], |row| {
                    Ok(Job {
                        id: row.get(0)?,
                        library_id: row.get(1)?,
                        start_time: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(jobs)
        })
    }

    /// Close the store; every later call on this handle fails with [`StoreError::Closed`]
    pub fn close(&self) -> StoreResult<()> {
        let connected = self.lock().take().ok_or(StoreError::Closed)?;

        info!("Closing database {}", self.path.display());

        connected.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connected>> {
        // Transactions roll back on drop, so a panic mid-transaction leaves the connection consistent
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` against the live connection while holding the store lock
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.lock();
        let connected = guard.as_ref().ok_or(StoreError::Closed)?;
        f(&connected.conn)
    }

    /// Run `f` inside a transaction while holding the store lock
    ///
    /// The transaction is committed if `f` succeeds and rolled back otherwise.
    fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.lock();
        let connected = guard.as_mut().ok_or(StoreError::Closed)?;
        let number = connected.txns + 1;

        debug!("Beginning transaction {}", number);
        let tx = connected.conn.transaction()?;

        match f(&tx) {
            Ok(value) => {
                debug!("Committing transaction {}", number);
                let committed = tx.commit();
                connected.txns = number;
                committed?;
                Ok(value)
            }
            Err(err) => {
                if matches!(err, StoreError::NoEligibleWork) {
                    debug!("Rolling back transaction {}", number);
                } else {
                    error!("Unexpected error, rolling back transaction {}: {}", number, err);
                }
                let rolled_back = tx.rollback();
                connected.txns = number;
                rolled_back?;
                Err(err)
            }
        }
    }
}

pub(crate) fn add_job(conn: &Connection, library_id: i64) -> StoreResult<()> {
    debug!("Adding job for entry #{}", library_id);
    conn.execute(
        "insert into jobs (library_id, start_time) values (?1, ?2);",
        params![library_id, Utc::now().timestamp()],
    )?;
    Ok(())
}

fn remove_job(conn: &Connection, library_id: i64) -> StoreResult<()> {
    debug!("Removing job for entry #{}", library_id);
    conn.execute("delete from jobs where library_id = ?1;", params![library_id])?;
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        discovered: row.get(2)?,
        transcoded: row.get(3)?,
        hash: row.get(4)?,
    })
}

fn sql_path(path: &Path) -> StoreResult<&str> {
    path.to_str().ok_or_else(|| StoreError::InvalidPath(path.to_path_buf()))
}
