use std::fs;
use std::io;
use std::path::Path;
use log::{info, warn};
use crate::artifact;
use crate::entry::Entry;
use crate::error::{StoreError, StoreResult};
use crate::fingerprint;
use super::{entry_from_row, Store};

/// How an incomplete job is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The transcode finished; move its output into place and mark the entry transcoded
    Complete,
    /// The transcode never finished; remove partial output and release the claim
    Rollback,
}

impl RecoveryAction {
    /// Decide how to resolve the job for `entry` from the state of the filesystem
    pub fn classify(entry: &Entry) -> Self {
        let content_changed = matches!(
            fingerprint::hash_file(&entry.path),
            Ok(hash) if hash != entry.hash
        );

        let output_left_behind =
            !entry.path.exists() && artifact::transcoding_path(&entry.path).exists();

        if content_changed || output_left_behind {
            Self::Complete
        } else {
            Self::Rollback
        }
    }
}

/// Resolve every job still present in the store
///
/// A job that survives to the next open means the process exited between claiming an entry and
/// completing or cancelling it. A source whose content no longer matches its fingerprint, or a
/// missing source with in-progress output beside it, means the transcode finished: the output is
/// moved to its final name and the entry completed. Anything else never finished, so partial
/// output is deleted and the job dropped. A source edited by something else between runs looks
/// like a finished transcode and is completed.
///
/// Resolving a job deletes its row, so a second pass is a no-op. Any failure aborts the pass.
pub(super) fn recover_incomplete_jobs(store: &Store) -> StoreResult<usize> {
    let incomplete = store.with_connection(|conn| {
        let mut stmt = conn.prepare(
            "select library.id, path, discovered, transcoded, hash from jobs
                inner join library on jobs.library_id = library.id
                order by jobs.id asc;",
        )?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    })?;

    for entry in &incomplete {
        warn!("Found incomplete job for entry {}", entry);

        recover_job(store, entry).map_err(|source| StoreError::Recovery {
            path: entry.path.clone(),
            source: Box::new(source),
        })?;
    }

    if !incomplete.is_empty() {
        info!("Recovered {} incomplete job(s)", incomplete.len());
    }

    Ok(incomplete.len())
}

fn recover_job(store: &Store, entry: &Entry) -> StoreResult<()> {
    match RecoveryAction::classify(entry) {
        RecoveryAction::Complete => complete_incomplete_job(store, entry),
        RecoveryAction::Rollback => rollback_incomplete_job(store, entry),
    }
}

fn complete_incomplete_job(store: &Store, entry: &Entry) -> StoreResult<()> {
    info!("Completing incomplete job for entry {}", entry);

    let target = artifact::target_path(&entry.path);

    // A missing in-progress file means it was already renamed before the process exited
    ignore_not_found(fs::rename(artifact::transcoding_path(&entry.path), &target))?;

    store.complete_transcoding(&Entry {
        path: target,
        ..entry.clone()
    })
}

fn rollback_incomplete_job(store: &Store, entry: &Entry) -> StoreResult<()> {
    info!("Rolling back incomplete job for entry {}", entry);

    remove_partial_output(&entry.path)?;

    store.release_job(entry)
}

fn remove_partial_output(source: &Path) -> StoreResult<()> {
    ignore_not_found(fs::remove_file(artifact::transcoding_path(source)))
}

fn ignore_not_found(result: io::Result<()>) -> StoreResult<()> {
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StoreError::Io(e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::*;
    use std::path::PathBuf;

    fn hash(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    struct Case {
        name: &'static str,
        initial_entries: Vec<Entry>,
        initial_files: Vec<&'static str>,
        initial_jobs: Vec<i64>,
        expected_entries: Vec<Entry>,
        expected_files: Vec<&'static str>,
    }

    fn entry(path: &str, transcoded: Option<i64>, hash: u32) -> Entry {
        Entry { id: 0, path: PathBuf::from(path), discovered: 42, transcoded, hash }
    }

    fn cases() -> Vec<Case> {
        vec![
            Case {
                name: "no jobs",
                initial_entries: vec![entry("test.mp4", None, hash(b"0"))],
                initial_files: vec!["test.mp4"],
                initial_jobs: vec![],
                expected_entries: vec![entry("test.mp4", None, hash(b"0"))],
                expected_files: vec!["test.mp4"],
            },
            Case {
                name: "one job, both files exist",
                initial_entries: vec![entry("test.mp4", None, hash(b"0"))],
                initial_files: vec!["test.mp4", "test.transcoding.mp4"],
                initial_jobs: vec![1],
                expected_entries: vec![entry("test.mp4", None, hash(b"0"))],
                expected_files: vec!["test.mp4"],
            },
            Case {
                name: "one job, only source exists",
                initial_entries: vec![entry("test.mp4", None, hash(b"0"))],
                initial_files: vec!["test.mp4"],
                initial_jobs: vec![1],
                expected_entries: vec![entry("test.mp4", None, hash(b"0"))],
                expected_files: vec!["test.mp4"],
            },
            Case {
                name: "one job, only output exists",
                initial_entries: vec![entry("test.avi", None, hash(b"old_contents"))],
                initial_files: vec!["test.transcoding.mp4"],
                initial_jobs: vec![1],
                expected_entries: vec![entry("test.mp4", Some(0), hash(b"0"))],
                expected_files: vec!["test.mp4"],
            },
            Case {
                name: "one job, output already renamed over source",
                initial_entries: vec![entry("test.mp4", None, hash(b"old_contents"))],
                initial_files: vec!["test.mp4"],
                initial_jobs: vec![1],
                expected_entries: vec![entry("test.mp4", Some(0), hash(b"0"))],
                expected_files: vec!["test.mp4"],
            },
            Case {
                name: "one job, output not yet renamed",
                initial_entries: vec![entry("test.mp4", None, hash(b"old_contents"))],
                initial_files: vec!["test.transcoding.mp4"],
                initial_jobs: vec![1],
                expected_entries: vec![entry("test.mp4", Some(0), hash(b"0"))],
                expected_files: vec!["test.mp4"],
            },
        ]
    }

    fn rooted(dir: &Path, entries: &[Entry]) -> Vec<Entry> {
        entries
            .iter()
            .map(|e| Entry { path: dir.join(&e.path), ..e.clone() })
            .collect()
    }

    #[test]
    fn test_open_recovers_incomplete_jobs() {
        for case in cases() {
            let dir = tempfile::tempdir().unwrap();
            let db = dir.path().join("test.db");

            create_and_populate(&db, &rooted(dir.path(), &case.initial_entries), &case.initial_jobs);

            for (index, name) in case.initial_files.iter().enumerate() {
                fs::write(dir.path().join(name), index.to_string()).unwrap();
            }

            open_and_update(&db, &[]);

            assert_contains(&db, &rooted(dir.path(), &case.expected_entries), &[]);

            for name in &case.expected_files {
                assert!(dir.path().join(name).exists(), "{}: expected '{}' to exist", case.name, name);
            }

            for name in &case.initial_files {
                if !case.expected_files.contains(name) {
                    assert!(!dir.path().join(name).exists(), "{}: expected '{}' to be gone", case.name, name);
                }
            }
        }
    }

    #[test]
    fn test_recovery_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let source = dir.path().join("test.mkv");
        fs::write(&source, b"old_contents").unwrap();

        create_and_populate(
            &db,
            &[Entry { path: source.clone(), discovered: 8, hash: hash(b"old_contents"), ..Default::default() }],
            &[1],
        );

        // Simulate a transcode which finished writing but never got recorded
        fs::remove_file(&source).unwrap();
        fs::write(artifact::transcoding_path(&source), b"transcoded").unwrap();

        let expected = [Entry {
            path: dir.path().join("test.mp4"),
            discovered: 8,
            transcoded: Some(0),
            hash: hash(b"transcoded"),
            ..Default::default()
        }];

        open_and_update(&db, &[]);
        assert_contains(&db, &expected, &[]);

        open_and_update(&db, &[]);
        assert_contains(&db, &expected, &[]);
    }

    #[test]
    fn test_recovery_cancels_untouched_job() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let source = dir.path().join("test.mkv");
        fs::write(&source, b"untouched").unwrap();

        let initial = [Entry { path: source, discovered: 8, hash: hash(b"untouched"), ..Default::default() }];
        create_and_populate(&db, &initial, &[1]);

        let store = Store::open(&db).unwrap();
        assert!(store.jobs().unwrap().is_empty());
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_pending());
        assert_eq!(entries[0].discovered, 8);
        store.close().unwrap();
    }

    #[test]
    fn test_open_fails_when_recovery_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("test.db");
        let source = dir.path().join("a.mkv");
        fs::write(&source, b"edited").unwrap();

        // Content changed, so the job is completed, but there's no output to fingerprint
        create_and_populate(
            &db,
            &[Entry { path: source.clone(), discovered: 8, hash: hash(b"original"), ..Default::default() }],
            &[1],
        );

        let err = Store::open(&db).err().unwrap();
        match err {
            StoreError::Recovery { path, source: cause } => {
                assert_eq!(path, source);
                assert!(matches!(*cause, StoreError::Fingerprint { .. }), "unexpected cause: {cause:?}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");

        fs::write(&source, b"same").unwrap();
        let pending = Entry { path: source.clone(), hash: hash(b"same"), ..Default::default() };
        assert_eq!(RecoveryAction::classify(&pending), RecoveryAction::Rollback);

        let edited = Entry { hash: hash(b"different"), ..pending.clone() };
        assert_eq!(RecoveryAction::classify(&edited), RecoveryAction::Complete);

        fs::remove_file(&source).unwrap();
        assert_eq!(RecoveryAction::classify(&pending), RecoveryAction::Rollback);

        fs::write(artifact::transcoding_path(&source), b"output").unwrap();
        assert_eq!(RecoveryAction::classify(&pending), RecoveryAction::Complete);
    }
}
