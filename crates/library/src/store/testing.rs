use std::path::Path;
use crate::entry::Entry;
use super::{add_job, Store};

/// Create a store at `path`, upsert `entries` then record jobs for the given entry ids
pub(crate) fn create_and_populate(path: &Path, entries: &[Entry], jobs: &[i64]) {
    let store = Store::create(path).expect("create test database");

    for entry in entries {
        store.upsert(entry).expect("upsert entry");
    }

    for &library_id in jobs {
        store
            .with_transaction(|conn| add_job(conn, library_id))
            .expect("add job");
    }

    store.close().expect("close test database");
}

/// Open the store at `path` (running recovery) and upsert `entries`
pub(crate) fn open_and_update(path: &Path, entries: &[Entry]) {
    let store = Store::open(path).expect("open test database");

    for entry in entries {
        store.upsert(entry).expect("upsert entry");
    }

    store.close().expect("close test database");
}

/// Assert the store at `path` holds exactly `expected` entries and jobs for `expected_jobs`
///
/// Ids are ignored and completion timestamps are only compared for presence.
pub(crate) fn assert_contains(path: &Path, expected: &[Entry], expected_jobs: &[i64]) {
    let store = Store::open(path).expect("open test database");

    let normalize = |entries: &[Entry]| {
        let mut entries: Vec<Entry> = entries
            .iter()
            .map(|e| Entry {
                id: 0,
                transcoded: e.transcoded.map(|_| 0),
                ..e.clone()
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    };

    let actual = store.entries().expect("query entries");
    assert_eq!(normalize(&actual), normalize(expected), "database contained unexpected entries");

    let jobs: Vec<i64> = store
        .jobs()
        .expect("query jobs")
        .into_iter()
        .map(|job| job.library_id)
        .collect();
    assert_eq!(jobs, expected_jobs, "database contained unexpected jobs");

    store.close().expect("close test database");
}
