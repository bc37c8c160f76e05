use rusqlite::Connection;

/// Initial release of the store layout
pub const SCHEMA_VERSION_ONE: u32 = 1;

/// Version written to newly created stores
pub const SCHEMA_VERSION_CURRENT: u32 = SCHEMA_VERSION_ONE;

/// Check if a persisted `user_version` can be opened by this build
pub fn is_supported(version: u32) -> bool {
    version != 0 && version <= SCHEMA_VERSION_CURRENT
}

pub(super) const CREATE_TABLES: &str = "
    create table library (
        id integer primary key autoincrement,
        path text not null unique,
        discovered integer not null,
        transcoded integer,
        hash integer unique,
        unique (path, hash)
    );

    create table jobs (
        id integer primary key autoincrement,
        library_id integer not null unique,
        start_time integer not null,
        foreign key (library_id) references library (id)
    );
";

/// Apply the connection level pragmas every handle needs
///
/// `foreign_keys` is per-connection in SQLite so this must run on every open, not just on create.
pub(super) fn configure(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
    log::debug!("SQLite journal mode: {}", mode);
    conn.pragma_update(None, "synchronous", "extra")?;
    conn.pragma_update(None, "foreign_keys", "on")?;
    Ok(())
}

pub(super) fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}

pub(super) fn set_user_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "user_version", version)
}
