use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`crate::store::Store`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database at '{}' not found", .0.display())]
    NotFound(PathBuf),

    #[error("database at '{}' already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("database at '{}' is an unsupported version ({version})", .path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },

    /// Nothing is waiting to be transcoded; a normal end to a claim loop
    #[error("no entries are eligible for transcoding")]
    NoEligibleWork,

    #[error("database has been closed")]
    Closed,

    #[error("path '{}' is not valid UTF-8", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to fingerprint '{}': {source}", .path.display())]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to recover job for '{}': {source}", .path.display())]
    Recovery {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by a [`crate::transcode::Transcoder`]
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to run '{}': {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' exited with code {code:?} during {pass}:\n{stderr}", .program.display())]
    Failed {
        program: PathBuf,
        pass: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse loudnorm stats: {0}")]
    Stats(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
