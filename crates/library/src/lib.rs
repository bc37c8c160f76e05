pub mod artifact;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod pool;
pub mod scan;
pub mod store;
pub mod tasks;
pub mod transcode;

pub use config::Settings;
pub use entry::{Entry, Job};
pub use error::{StoreError, StoreResult, TranscodeError};
pub use pool::{Mode, Offer, Pool};
pub use store::Store;
pub use transcode::{Ffmpeg, Transcoder};
