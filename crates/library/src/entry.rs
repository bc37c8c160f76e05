use std::fmt;
use std::path::PathBuf;

/// A media file tracked by the store
///
/// Identity is the content fingerprint (`hash`), not the path: upserting an entry whose hash is
/// already known is treated as the same file having moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Row id assigned by the store, zero until the entry has been persisted
    pub id: i64,
    pub path: PathBuf,
    /// Unix timestamp (seconds) at which the file was first discovered
    pub discovered: i64,
    /// Unix timestamp (seconds) at which transcoding completed, `None` while pending
    pub transcoded: Option<i64>,
    /// Sampled CRC-32 fingerprint, see [`crate::fingerprint`]
    pub hash: u32,
}

impl Entry {
    /// A freshly discovered, untranscoded entry with no fingerprint yet
    pub fn discovered(path: impl Into<PathBuf>, discovered: i64) -> Self {
        Self {
            path: path.into(),
            discovered,
            ..Default::default()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.transcoded.is_none()
    }
}

/// A durable claim that an entry is being transcoded
///
/// At most one job exists per entry. It's removed on completion, on cancellation, or by the
/// recovery pass when the store is next opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: i64,
    pub library_id: i64,
    /// Unix timestamp (seconds) at which the entry was claimed
    pub start_time: i64,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id != 0 {
            write!(f, "#{} ", self.id)?;
        }
        write!(f, "{}", self.path.display())?;
        if self.hash != 0 {
            write!(f, " (hash {:08x})", self.hash)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovered_entry_is_pending() {
        let entry = Entry::discovered("/media/movie.mkv", 42);
        assert_eq!(entry.id, 0);
        assert_eq!(entry.discovered, 42);
        assert_eq!(entry.hash, 0);
        assert!(entry.is_pending());
    }

    #[test]
    fn test_display_omits_unset_fields() {
        let entry = Entry::discovered("/media/movie.mkv", 42);
        assert_eq!(entry.to_string(), "/media/movie.mkv");

        let entry = Entry { id: 7, hash: 0xdeadbeef, ..entry };
        assert_eq!(entry.to_string(), "#7 /media/movie.mkv (hash deadbeef)");
    }
}
