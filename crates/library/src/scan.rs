use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;
use crate::artifact;

/// Walk `root` and pass every candidate media file to `visit`
///
/// Candidates are regular files with a supported extension which aren't an in-progress transcode.
/// A missing root is an error; unreadable entries below it, and candidates whose path isn't valid
/// UTF-8 (the database stores paths as text), are logged and skipped. Stops early,
/// returning `Ok(false)`, as soon as `visit` returns `Ok(false)`.
pub fn walk_library(root: &Path, mut visit: impl FnMut(PathBuf) -> Result<bool>) -> Result<bool> {
    if !root.exists() {
        anyhow::bail!("Library root does not exist: {}", root.display());
    }

    info!("Scanning directory: {}", root.display());

    let mut entry_count = 0;
    let mut candidates = 0;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        entry_count += 1;
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        if !entry.file_type().is_file() || !artifact::is_candidate(entry.path()) {
            continue;
        }

        if entry.path().to_str().is_none() {
            warn!("Skipping file with a non UTF-8 path: {}", entry.path().display());
            continue;
        }

        candidates += 1;
        debug!("Found candidate: {}", entry.path().display());

        let keep_going = visit(entry.into_path())
            .with_context(|| format!("Failed to process candidate under {}", root.display()))?;
        if !keep_going {
            info!("Stopped scanning {} after {} candidates", root.display(), candidates);
            return Ok(false);
        }
    }

    info!("Finished scanning {}: {} entries, {} candidates", root.display(), entry_count, candidates);

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("season 1")).unwrap();
        for name in [
            "a.mkv",
            "b.avi",
            "c.mp4",
            "c.transcoding.mp4",
            "notes.txt",
            "cover.jpg",
            "season 1/e01.mkv",
        ] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        dir
    }

    #[test]
    fn test_walk_library_yields_candidates() {
        let dir = library();
        let mut found = Vec::new();

        let finished = walk_library(dir.path(), |path| {
            found.push(path.strip_prefix(dir.path()).unwrap().to_path_buf());
            Ok(true)
        })
        .unwrap();

        assert!(finished);
        assert_eq!(
            found,
            ["a.mkv", "b.avi", "c.mp4", "season 1/e01.mkv"].map(PathBuf::from)
        );
    }

    #[test]
    fn test_walk_library_stops_early() {
        let dir = library();
        let mut visited = 0;

        let finished = walk_library(dir.path(), |_| {
            visited += 1;
            Ok(visited < 2)
        })
        .unwrap();

        assert!(!finished);
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_walk_library_propagates_errors() {
        let dir = library();
        let err = walk_library(dir.path(), |_| anyhow::bail!("queue full")).unwrap_err();
        assert!(format!("{err:#}").contains("queue full"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_walk_library_skips_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.mkv"), b"good").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"caf\xe9.mkv")), b"bad").unwrap();

        let mut found = Vec::new();
        walk_library(dir.path(), |path| {
            found.push(path);
            Ok(true)
        })
        .unwrap();

        assert_eq!(found, vec![dir.path().join("good.mkv")]);
    }

    #[test]
    fn test_walk_library_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(walk_library(&dir.path().join("missing"), |_| Ok(true)).is_err());
    }
}
