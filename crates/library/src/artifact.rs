use std::path::{Path, PathBuf};

/// Extension of finished transcodes (ffmpeg picks the container from it)
pub const TARGET_EXTENSION: &str = "mp4";

/// Extension written by the transcoder while a job is in flight; renamed to
/// [`TARGET_EXTENSION`] once the job completes
pub const TRANSCODING_EXTENSION: &str = "transcoding.mp4";

/// Media file extensions picked up when walking a library
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi"];

/// Get the path the transcoder writes its in-progress output to for a given source file
pub fn transcoding_path(source: &Path) -> PathBuf {
    source.with_extension(TRANSCODING_EXTENSION)
}

/// Get the final path of the transcoded output for a given source file
pub fn target_path(source: &Path) -> PathBuf {
    source.with_extension(TARGET_EXTENSION)
}

/// Check if a path is an in-progress transcoder output
pub fn is_transcoding_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(&format!(".{}", TRANSCODING_EXTENSION)))
        .unwrap_or(false)
}

/// Check if a path has one of the supported media extensions
pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Check if a path should be tracked: a supported media file which isn't a transcoder artifact
pub fn is_candidate(path: &Path) -> bool {
    has_supported_extension(path) && !is_transcoding_artifact(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcoding_path_replaces_extension() {
        assert_eq!(transcoding_path(Path::new("/a/test.avi")), PathBuf::from("/a/test.transcoding.mp4"));
        assert_eq!(transcoding_path(Path::new("/a/test.mp4")), PathBuf::from("/a/test.transcoding.mp4"));
        assert_eq!(transcoding_path(Path::new("/a/test")), PathBuf::from("/a/test.transcoding.mp4"));
    }

    #[test]
    fn test_target_path_replaces_extension() {
        assert_eq!(target_path(Path::new("/a/test.mkv")), PathBuf::from("/a/test.mp4"));
        assert_eq!(target_path(Path::new("/a/test.mp4")), PathBuf::from("/a/test.mp4"));
        assert_eq!(target_path(Path::new("/a/some.movie.avi")), PathBuf::from("/a/some.movie.mp4"));
    }

    #[test]
    fn test_candidates() {
        assert!(is_candidate(Path::new("movie.mkv")));
        assert!(is_candidate(Path::new("movie.mp4")));
        assert!(is_candidate(Path::new("movie.avi")));
        // Extensions are matched case sensitively
        assert!(!is_candidate(Path::new("movie.MKV")));
        assert!(!is_candidate(Path::new("movie.srt")));
        assert!(!is_candidate(Path::new("movie")));
        assert!(!is_candidate(Path::new("movie.transcoding.mp4")));
    }
}
