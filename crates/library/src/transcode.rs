use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use crate::artifact;
use crate::error::TranscodeError;

/// An external tool which converts a source file into its in-progress output
///
/// On success the output must exist at [`artifact::transcoding_path`] of the source. Workers share
/// one transcoder, so implementations must be usable from several threads at once.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, source: &Path) -> Result<(), TranscodeError>;
}

/// Measurements printed by ffmpeg's `loudnorm` filter in analysis mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoudnormStats {
    #[serde(rename = "input_i")]
    pub measured_i: String,
    #[serde(rename = "input_tp")]
    pub measured_tp: String,
    #[serde(rename = "input_lra")]
    pub measured_lra: String,
    #[serde(rename = "input_thresh")]
    pub measured_thresh: String,
    pub target_offset: String,
}

impl LoudnormStats {
    /// Extract the stats from the tail of an analysis run's stderr
    ///
    /// ffmpeg prints the JSON object last, after its usual progress output.
    pub fn parse(stderr: &str) -> Result<Self, TranscodeError> {
        let start = stderr
            .rfind('{')
            .ok_or_else(|| TranscodeError::Stats("no JSON object in ffmpeg output".to_string()))?;
        let end = stderr[start..]
            .find('}')
            .map(|offset| start + offset + 1)
            .ok_or_else(|| TranscodeError::Stats("unterminated JSON object in ffmpeg output".to_string()))?;

        serde_json::from_str(&stderr[start..end]).map_err(|e| TranscodeError::Stats(e.to_string()))
    }

    /// The second-pass filter applying a linear gain derived from these measurements
    pub fn filter(&self) -> String {
        format!(
            "loudnorm=linear=true:measured_i={}:measured_tp={}:measured_lra={}:measured_thresh={}:offset={}",
            self.measured_i, self.measured_tp, self.measured_lra, self.measured_thresh, self.target_offset
        )
    }
}

/// Two-pass ffmpeg transcode to H.264/AAC with loudness normalisation
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_bin: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self { ffmpeg_bin: ffmpeg_bin.into() }
    }

    /// Arguments for the analysis pass, which measures loudness and discards all output
    pub fn analysis_args(source: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            source.to_string_lossy().to_string(),
            "-hide_banner".to_string(),
            "-vn".to_string(),
            "-af".to_string(),
            "loudnorm=print_format=json".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]
    }

    /// Arguments for the encode pass, writing to the in-progress output path
    ///
    /// Chapters, global metadata and subtitles are dropped and every stream is tagged English.
    pub fn encode_args(source: &Path, stats: &LoudnormStats) -> Vec<String> {
        let mut args: Vec<String> = vec!["-i".to_string(), source.to_string_lossy().to_string()];

        for arg in [
            "-map_chapters", "-1",
            "-map_metadata", "-1",
            "-metadata:s:a", "language=eng",
            "-metadata:s:v", "language=eng",
            "-sn",
            "-profile:v", "high",
            "-level:v", "4.0",
            "-pix_fmt", "yuv420p",
            "-acodec", "aac",
            "-vcodec", "h264",
        ] {
            args.push(arg.to_string());
        }

        args.push("-af".to_string());
        args.push(stats.filter());
        args.push(artifact::transcoding_path(source).to_string_lossy().to_string());

        args
    }

    fn run(&self, pass: &'static str, args: &[String]) -> Result<Output, TranscodeError> {
        debug!("Running {} pass: {} {}", pass, self.ffmpeg_bin.display(), args.join(" "));

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(args);

        // Keep ffmpeg out of our process group so Ctrl-C lets in-flight transcodes finish
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let output = cmd.output().map_err(|source| TranscodeError::Spawn {
            program: self.ffmpeg_bin.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!("{} pass failed:\n{}", pass, stderr);
            return Err(TranscodeError::Failed {
                program: self.ffmpeg_bin.clone(),
                pass,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(output)
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for Ffmpeg {
    fn transcode(&self, source: &Path) -> Result<(), TranscodeError> {
        let output = self.run("analysis", &Self::analysis_args(source))?;
        let stats = LoudnormStats::parse(&String::from_utf8_lossy(&output.stderr))?;
        debug!("Measured loudness of {}: {:?}", source.display(), stats);

        self.run("encode", &Self::encode_args(source, &stats))?;
        info!("Transcoded {} to {}", source.display(), artifact::transcoding_path(source).display());

        Ok(())
    }
}
