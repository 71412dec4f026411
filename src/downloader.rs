use std::{fmt, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    request::{AudioBitrate, DownloadJob, OutputKind, VideoQuality},
};

const TITLE_TOKEN_MAX_CHARS: usize = 40;
const FALLBACK_TITLE_TOKEN: &str = "media";

/// Where a download is written. Fixed before the external tool runs so the
/// finished file can be verified against a path the tool never chose.
#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub base_name: String,
    pub directory: PathBuf,
    pub extension: &'static str,
}

impl OutputTarget {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.base_name, self.extension)
    }

    pub fn final_path(&self) -> PathBuf {
        self.directory.join(self.file_name())
    }

    fn output_template(&self) -> String {
        format!(
            "{}/{}.%(ext)s",
            self.directory.to_string_lossy(),
            self.base_name
        )
    }
}

/// Everything that can go wrong between a validated request and a verified
/// file on disk. All variants map to a failed download, never a panic.
#[derive(Debug)]
pub enum DownloadError {
    Probe(String),
    Extraction(String),
    FileVerification(PathBuf),
    Timeout(u64),
    Spawn(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe(message) => write!(f, "failed to read media metadata: {message}"),
            Self::Extraction(message) => write!(f, "yt-dlp failed: {message}"),
            Self::FileVerification(path) => {
                write!(f, "expected output file {} was not produced", path.display())
            }
            Self::Timeout(seconds) => {
                write!(f, "the operation did not finish within {seconds} seconds")
            }
            Self::Spawn(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for DownloadError {}

/// Declarative stream selection handed to yt-dlp, derived from the output
/// kind and quality of a validated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelector {
    AudioOnly(AudioBitrate),
    VideoBest,
    VideoCapped(u32),
}

impl StreamSelector {
    pub fn for_job(job: &DownloadJob) -> Self {
        match job.kind {
            OutputKind::Mp3 => Self::AudioOnly(job.audio_quality),
            OutputKind::Mp4 => match job.video_quality {
                VideoQuality::Best => Self::VideoBest,
                VideoQuality::Capped(height) => Self::VideoCapped(height),
            },
        }
    }

    fn format_expr(&self) -> String {
        match self {
            Self::AudioOnly(_) => "bestaudio/best".to_string(),
            Self::VideoBest => "bestvideo+bestaudio/best".to_string(),
            Self::VideoCapped(height) => {
                format!("bestvideo[height<=?{height}]+bestaudio/best[height<=?{height}]")
            }
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        args.push("-f".to_string());
        args.push(self.format_expr());

        match self {
            Self::AudioOnly(bitrate) => {
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push("mp3".to_string());
                args.push("--audio-quality".to_string());
                args.push(format!("{}K", bitrate.kbps()));
            }
            Self::VideoBest | Self::VideoCapped(_) => {
                args.push("--merge-output-format".to_string());
                args.push("mp4".to_string());
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeInfo {
    title: Option<String>,
}

/// Drives the external yt-dlp binary. One instance is shared by all
/// requests; it holds no mutable state, so concurrent downloads need no
/// coordination beyond their unique output names.
#[derive(Debug)]
pub struct Downloader {
    bin: PathBuf,
    download_dir: PathBuf,
    run_timeout: Duration,
}

impl Downloader {
    pub fn new(config: &Config) -> Self {
        Self {
            bin: config.ytdlp_bin.clone(),
            download_dir: config.download_dir.clone(),
            run_timeout: config.ytdlp_timeout,
        }
    }

    /// Probes the source for its title (metadata only, nothing downloaded)
    /// and derives a collision-free output location for the requested kind.
    pub async fn resolve_target(
        &self,
        url: &str,
        kind: OutputKind,
    ) -> Result<OutputTarget, DownloadError> {
        let output = self
            .run_yt_dlp(vec![
                "-J".to_string(),
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                url.to_string(),
            ])
            .await?;

        if !output.status.success() {
            return Err(DownloadError::Probe(extraction_error_message(
                &output.stderr,
            )));
        }

        let info: ProbeInfo = serde_json::from_slice(&output.stdout).map_err(|error| {
            DownloadError::Probe(format!("could not parse metadata output: {error}"))
        })?;

        let token = sanitize_title(info.title.as_deref().unwrap_or_default());
        let base_name = format!("{token}-{}", Uuid::new_v4().simple());
        debug!(url, base_name = %base_name, "resolved download target");

        Ok(OutputTarget {
            base_name,
            directory: self.download_dir.clone(),
            extension: kind.extension(),
        })
    }

    /// Runs the actual download against a previously resolved target and
    /// confirms the expected file landed on disk. A success claim from the
    /// tool is not trusted until the canonical path exists.
    pub async fn execute(
        &self,
        job: &DownloadJob,
        target: &OutputTarget,
    ) -> Result<PathBuf, DownloadError> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "-o".to_string(),
            target.output_template(),
        ];
        StreamSelector::for_job(job).push_args(&mut args);
        args.push(job.url.clone());

        let output = self.run_yt_dlp(args).await?;
        if !output.status.success() {
            return Err(DownloadError::Extraction(extraction_error_message(
                &output.stderr,
            )));
        }

        let expected = target.final_path();
        match tokio::fs::metadata(&expected).await {
            Ok(metadata) if metadata.is_file() => Ok(expected),
            _ => {
                warn!(
                    path = %expected.display(),
                    "yt-dlp reported success but the expected file is missing"
                );
                Err(DownloadError::FileVerification(expected))
            }
        }
    }

    /// Convenience wrapper: resolve a target, then execute against it.
    pub async fn download(&self, job: &DownloadJob) -> Result<PathBuf, DownloadError> {
        let target = self.resolve_target(&job.url, job.kind).await?;
        self.execute(job, &target).await
    }

    async fn run_yt_dlp(&self, args: Vec<String>) -> Result<std::process::Output, DownloadError> {
        debug!(bin = %self.bin.display(), ?args, "invoking yt-dlp");
        let command_future = Command::new(&self.bin).args(&args).output();

        timeout(self.run_timeout, command_future)
            .await
            .map_err(|_| DownloadError::Timeout(self.run_timeout.as_secs()))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    DownloadError::Spawn(format!(
                        "{} is not installed or not on PATH",
                        self.bin.display()
                    ))
                } else {
                    DownloadError::Spawn(format!(
                        "could not run {}: {error}",
                        self.bin.display()
                    ))
                }
            })
    }
}

/// Reduces a probed title to a filesystem-safe token: alphanumerics of the
/// first word, capped in length, with a fixed fallback for titles that
/// sanitize away entirely.
fn sanitize_title(title: &str) -> String {
    let token: String = title
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|character| character.is_ascii_alphanumeric())
        .take(TITLE_TOKEN_MAX_CHARS)
        .collect();

    if token.is_empty() {
        FALLBACK_TITLE_TOKEN.to_string()
    } else {
        token
    }
}

/// Last non-empty stderr line, which is where yt-dlp puts its actual
/// complaint.
fn extraction_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp did not complete the operation")
        .to_string()
}
