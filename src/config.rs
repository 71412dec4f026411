use std::{path::PathBuf, time::Duration};

const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
const DEFAULT_YTDLP_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Process-wide settings, read from the environment once at startup and
/// passed explicitly through [`crate::server::AppState`].
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub download_dir: PathBuf,
    pub ytdlp_bin: PathBuf,
    pub ytdlp_timeout: Duration,
    pub max_concurrent_downloads: usize,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let download_dir = std::env::var("DOWNLOAD_DIR")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

        let ytdlp_bin = std::env::var("YTDLP_BIN")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));

        let ytdlp_timeout = read_u64_env("YTDLP_TIMEOUT_SECONDS")
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_YTDLP_TIMEOUT_SECONDS));

        let max_concurrent_downloads = read_u64_env("MAX_CONCURRENT_DOWNLOADS")
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_addr: resolve_bind_addr(),
            download_dir,
            ytdlp_bin,
            ytdlp_timeout,
            max_concurrent_downloads,
            allowed_origins,
        }
    }
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:8080".to_string()
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
