//! HTTP service that downloads a video URL as MP4 or MP3 by driving the
//! external `yt-dlp` binary, then serves the finished files back out of a
//! single download directory.

pub mod config;
pub mod downloader;
pub mod error;
pub mod files;
pub mod request;
pub mod server;
