use serde::{Deserialize, Deserializer, de};

use crate::error::ApiError;

/// Raw wire body of `POST /api/download`. Every field is optional at the
/// serde level so that shape problems surface as field-specific 400s from
/// [`DownloadRequest::validate`] instead of opaque deserialization errors.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    pub format: Option<String>,
    #[serde(default, deserialize_with = "quality_field")]
    pub audio_quality: Option<String>,
    #[serde(default, deserialize_with = "quality_field")]
    pub video_quality: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Mp4,
    Mp3,
}

impl OutputKind {
    /// Canonical container extension for the requested kind. Verification of
    /// the finished download uses this mapping, never the name the external
    /// tool reports.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioBitrate {
    Kbps128,
    Kbps192,
    Kbps320,
}

impl AudioBitrate {
    pub fn kbps(self) -> u32 {
        match self {
            Self::Kbps128 => 128,
            Self::Kbps192 => 192,
            Self::Kbps320 => 320,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "128" => Some(Self::Kbps128),
            "192" => Some(Self::Kbps192),
            "320" => Some(Self::Kbps320),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
    Best,
    Capped(u32),
}

impl VideoQuality {
    const ALLOWED_HEIGHTS: [u32; 6] = [144, 240, 360, 480, 720, 1080];

    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("best") {
            return Some(Self::Best);
        }

        value
            .parse::<u32>()
            .ok()
            .filter(|height| Self::ALLOWED_HEIGHTS.contains(height))
            .map(Self::Capped)
    }

    pub fn label(self) -> String {
        match self {
            Self::Best => "best".to_string(),
            Self::Capped(height) => height.to_string(),
        }
    }
}

/// A fully validated request with defaults applied. Exactly one of the two
/// quality fields is active, selected by `kind`.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub kind: OutputKind,
    pub audio_quality: AudioBitrate,
    pub video_quality: VideoQuality,
}

impl DownloadJob {
    pub fn format_name(&self) -> &'static str {
        self.kind.extension()
    }

    /// The quality value echoed back in the success payload: bitrate for
    /// audio downloads, resolution cap for video downloads.
    pub fn quality_label(&self) -> String {
        match self.kind {
            OutputKind::Mp3 => self.audio_quality.kbps().to_string(),
            OutputKind::Mp4 => self.video_quality.label(),
        }
    }
}

impl DownloadRequest {
    /// Checks field presence and membership in the allowed value sets, then
    /// applies defaults (mp4, 192 kbps, best resolution). No side effects;
    /// nothing external is invoked before this passes.
    pub fn validate(self) -> Result<DownloadJob, ApiError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ApiError::bad_request("You must provide a video URL."));
        }

        let kind = match self.format.as_deref().map(str::trim) {
            None | Some("") => OutputKind::Mp4,
            Some("mp4") => OutputKind::Mp4,
            Some("mp3") => OutputKind::Mp3,
            Some(other) => {
                return Err(ApiError::bad_request(format!(
                    "Invalid format {other:?}. Supported formats: mp4, mp3."
                )));
            }
        };

        let audio_quality = match self.audio_quality.as_deref().map(str::trim) {
            None | Some("") => AudioBitrate::Kbps192,
            Some(value) => AudioBitrate::parse(value).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "Invalid audio_quality {value:?}. Supported values: 128, 192, 320."
                ))
            })?,
        };

        let video_quality = match self.video_quality.as_deref().map(str::trim) {
            None | Some("") => VideoQuality::Best,
            Some(value) => VideoQuality::parse(value).ok_or_else(|| {
                ApiError::bad_request(format!(
                    "Invalid video_quality {value:?}. Supported values: 144, 240, 360, 480, 720, 1080, best."
                ))
            })?,
        };

        Ok(DownloadJob {
            url: url.to_string(),
            kind,
            audio_quality,
            video_quality,
        })
    }
}

/// Accepts quality values as either JSON strings (`"192"`) or bare numbers
/// (`192`), normalizing to a string for validation.
fn quality_field<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OuterVisitor;

    impl<'de> de::Visitor<'de> for OuterVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a quality value as string or number, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(
            self,
            deserializer: D2,
        ) -> Result<Self::Value, D2::Error> {
            struct InnerVisitor;

            impl<'de2> de::Visitor<'de2> for InnerVisitor {
                type Value = String;

                fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                    formatter.write_str("a quality value as string or number")
                }

                fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                    Ok(value.to_string())
                }

                fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                    Ok(value.to_string())
                }

                fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                    Ok(value.to_string())
                }
            }

            deserializer.deserialize_any(InnerVisitor).map(Some)
        }
    }

    deserializer.deserialize_option(OuterVisitor)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> DownloadRequest {
        serde_json::from_value(value).expect("request body should deserialize")
    }

    #[test]
    fn defaults_are_mp4_best_and_192kbps() {
        let job = parse(json!({ "url": "https://valid.example/watch?id=1" }))
            .validate()
            .unwrap();

        assert_eq!(job.kind, OutputKind::Mp4);
        assert_eq!(job.audio_quality, AudioBitrate::Kbps192);
        assert_eq!(job.video_quality, VideoQuality::Best);
        assert_eq!(job.quality_label(), "best");
    }

    #[test]
    fn missing_url_is_rejected() {
        let error = parse(json!({})).validate().unwrap_err();
        assert_eq!(error.status, axum::http::StatusCode::BAD_REQUEST);
        assert!(error.message.contains("URL"));
    }

    #[test]
    fn blank_url_is_rejected() {
        let error = parse(json!({ "url": "   " })).validate().unwrap_err();
        assert_eq!(error.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let error = parse(json!({ "url": "https://valid.example/v", "format": "wav" }))
            .validate()
            .unwrap_err();
        assert!(error.message.contains("format"));
    }

    #[test]
    fn audio_quality_accepts_strings_and_numbers() {
        let from_string = parse(json!({
            "url": "https://valid.example/v",
            "format": "mp3",
            "audio_quality": "320"
        }))
        .validate()
        .unwrap();
        let from_number = parse(json!({
            "url": "https://valid.example/v",
            "format": "mp3",
            "audio_quality": 320
        }))
        .validate()
        .unwrap();

        assert_eq!(from_string.audio_quality, AudioBitrate::Kbps320);
        assert_eq!(from_number.audio_quality, AudioBitrate::Kbps320);
        assert_eq!(from_string.quality_label(), "320");
    }

    #[test]
    fn out_of_set_audio_quality_is_rejected() {
        let error = parse(json!({
            "url": "https://valid.example/v",
            "format": "mp3",
            "audio_quality": "256"
        }))
        .validate()
        .unwrap_err();
        assert!(error.message.contains("audio_quality"));
    }

    #[test]
    fn out_of_set_video_quality_is_rejected() {
        let error = parse(json!({
            "url": "https://valid.example/v",
            "video_quality": "7200"
        }))
        .validate()
        .unwrap_err();
        assert!(error.message.contains("video_quality"));
    }

    #[test]
    fn capped_video_quality_parses() {
        let job = parse(json!({
            "url": "https://valid.example/v",
            "video_quality": "720"
        }))
        .validate()
        .unwrap();

        assert_eq!(job.video_quality, VideoQuality::Capped(720));
        assert_eq!(job.quality_label(), "720");
    }

    #[test]
    fn invalid_quality_on_any_kind_is_rejected() {
        // audio_quality is inactive for mp4 requests but still has to be a
        // recognized value when supplied.
        let error = parse(json!({
            "url": "https://valid.example/v",
            "format": "mp4",
            "audio_quality": "1"
        }))
        .validate()
        .unwrap_err();
        assert!(error.message.contains("audio_quality"));
    }
}
