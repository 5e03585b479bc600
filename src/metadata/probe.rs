use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::error;

use super::{MetadataTier, Orientation, VideoMetadata};
use crate::error::VindexError;
use crate::retry::RetryPolicy;

/// Terminal tier: runs ffprobe on the file. Retried with linear backoff and
/// a hard per-call timeout; a final failure is reported as a miss so the
/// chain can fall back to defaults instead of blocking indexing.
pub struct ProbeTier {
    ffprobe_path: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ProbeTier {
    pub fn new(ffprobe_path: String, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            ffprobe_path,
            timeout,
            retry,
        }
    }

    async fn run_ffprobe(&self, path: &str) -> Result<VideoMetadata, VindexError> {
        let invocation = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "stream=codec_type,codec_name,width,height,duration",
                "-of",
                "json",
                path,
            ])
            .output();

        let output = tokio::time::timeout(self.timeout, invocation)
            .await
            .map_err(|_| VindexError::Probe(format!("ffprobe timed out for {path}")))?
            .map_err(|e| VindexError::Probe(format!("failed to spawn ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VindexError::Probe(format!(
                "ffprobe exited with {} for {path}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_ffprobe_output(&output.stdout)
            .ok_or_else(|| VindexError::Probe(format!("unparseable ffprobe output for {path}")))
    }
}

/// Extracts the first video stream from ffprobe's JSON. ffprobe reports
/// duration as a string.
pub(crate) fn parse_ffprobe_output(raw: &[u8]) -> Option<VideoMetadata> {
    let data: serde_json::Value = serde_json::from_slice(raw).ok()?;
    let streams = data.get("streams")?.as_array()?;
    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))?;

    let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0);
    let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0);
    let duration = video
        .get("duration")
        .and_then(|v| v.as_str())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .or_else(|| video.get("duration").and_then(|v| v.as_f64()))
        .unwrap_or(0.0);
    let codec = video
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let resolution = if width > 0 && height > 0 {
        format!("{width}x{height}")
    } else {
        "unknown".to_string()
    };

    Some(VideoMetadata {
        codec,
        resolution,
        orientation: Orientation::from_dimensions(width, height),
        duration_seconds: duration,
    })
}

#[async_trait]
impl MetadataTier for ProbeTier {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn lookup(&self, path: &str) -> Option<VideoMetadata> {
        match self.retry.run(|| self.run_ffprobe(path)).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                error!("metadata probe exhausted retries for {path}: {e}");
                None
            }
        }
    }

    async fn store(&self, _path: &str, _meta: &VideoMetadata) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_stream() {
        let raw = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264",
                 "width": 1920, "height": 1080, "duration": "12.500000"}
            ]
        }"#;
        let meta = parse_ffprobe_output(raw).unwrap();
        assert_eq!(meta.codec, "h264");
        assert_eq!(meta.resolution, "1920x1080");
        assert_eq!(meta.orientation, Orientation::Landscape);
        assert!((meta.duration_seconds - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_video_stream_is_unparseable() {
        let raw = br#"{"streams": [{"codec_type": "audio", "codec_name": "mp3"}]}"#;
        assert_eq!(parse_ffprobe_output(raw), None);
    }

    #[test]
    fn missing_dimensions_fall_back_to_unknown() {
        let raw = br#"{"streams": [{"codec_type": "video", "codec_name": "theora"}]}"#;
        let meta = parse_ffprobe_output(raw).unwrap();
        assert_eq!(meta.resolution, "unknown");
        assert_eq!(meta.orientation, Orientation::Unknown);
        assert_eq!(meta.duration_seconds, 0.0);
    }

    #[tokio::test]
    async fn missing_binary_is_a_miss_after_retries() {
        let tier = ProbeTier::new(
            "/nonexistent/ffprobe".to_string(),
            Duration::from_secs(5),
            RetryPolicy::new(2, Duration::ZERO),
        );
        assert_eq!(tier.lookup("/v.mp4").await, None);
    }
}
