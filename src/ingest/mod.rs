//! Frame ingestion sources.
//!
//! This module provides the video sources the pipeline can pull from:
//! - Synthetic `stub://` frames (demos and tests)
//! - A local directory of JPEG/PNG stills replayed in name order
//! - HTTP MJPEG / JPEG snapshot streams, e.g. phone IP-webcam apps (feature: ingest-http)
//! - RTSP streams via GStreamer (feature: rtsp-gstreamer)
//!
//! All sources produce `Frame` instances stamped with their capture instant.
//! `next_frame` is a blocking pull: `Ok(Some(frame))` for a frame,
//! `Ok(None)` at end of stream, `Err` for a (possibly transient) read failure.
//! The requested resolution is best effort; frames carry their real size.

mod acquire;
pub mod images;
#[cfg(feature = "ingest-http")]
pub mod mjpeg;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod synthetic;

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

pub use acquire::{spawn_acquisition, AcquisitionHandle, AcquisitionSummary, FailureBudget};
pub use images::ImageDirSource;
#[cfg(feature = "ingest-http")]
pub use mjpeg::MjpegSource;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use synthetic::SyntheticSource;

use crate::frame::Frame;

/// Configuration shared by every video source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// Source address: `stub://name`, `http(s)://...`, `rtsp://...` or a directory path.
    pub url: String,
    /// Requested capture width (best effort).
    pub width: u32,
    /// Requested capture height (best effort).
    pub height: u32,
    /// Pacing for sources that would otherwise run flat out. 0 = unpaced.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            target_fps: 10,
        }
    }
}

/// Statistics for a video source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Blocking pull interface over a video stream.
pub trait FrameSource: Send {
    /// Open the stream. Failure here is fatal for the pipeline.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame; `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Video source chosen from the configured address.
pub struct VideoSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Images(ImageDirSource),
    #[cfg(feature = "ingest-http")]
    Mjpeg(MjpegSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Rtsp(RtspSource),
}

impl VideoSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(anyhow!("video source address is empty"));
        }
        let backend = if url.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(config)?)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            http_backend(config)?
        } else if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            rtsp_backend(config)?
        } else if url.contains("://") {
            return Err(anyhow!("unsupported video source scheme in '{}'", url));
        } else {
            SourceBackend::Images(ImageDirSource::new(config))
        };
        Ok(Self { backend })
    }
}

#[cfg(feature = "ingest-http")]
fn http_backend(config: SourceConfig) -> Result<SourceBackend> {
    Ok(SourceBackend::Mjpeg(MjpegSource::new(config)))
}

#[cfg(not(feature = "ingest-http"))]
fn http_backend(_config: SourceConfig) -> Result<SourceBackend> {
    Err(anyhow!("HTTP video sources require the ingest-http feature"))
}

#[cfg(feature = "rtsp-gstreamer")]
fn rtsp_backend(config: SourceConfig) -> Result<SourceBackend> {
    Ok(SourceBackend::Rtsp(RtspSource::new(config)?))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn rtsp_backend(_config: SourceConfig) -> Result<SourceBackend> {
    Err(anyhow!("RTSP requires the rtsp-gstreamer feature"))
}

impl FrameSource for VideoSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            SourceBackend::Images(source) => source.connect(),
            #[cfg(feature = "ingest-http")]
            SourceBackend::Mjpeg(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Rtsp(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            SourceBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-http")]
            SourceBackend::Mjpeg(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Rtsp(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
            SourceBackend::Images(source) => source.is_healthy(),
            #[cfg(feature = "ingest-http")]
            SourceBackend::Mjpeg(source) => source.is_healthy(),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Rtsp(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            SourceBackend::Images(source) => source.stats(),
            #[cfg(feature = "ingest-http")]
            SourceBackend::Mjpeg(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Rtsp(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Pacing helpers shared by the sources
// ----------------------------------------------------------------------------

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}

/// Sleep until at least one frame interval has passed since `last`.
pub(crate) fn pace(last: Option<Instant>, target_fps: u32) {
    let interval = frame_interval(target_fps);
    if let Some(last) = last {
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}
