//! HTTP MJPEG / JPEG snapshot source.
//!
//! Covers phone IP-webcam apps and most network cameras: a
//! `multipart/x-mixed-replace` response is parsed as a continuous MJPEG
//! stream, anything else is treated as a single-JPEG endpoint and polled.
//!
//! Frames arriving faster than `target_fps` are decimated at the source so
//! the decoder does not burn CPU on images nobody will look at.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{frame_interval, health_grace, FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;

pub struct MjpegSource {
    config: SourceConfig,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Multipart(MjpegStream),
    Snapshot,
}

impl MjpegSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
        }
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        match self.stream.as_mut() {
            Some(HttpStream::Multipart(stream)) => stream.read_next_jpeg(),
            Some(HttpStream::Snapshot) => fetch_snapshot(&self.config.url).map(Some),
            None => Err(anyhow!("mjpeg source not connected; call connect() first")),
        }
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        Url::parse(&self.config.url)
            .with_context(|| format!("invalid stream url '{}'", self.config.url))?;
        let response = ureq::get(&self.config.url)
            .call()
            .with_context(|| format!("connect to {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        self.stream = if content_type.to_ascii_lowercase().contains("multipart") {
            log::info!("MjpegSource: multipart stream at {}", self.config.url);
            Some(HttpStream::Multipart(MjpegStream::new(response.into_reader())))
        } else {
            log::info!("MjpegSource: polling JPEG snapshots at {}", self.config.url);
            Some(HttpStream::Snapshot)
        };
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let Some(jpeg) = self.read_jpeg()? else {
                return Ok(None);
            };
            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    if matches!(self.stream, Some(HttpStream::Snapshot)) {
                        std::thread::sleep(min_interval - now.duration_since(last));
                    }
                    continue;
                }
            }

            let image = image::load_from_memory(&jpeg)
                .context("decode jpeg frame")?
                .into_rgb8();
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Some(Frame::captured_at(image, self.frame_count, now)));
        }
    }

    fn is_healthy(&self) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        match self.last_frame_at {
            Some(last) => last.elapsed() <= health_grace(self.config.target_fps),
            None => connected_at.elapsed() <= Duration::from_secs(5),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Multipart parsing
// ----------------------------------------------------------------------------

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG in the stream; `None` once the server closes it.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(jpeg));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // Garbage without markers: keep only a possible split SOI.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Locate the first SOI..EOI span in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
