//! Synthetic frame source for `stub://` addresses.
//!
//! Produces frames at the requested resolution without any camera. An
//! optional `?frames=N` suffix ends the stream after N frames, which lets
//! demos and tests exercise the end-of-stream path.

use std::time::Instant;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{health_grace, pace, FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    config: SourceConfig,
    frame_limit: Option<u64>,
    frame_count: u64,
    connected: bool,
    last_frame_at: Option<Instant>,
    /// Simulated scene state, nudged periodically so frames are not identical.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let frame_limit = parse_frame_limit(&config.url)?;
        Ok(Self {
            config,
            frame_limit,
            frame_count: 0,
            connected: false,
            last_frame_at: None,
            scene_state: 0,
        })
    }

    fn generate_image(&mut self) -> RgbImage {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count as u32 + self.scene_state as u32;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let v = ((x + y + shift) % 256) as u8;
            Rgb([v, v.wrapping_add(85), v.wrapping_add(170)])
        })
    }
}

impl FrameSource for SyntheticSource {
    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        pace(self.last_frame_at, self.config.target_fps);

        self.frame_count += 1;
        let image = self.generate_image();
        let frame = Frame::new(image, self.frame_count);
        self.last_frame_at = Some(frame.captured_at);
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        match self.last_frame_at {
            Some(last) => last.elapsed() <= health_grace(self.config.target_fps),
            None => self.connected,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

fn parse_frame_limit(url: &str) -> Result<Option<u64>> {
    let Some((_, query)) = url.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            let limit = value
                .parse()
                .map_err(|_| anyhow!("stub source frames= must be an integer, got '{}'", value))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
