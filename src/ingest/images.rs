//! Local still-image sequence source.
//!
//! Replays every JPEG/PNG in a directory in file-name order, one frame per
//! file. Reaching the end of the listing is end of stream. A file that fails
//! to decode is a transient read failure; the next call moves on.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use super::{pace, FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    config: SourceConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl ImageDirSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.files.len().saturating_sub(self.cursor)
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        let dir = PathBuf::from(&self.config.url);
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to open image directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list {}", dir.display()))?
                .path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_image {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no JPEG/PNG frames found in {}", dir.display()));
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} frames queued from {}",
            files.len(),
            dir.display()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        pace(self.last_frame_at, self.config.target_fps);

        let image = image::open(&path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .into_rgb8();
        self.frame_count += 1;
        let frame = Frame::new(image, self.frame_count);
        self.last_frame_at = Some(frame.captured_at);
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}
