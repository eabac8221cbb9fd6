//! Scripted detector backend.
//!
//! Replays a fixed sequence of per-frame detection sets, one step per call
//! to `detect`. Used for demos against the synthetic source and for
//! end-to-end tests that need a deterministic detector.
//!
//! Script format (JSON array):
//!
//! ```json
//! [
//!   { "repeat": 20 },
//!   { "repeat": 60, "detections": [
//!       { "class_id": 19, "confidence": 0.9,
//!         "bbox": { "x1": 100, "y1": 200, "x2": 300, "y2": 500 } } ] },
//!   { "fail": "simulated inference error" }
//! ]
//! ```

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

fn one() -> u32 {
    1
}

/// One scripted step, applied to `repeat` consecutive frames.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScriptStep {
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// When set, the step reports a detector failure with this message.
    #[serde(default)]
    pub fail: Option<String>,
    #[serde(default = "one")]
    pub repeat: u32,
}

impl ScriptStep {
    pub fn detections(detections: Vec<Detection>, repeat: u32) -> Self {
        Self {
            detections,
            fail: None,
            repeat,
        }
    }

    pub fn empty(repeat: u32) -> Self {
        Self::detections(Vec::new(), repeat)
    }

    pub fn failure(message: &str) -> Self {
        Self {
            detections: Vec::new(),
            fail: Some(message.to_string()),
            repeat: 1,
        }
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }
}

pub struct ScriptedBackend {
    script: Vec<ScriptStep>,
    /// Step being replayed.
    step: usize,
    /// Frames still owed by `step`.
    left: u32,
    looping: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        let mut backend = Self {
            script,
            step: 0,
            left: 0,
            looping: false,
        };
        backend.rewind();
        backend
    }

    /// Restart the script from the top once it runs out instead of going quiet.
    pub fn looping(mut self, enabled: bool) -> Self {
        self.looping = enabled;
        self
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detector script {}", path.display()))?;
        let script: Vec<ScriptStep> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid detector script {}", path.display()))?;
        Ok(Self::new(script))
    }

    /// Frames left before the script is exhausted.
    pub fn remaining(&self) -> u64 {
        let later: u64 = self
            .script
            .iter()
            .skip(self.step + 1)
            .map(|step| step.repeat as u64)
            .sum();
        self.left as u64 + later
    }

    fn rewind(&mut self) {
        self.step = 0;
        self.left = self.script.first().map_or(0, |step| step.repeat);
    }

    /// Index of the step for the next frame, or `None` once the script is done.
    fn advance(&mut self) -> Option<usize> {
        while self.left == 0 {
            if self.step + 1 < self.script.len() {
                self.step += 1;
                self.left = self.script[self.step].repeat;
            } else if self.looping && self.script.iter().any(|step| step.repeat > 0) {
                self.rewind();
            } else {
                return None;
            }
        }
        self.left -= 1;
        Some(self.step)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
        let Some(idx) = self.advance() else {
            return Ok(Vec::new());
        };
        let step = &self.script[idx];
        match &step.fail {
            Some(message) => Err(anyhow!("scripted detector failure: {}", message)),
            None => Ok(step.detections.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn cow() -> Detection {
        Detection::new(19, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn replays_steps_with_repeats() -> Result<()> {
        let mut backend = ScriptedBackend::new(vec![
            ScriptStep::empty(2),
            ScriptStep::detections(vec![cow()], 1),
            ScriptStep::failure("boom"),
        ]);
        let image = RgbImage::new(1, 1);
        assert_eq!(backend.remaining(), 4);
        assert!(backend.detect(&image)?.is_empty());
        assert!(backend.detect(&image)?.is_empty());
        assert_eq!(backend.detect(&image)?, vec![cow()]);
        assert!(backend.detect(&image).is_err());
        // Exhausted: quiet from now on.
        assert!(backend.detect(&image)?.is_empty());
        assert_eq!(backend.remaining(), 0);
        Ok(())
    }

    #[test]
    fn huge_repeat_is_replayed_lazily() -> Result<()> {
        let mut backend = ScriptedBackend::new(vec![
            ScriptStep::detections(vec![cow()], 4_000_000_000),
            ScriptStep::empty(2),
        ]);
        let image = RgbImage::new(1, 1);
        assert_eq!(backend.remaining(), 4_000_000_002);
        for _ in 0..5 {
            assert_eq!(backend.detect(&image)?, vec![cow()]);
        }
        assert_eq!(backend.remaining(), 3_999_999_997);
        Ok(())
    }

    #[test]
    fn zero_repeat_steps_are_skipped() -> Result<()> {
        let mut backend = ScriptedBackend::new(vec![
            ScriptStep::failure("never").with_repeat(0),
            ScriptStep::detections(vec![cow()], 1),
        ])
        .looping(true);
        let image = RgbImage::new(1, 1);
        for _ in 0..3 {
            assert_eq!(backend.detect(&image)?, vec![cow()]);
        }

        let mut silent = ScriptedBackend::new(vec![ScriptStep::empty(0)]).looping(true);
        assert!(silent.detect(&image)?.is_empty());
        Ok(())
    }

    #[test]
    fn looping_script_restarts() -> Result<()> {
        let mut backend =
            ScriptedBackend::new(vec![ScriptStep::detections(vec![cow()], 1)]).looping(true);
        let image = RgbImage::new(1, 1);
        for _ in 0..3 {
            assert_eq!(backend.detect(&image)?.len(), 1);
        }
        Ok(())
    }

    #[test]
    fn parses_json_script() -> Result<()> {
        let raw = r#"[
            { "repeat": 3 },
            { "detections": [ { "class_id": 19, "confidence": 0.8,
                "bbox": { "x1": 1, "y1": 2, "x2": 3, "y2": 4 } } ] },
            { "fail": "timeout" }
        ]"#;
        let script: Vec<ScriptStep> = serde_json::from_str(raw)?;
        assert_eq!(script.len(), 3);
        assert_eq!(script[0].repeat, 3);
        assert_eq!(script[1].detections[0].class_id, 19);
        assert_eq!(script[2].fail.as_deref(), Some("timeout"));
        Ok(())
    }
}
