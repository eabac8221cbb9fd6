use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Backend that never detects anything. Useful for wiring checks.
#[derive(Default)]
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_never_detects() -> Result<()> {
        let mut backend = StubBackend::new();
        let image = RgbImage::new(4, 4);
        for _ in 0..3 {
            assert!(backend.detect(&image)?.is_empty());
        }
        assert_eq!(backend.frames_seen(), 3);
        Ok(())
    }
}
