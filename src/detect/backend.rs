use anyhow::Result;
use image::RgbImage;

use super::result::Detection;

/// Object detector backend.
///
/// The detector is an external capability: given an image it returns every
/// object it found with class, confidence and pixel-space box. Implementations
/// return an empty vector when nothing is found and an `Err` when inference
/// failed; they never return partial results.
///
/// Detection may be slow (seconds on CPU). The pipeline calls it from a single
/// processing thread, so `&mut self` is never contended.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an RGB frame.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
