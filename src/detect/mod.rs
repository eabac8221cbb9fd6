mod backend;
pub mod backends;
mod filter;
mod result;

use anyhow::{anyhow, Result};

pub use backend::DetectorBackend;
pub use backends::{ScriptStep, ScriptedBackend, StubBackend};
pub use filter::{filter_detections, Anchor, DetectionFilter};
pub use result::{BoundingBox, ClassId, Detection};

use crate::config::{DetectorKind, DetectorSettings};

/// Build the configured detector backend.
pub fn open_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.kind {
        DetectorKind::Stub => Ok(Box::new(StubBackend::new())),
        DetectorKind::Scripted => {
            let path = settings
                .script_path
                .as_ref()
                .ok_or_else(|| anyhow!("scripted detector requires detector.script_path"))?;
            Ok(Box::new(
                ScriptedBackend::from_path(path)?.looping(settings.loop_script),
            ))
        }
        DetectorKind::Tract => open_tract(settings),
    }
}

#[cfg(feature = "backend-tract")]
fn open_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires detector.model_path"))?;
    let backend = backends::TractBackend::new(path, settings.input_size)?
        .with_threshold(settings.confidence)
        .with_iou(settings.iou);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn open_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("tract detector requires the backend-tract feature"))
}
