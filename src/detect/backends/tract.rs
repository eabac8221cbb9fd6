#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// YOLOv8 detector running an ONNX export on CPU through tract.
///
/// The model is expected to take `[1, 3, S, S]` RGB input scaled to 0..1 and
/// to produce `[1, 4 + classes, anchors]` with `cx, cy, w, h` followed by
/// per-class scores. Frames are stretched to the model input and boxes are
/// mapped back with independent x/y ratios. Overlapping boxes are suppressed
/// regardless of class.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let side = self.input_size;
        let resized = imageops::resize(image, side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let (channels, anchors) = (shape[1], shape[2]);
        let sx = width as f32 / self.input_size as f32;
        let sy = height as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 4..channels {
                let score = preds[[0, c, a]];
                if score > best.1 {
                    best = (c - 4, score);
                }
            }
            if best.1 < self.confidence_threshold {
                continue;
            }
            let bbox = BoundingBox::from_cxcywh(
                preds[[0, 0, a]] * sx,
                preds[[0, 1, a]] * sy,
                preds[[0, 2, a]] * sx,
                preds[[0, 3, a]] * sy,
            );
            let bbox = BoundingBox::new(
                bbox.x1.clamp(0.0, width as f32),
                bbox.y1.clamp(0.0, height as f32),
                bbox.x2.clamp(0.0, width as f32),
                bbox.y2.clamp(0.0, height as f32),
            );
            candidates.push(Detection::new(best.0 as u32, best.1, bbox));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Class-agnostic NMS: keep the most confident box of every overlapping cluster.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept
            .iter()
            .all(|picked| picked.bbox.iou(&det.bbox) <= iou_threshold)
        {
            kept.push(det);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, image.width(), image.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
