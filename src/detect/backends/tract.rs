#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::error::InferenceError;
use crate::frame::{BoundingBox, Detection, Frame};

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Expects one output tensor of rows `[cx, cy, w, h, objectness, class scores...]`
/// in model-input pixel space, either as `[1, rows, 5 + classes]` or transposed.
/// Boxes are normalized by the model input size before leaving the backend.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    labels: Vec<String>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model and its label list (one class name per line).
    pub fn new<P: AsRef<Path>>(model_path: P, labels_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels_path = labels_path.as_ref();
        let labels = std::fs::read_to_string(labels_path)
            .with_context(|| format!("failed to read labels from {}", labels_path.display()))?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if labels.is_empty() {
            return Err(anyhow!("label file {} is empty", labels_path.display()));
        }

        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.to_owned_pixels())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(&image, self.width, self.height, FilterType::Triangle);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 {
            return Err(anyhow!("expected a rank-3 output, got shape {:?}", shape));
        }
        let transposed = shape[1] < shape[2];
        let (rows, cols) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if cols < 6 {
            return Err(anyhow!("output rows too short: {} values", cols));
        }
        let at = |row: usize, col: usize| {
            if transposed {
                view[[0, col, row]]
            } else {
                view[[0, row, col]]
            }
        };

        let in_w = self.width as f32;
        let in_h = self.height as f32;
        let class_count = (cols - 5).min(self.labels.len());
        let mut detections = Vec::new();
        for row in 0..rows {
            let best = (0..class_count)
                .map(|class| (class, at(row, 5 + class)))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((class, score)) = best else { continue };
            if !(score > self.confidence_threshold) {
                continue;
            }
            let bbox = BoundingBox::from_center(
                at(row, 0) / in_w,
                at(row, 1) / in_h,
                at(row, 2) / in_w,
                at(row, 3) / in_h,
            )?;
            detections.push(Detection::new(self.labels[class].clone(), score.min(1.0), bbox)?);
        }
        Ok(detections)
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let failed = |e: anyhow::Error| InferenceError::Backend {
            backend: "tract".to_string(),
            reason: format!("{:#}", e),
        };
        let input = self.build_input(frame).map_err(failed)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")
            .map_err(failed)?;
        self.decode(outputs)
            .map_err(|e| InferenceError::InvalidOutput(format!("{:#}", e)))
    }
}
