use crate::error::{Result, StreamError};
use crate::vision::{BoundingBox, Region};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Model input is a square patch of this size.
pub const INPUT_SIZE: u32 = 224;

/// Scores strictly above this are ripe; exactly 0.5 is unripe.
pub const RIPE_THRESHOLD: f32 = 0.5;

/// Preprocessed model input: NHWC `[1, 224, 224, 3]` in BGR order, values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub data: Vec<f32>,
}

impl ModelInput {
    pub const SHAPE: [usize; 4] = [1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3];
}

/// Anything that turns a preprocessed patch into a ripeness score in `[0, 1]`.
pub trait RipenessModel {
    fn predict(&mut self, input: &ModelInput) -> Result<f32>;
}

/// Pretrained binary classifier exported to ONNX.
pub struct OnnxRipenessModel {
    session: Session,
}

impl OnnxRipenessModel {
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();
        let load_error = |reason: String| StreamError::ModelLoadFailure {
            path: path.to_path_buf(),
            reason,
        };

        if !path.exists() {
            return Err(load_error("file does not exist".to_string()));
        }

        let builder = Session::builder().map_err(|e| load_error(e.to_string()))?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| load_error(e.to_string()))?;

        info!("Loaded ripeness model from {}", path.display());
        Ok(Self { session })
    }
}

impl RipenessModel for OnnxRipenessModel {
    fn predict(&mut self, input: &ModelInput) -> Result<f32> {
        let tensor = Tensor::from_array((ModelInput::SHAPE, input.data.clone().into_boxed_slice()))
            .map_err(|e| StreamError::InferenceFailure(format!("failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| StreamError::InferenceFailure(e.to_string()))?;

        let first = outputs
            .iter()
            .next()
            .ok_or_else(|| StreamError::InferenceFailure("model produced no outputs".to_string()))?
            .1;

        let (_shape, data) = first
            .try_extract_tensor::<f32>()
            .map_err(|e| StreamError::InferenceFailure(format!("failed to extract output tensor: {}", e)))?;

        let score = data.first().copied();
        score.ok_or_else(|| StreamError::InferenceFailure("empty output tensor".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ripeness {
    Ripe,
    Unripe,
}

impl Ripeness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ripeness::Ripe => "ripe",
            Ripeness::Unripe => "unripe",
        }
    }

    /// Capitalized form used on the annotated image.
    pub fn title(&self) -> &'static str {
        match self {
            Ripeness::Ripe => "Ripe",
            Ripeness::Unripe => "Unripe",
        }
    }
}

impl fmt::Display for Ripeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: Ripeness,
    /// Confidence in `label`, always in `[0.5, 1.0]`
    pub confidence: f32,
    pub position: BoundingBox,
}

/// Turn a raw model score into a label and the confidence in that label.
pub fn decide(score: f32) -> (Ripeness, f32) {
    if score > RIPE_THRESHOLD {
        (Ripeness::Ripe, score)
    } else {
        (Ripeness::Unripe, 1.0 - score)
    }
}

/// Crop `bbox` out of `frame` (clipped to the frame), resize to
/// [`INPUT_SIZE`]², reorder to BGR and scale to `[0, 1]`.
pub fn preprocess(frame: &RgbImage, bbox: &BoundingBox) -> Result<ModelInput> {
    let (width, height) = frame.dimensions();

    let x0 = bbox.x.clamp(0, width as i32) as u32;
    let y0 = bbox.y.clamp(0, height as i32) as u32;
    let x1 = bbox.x.saturating_add(bbox.width).clamp(0, width as i32) as u32;
    let y1 = bbox.y.saturating_add(bbox.height).clamp(0, height as i32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return Err(StreamError::InvalidFrame(format!(
            "region {:?} lies outside the {}x{} frame",
            bbox, width, height
        )));
    }

    let roi = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    let resized = imageops::resize(&roi, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    // The classifier was trained on BGR patches
    let data = resized
        .pixels()
        .flat_map(|px| [px[2], px[1], px[0]])
        .map(|v| v as f32 / 255.0)
        .collect();

    Ok(ModelInput { data })
}

/// Runs the ripeness model over every detected region of a frame.
pub struct RipenessClassifier<M> {
    model: M,
}

impl<M: RipenessModel> RipenessClassifier<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Raw model score for one region, before thresholding.
    pub fn classify(&mut self, frame: &RgbImage, region: &Region) -> Result<f32> {
        let input = preprocess(frame, &region.bbox)?;
        let score = self.model.predict(&input)?;
        debug!("Region {:?} scored {:.3}", region.bbox, score);
        Ok(score)
    }

    /// Classify every region, keeping detection order.
    pub fn classify_all(&mut self, frame: &RgbImage, regions: &[Region]) -> Result<Vec<ClassificationResult>> {
        regions
            .iter()
            .map(|region| {
                let (label, confidence) = decide(self.classify(frame, region)?);
                Ok(ClassificationResult {
                    label,
                    confidence,
                    position: region.bbox,
                })
            })
            .collect()
    }
}
