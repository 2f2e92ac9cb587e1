use crate::annotate::annotate;
use crate::camera::FrameSource;
use crate::classifier::{ClassificationResult, RipenessClassifier, RipenessModel};
use crate::config::{StreamConfig, IMAGE_NAME};
use crate::error::{Result, StreamError};
use crate::inventory::{InventoryClient, IMAGE_CONTENT_TYPE};
use crate::vision::detect_regions;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Target length of one capture/publish iteration.
pub const FRAME_PERIOD: Duration = Duration::from_secs(10);

/// Time left to sleep in the current period. Elapsed time is truncated to
/// whole seconds and the result never goes below zero.
pub fn sleep_duration(elapsed: Duration) -> Duration {
    Duration::from_secs(FRAME_PERIOD.as_secs().saturating_sub(elapsed.as_secs()))
}

/// The operation argument: `<op>,<x>,<device_id>,<minutes>[,...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub device_id: String,
    pub minutes: u64,
}

impl StreamRequest {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.minutes.saturating_mul(60))
    }
}

impl FromStr for StreamRequest {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(',').collect();

        let device_id = fields
            .get(2)
            .ok_or_else(|| StreamError::ArgumentParseFailure(format!("missing device id in '{}'", s)))?;
        let minutes = fields
            .get(3)
            .ok_or_else(|| StreamError::ArgumentParseFailure(format!("missing duration in '{}'", s)))?;

        let minutes = minutes.trim().parse::<u64>().map_err(|e| {
            StreamError::ArgumentParseFailure(format!("invalid duration '{}': {}", minutes, e))
        })?;

        Ok(Self {
            device_id: device_id.to_string(),
            minutes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Resolving,
    Capturing,
    Analyzing,
    Uploading,
    Sleeping,
    Terminated,
}

/// What one iteration did.
#[derive(Debug, Clone)]
pub struct IterationReport {
    pub binary_id: String,
    pub results: Vec<ClassificationResult>,
    pub uploaded_bytes: usize,
}

/// Capture → analyze → publish loop against one inventory binary.
pub struct StreamLoop<'a, S, M> {
    config: &'a StreamConfig,
    inventory: InventoryClient,
    camera: S,
    classifier: RipenessClassifier<M>,
    state: LoopState,
}

impl<'a, S: FrameSource, M: RipenessModel> StreamLoop<'a, S, M> {
    pub fn new(config: &'a StreamConfig, camera: S, model: M) -> Result<Self> {
        Ok(Self {
            config,
            inventory: InventoryClient::new(config)?,
            camera,
            classifier: RipenessClassifier::new(model),
            state: LoopState::Idle,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    fn transition(&mut self, next: LoopState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run iterations until `duration` has passed. The first failing
    /// iteration ends the run with its error.
    pub async fn run(&mut self, duration: Duration) -> Result<u64> {
        // An unrepresentable deadline means run until killed
        let deadline = Instant::now().checked_add(duration);
        let mut iterations = 0u64;

        info!("Streaming for {}s", duration.as_secs());

        while deadline.map_or(true, |deadline| Instant::now() < deadline) {
            let started = Instant::now();

            if let Err(e) = self.run_iteration().await {
                error!("Iteration {} failed: {}", iterations + 1, e);
                self.transition(LoopState::Terminated);
                return Err(e);
            }
            iterations += 1;

            self.transition(LoopState::Sleeping);
            let pause = sleep_duration(started.elapsed());
            debug!("Sleeping {}s", pause.as_secs());
            tokio::time::sleep(pause).await;
        }

        self.transition(LoopState::Terminated);
        info!("Stream finished after {} iterations", iterations);
        Ok(iterations)
    }

    /// One full pass: resolve the binary id, capture, analyze, write, upload.
    pub async fn run_iteration(&mut self) -> Result<IterationReport> {
        self.transition(LoopState::Resolving);
        let binary_id = self
            .inventory
            .find_binary_id(IMAGE_CONTENT_TYPE, IMAGE_NAME)
            .await?
            .ok_or_else(|| StreamError::NoMatchingRemoteBinary {
                content_type: IMAGE_CONTENT_TYPE.to_string(),
                name: IMAGE_NAME.to_string(),
            })?;
        info!("binary id read: {}", binary_id);

        self.transition(LoopState::Capturing);
        let frame = self.camera.grab()?;

        self.transition(LoopState::Analyzing);
        let image = frame.to_rgb_image()?;
        let regions = detect_regions(&image)?;
        let results = self.classifier.classify_all(&image, &regions)?;
        for result in &results {
            info!(
                "{} ({:.1}%) at {:?}",
                result.label,
                result.confidence * 100.0,
                result.position
            );
        }
        let marked = annotate(&image, &results);

        let path = self.config.image_path();
        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(marked).write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)?;
        fs::write(&path, &encoded)
            .await
            .map_err(|source| StreamError::Io { path: path.clone(), source })?;

        self.transition(LoopState::Uploading);
        let payload = fs::read(&path)
            .await
            .map_err(|source| StreamError::Io { path: path.clone(), source })?;
        let uploaded_bytes = payload.len();
        self.inventory
            .replace_binary(&binary_id, IMAGE_CONTENT_TYPE, payload)
            .await?;

        info!(
            "Uploaded {} bytes to binary {} ({} tomatoes)",
            uploaded_bytes,
            binary_id,
            results.len()
        );

        Ok(IterationReport {
            binary_id,
            results,
            uploaded_bytes,
        })
    }
}
