//! Face detector contract consumed by the capture engine, and its ONNX adapter.
//!
//! The engine only sees [`FaceDetector`] and [`DetectorLoader`]; the model
//! behind them is an external collaborator.

use faceframe_core::{BoundingBox, DetectorError, ScrfdDetector};
use faceframe_hw::Frame;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Finds the best single face in a frame.
///
/// Called at most once per loop iteration; the next iteration waits for the
/// returned future.
#[allow(async_fn_in_trait)]
pub trait FaceDetector {
    async fn detect(&self, frame: Arc<Frame>) -> Result<Option<BoundingBox>, DetectorError>;
}

/// Prepares a [`FaceDetector`] (model download, session creation, ...).
#[allow(async_fn_in_trait)]
pub trait DetectorLoader {
    type Detector: FaceDetector + 'static;

    async fn load(&self) -> Result<Self::Detector, DetectorError>;
}

/// SCRFD detector with inference moved off the surface thread.
pub struct OnnxFaceDetector {
    inner: Arc<Mutex<ScrfdDetector>>,
}

impl FaceDetector for OnnxFaceDetector {
    async fn detect(&self, frame: Arc<Frame>) -> Result<Option<BoundingBox>, DetectorError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || -> Result<Option<BoundingBox>, DetectorError> {
            let mut detector = inner
                .lock()
                .map_err(|_| DetectorError::InferenceFailed("detector lock poisoned".into()))?;
            let faces = detector.detect(&frame.data, frame.width, frame.height)?;
            Ok(faces.into_iter().next())
        })
        .await
        .map_err(|e| DetectorError::InferenceFailed(format!("detector task failed: {e}")))?
    }
}

/// Loads `det_10g.onnx` from a model directory.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    model_path: PathBuf,
}

impl OnnxLoader {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
        }
    }

    pub fn model_path(&self) -> &std::path::Path {
        &self.model_path
    }
}

impl DetectorLoader for OnnxLoader {
    type Detector = OnnxFaceDetector;

    async fn load(&self) -> Result<OnnxFaceDetector, DetectorError> {
        let path = self.model_path.clone();
        let detector = tokio::task::spawn_blocking(move || ScrfdDetector::load(&path))
            .await
            .map_err(|e| DetectorError::InferenceFailed(format!("model load task failed: {e}")))??;
        Ok(OnnxFaceDetector {
            inner: Arc::new(Mutex::new(detector)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_onnx_loader_missing_model() {
        let loader = OnnxLoader::new("/nonexistent/det_10g.onnx");
        let err = loader.load().await.err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
