//! Model gate: prepares the face detector before the camera starts.
//!
//! Failure is fail-open. The surface still opens and streams, but with no
//! detector the loop never reports a face, so capture stays disabled.

use crate::detector::DetectorLoader;
use std::time::Instant;

/// How detector preparation settled.
pub enum GateOutcome<D> {
    Ready(D),
    Failed(String),
}

impl<D> GateOutcome<D> {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateOutcome::Ready(_))
    }

    pub fn into_detector(self) -> Option<D> {
        match self {
            GateOutcome::Ready(detector) => Some(detector),
            GateOutcome::Failed(_) => None,
        }
    }
}

/// Load the detector once for this activation. Never fails.
pub async fn prepare<L: DetectorLoader>(loader: &L) -> GateOutcome<L::Detector> {
    let started = Instant::now();
    match loader.load().await {
        Ok(detector) => {
            tracing::info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "face detector ready"
            );
            GateOutcome::Ready(detector)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "face detector unavailable; continuing without face detection"
            );
            GateOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DetectorScript, ScriptedLoader};

    #[tokio::test]
    async fn test_prepare_ready() {
        let loader = ScriptedLoader::new(DetectorScript::default());
        let outcome = prepare(&loader).await;
        assert!(outcome.is_ready());
        assert!(outcome.into_detector().is_some());
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_fail_open() {
        let loader = ScriptedLoader::failing(DetectorScript::default());
        let outcome = prepare(&loader).await;
        match &outcome {
            GateOutcome::Failed(reason) => assert!(reason.contains("not found")),
            GateOutcome::Ready(_) => panic!("expected failure"),
        }
        assert!(outcome.into_detector().is_none());
    }
}
