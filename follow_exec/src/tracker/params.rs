//! Parameters structure for the tracker

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::params::{check_positive, check_range, ParamsError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {

    // ---- ASSOCIATION ----

    /// Metric used to build the cost matrix.
    pub metric: DistanceMetric,

    /// Largest centre distance for which a track and a detection may be associated, when using
    /// the euclidean metric.
    ///
    /// Units: pixels
    pub gate_euclidean_px: f64,

    /// Largest `1 - IoU` cost for which a track and a detection may be associated, when using the
    /// IoU metric.
    pub gate_iou_cost: f64,

    /// Detections below this confidence are ignored.
    pub min_confidence: f64,

    // ---- LIFECYCLE ----

    /// A track is confirmed once its number of hits exceeds this value.
    pub confirm_hits: u32,

    /// A track is deleted once its frames since last update exceeds this value.
    pub max_age: u32,

    /// Maximum number of live tracks.
    pub max_tracks: usize,

    // ---- MOTION ----

    /// Weight of the newly measured velocity when smoothing a track's velocity, in [0, 1].
    pub velocity_smoothing: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Cost metric between a track and a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Pixel distance between the predicted track centre and the detection centre
    Euclidean,

    /// One minus the intersection over union of the boxes
    Iou,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrackerParams {
    /// Gating threshold of the active metric.
    pub fn gate(&self) -> f64 {
        match self.metric {
            DistanceMetric::Euclidean => self.gate_euclidean_px,
            DistanceMetric::Iou => self.gate_iou_cost,
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        check_positive("tracker.gate_euclidean_px", self.gate_euclidean_px)?;
        check_range("tracker.gate_iou_cost", self.gate_iou_cost, 0.0, 1.0)?;
        check_range("tracker.min_confidence", self.min_confidence, 0.0, 1.0)?;
        check_range("tracker.velocity_smoothing", self.velocity_smoothing, 0.0, 1.0)?;

        if self.max_tracks == 0 {
            return Err(ParamsError::InvalidValue(
                "tracker.max_tracks", "at least one track must be allowed".into()
            ))
        }

        Ok(())
    }
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Euclidean,
            gate_euclidean_px: 60.0,
            gate_iou_cost: 0.7,
            min_confidence: 0.0,
            confirm_hits: 1,
            max_age: 10,
            max_tracks: 32,
            velocity_smoothing: 0.5,
        }
    }
}
