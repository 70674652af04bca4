//! # Perception Equipment Communications Module
//!
//! Detection batches published by the perception service, one batch per processed frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single detection as it appears on the wire.
///
/// Positions are the centre of the detected object in image pixels. No validation is performed
/// at this level, the consumer is responsible for bounds checking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionRecord {
    /// Horizontal centre position in pixels
    pub x: f64,

    /// Vertical centre position in pixels
    pub y: f64,

    /// Width of the bounding box in pixels, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,

    /// Height of the bounding box in pixels, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,

    /// Detector confidence in the range [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// All detections made in one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionBatch {
    /// Index of the source frame
    pub frame_index: u64,

    /// UTC timestamp at which the frame was acquired
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Detections in the frame, possibly empty
    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DetectionRecord {
    /// Create a record for a point detection without size information.
    pub fn point(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            x,
            y,
            w: None,
            h: None,
            confidence,
        }
    }

    /// Create a record for a bounding box detection.
    pub fn boxed(x: f64, y: f64, w: f64, h: f64, confidence: f64) -> Self {
        Self {
            x,
            y,
            w: Some(w),
            h: Some(h),
            confidence,
        }
    }
}

fn default_confidence() -> f64 {
    1.0
}
