//! Detections as used by the tracker

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::perception::{DetectionBatch, DetectionRecord};
use log::debug;
use nalgebra::Vector2;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Largest magnitude accepted for any coordinate or size of a detection.
///
/// Keeps every cost computed from detections and the tracks spawned from them finite.
///
/// Units: pixels
pub const MAX_COORDINATE_PX: f64 = 1.0e6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single validated observation.
///
/// Only constructed through [`Detection::new`] or [`Detection::from_record`], which reject
/// non-finite and out of range values, so every `Detection` reaching the tracker is well formed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    position: Vector2<f64>,
    size: Option<Vector2<f64>>,
    confidence: f64,
    frame_index: u64,
    timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DetectionError {
    #[error("Detection {0} is not finite")]
    NonFinite(&'static str),

    #[error("Detection confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("Detection has a negative size ({0}, {1})")]
    NegativeSize(f64, f64),

    #[error("Detection {0} of {1} is outside +/-{2} px")]
    OutOfRange(&'static str, f64, f64),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Detection {
    /// Create a detection, checking its values against [`MAX_COORDINATE_PX`].
    ///
    /// A size is only kept when both the width and height are present.
    pub fn new(
        x: f64,
        y: f64,
        size: Option<(f64, f64)>,
        confidence: f64,
        frame_index: u64,
        timestamp: DateTime<Utc>
    ) -> Result<Self, DetectionError> {
        Self::with_bound(x, y, size, confidence, frame_index, timestamp, MAX_COORDINATE_PX)
    }

    /// Create a detection whose coordinates and size must lie within `max_px`.
    ///
    /// The bound is itself capped at [`MAX_COORDINATE_PX`].
    pub fn with_bound(
        x: f64,
        y: f64,
        size: Option<(f64, f64)>,
        confidence: f64,
        frame_index: u64,
        timestamp: DateTime<Utc>,
        max_px: f64
    ) -> Result<Self, DetectionError> {
        let max_px = max_px.min(MAX_COORDINATE_PX);
        let check_range = |name: &'static str, v: f64| match v.abs() <= max_px {
            true => Ok(()),
            false => Err(DetectionError::OutOfRange(name, v, max_px))
        };

        if !x.is_finite() {
            return Err(DetectionError::NonFinite("x"))
        }
        if !y.is_finite() {
            return Err(DetectionError::NonFinite("y"))
        }
        if !confidence.is_finite() {
            return Err(DetectionError::NonFinite("confidence"))
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(DetectionError::InvalidConfidence(confidence))
        }
        check_range("x", x)?;
        check_range("y", y)?;

        let size = match size {
            Some((w, h)) => {
                if !(w.is_finite() && h.is_finite()) {
                    return Err(DetectionError::NonFinite("size"))
                }
                if w < 0.0 || h < 0.0 {
                    return Err(DetectionError::NegativeSize(w, h))
                }
                check_range("width", w)?;
                check_range("height", h)?;
                Some(Vector2::new(w, h))
            },
            None => None
        };

        Ok(Self {
            position: Vector2::new(x, y),
            size,
            confidence,
            frame_index,
            timestamp,
        })
    }

    /// Validate a record recieved on the wire.
    pub fn from_record(
        rec: &DetectionRecord,
        frame_index: u64,
        timestamp: DateTime<Utc>,
        max_px: f64
    ) -> Result<Self, DetectionError> {
        let size = match (rec.w, rec.h) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None
        };

        Self::with_bound(rec.x, rec.y, size, rec.confidence, frame_index, timestamp, max_px)
    }

    /// Validate every record in a batch.
    ///
    /// Returns the valid detections in arrival order and the number of records which were
    /// rejected, including those with a coordinate or size beyond `max_px`.
    pub fn from_batch(batch: &DetectionBatch, max_px: f64) -> (Vec<Self>, usize) {
        let mut dets = Vec::with_capacity(batch.detections.len());
        let mut num_rejected = 0;

        for rec in batch.detections.iter() {
            match Self::from_record(rec, batch.frame_index, batch.timestamp, max_px) {
                Ok(d) => dets.push(d),
                Err(e) => {
                    debug!("Rejected detection in frame {}: {}", batch.frame_index, e);
                    num_rejected += 1;
                }
            }
        }

        (dets, num_rejected)
    }

    /// Centre of the detection in pixels.
    pub fn position(&self) -> Vector2<f64> {
        self.position
    }

    /// Width and height of the detection in pixels, if known.
    pub fn size(&self) -> Option<Vector2<f64>> {
        self.size
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_detection_validation() {
        let ts = Utc.timestamp_millis(0);

        assert!(Detection::new(1.0, 2.0, None, 0.5, 0, ts).is_ok());
        assert_eq!(
            Detection::new(f64::NAN, 2.0, None, 0.5, 0, ts),
            Err(DetectionError::NonFinite("x"))
        );
        assert_eq!(
            Detection::new(1.0, f64::INFINITY, None, 0.5, 0, ts),
            Err(DetectionError::NonFinite("y"))
        );
        assert_eq!(
            Detection::new(1.0, 2.0, None, 1.5, 0, ts),
            Err(DetectionError::InvalidConfidence(1.5))
        );
        assert_eq!(
            Detection::new(1.0, 2.0, Some((-1.0, 3.0)), 0.5, 0, ts),
            Err(DetectionError::NegativeSize(-1.0, 3.0))
        );
        assert_eq!(
            Detection::new(1.0, 2.0, Some((1.0, f64::NAN)), 0.5, 0, ts),
            Err(DetectionError::NonFinite("size"))
        );
        assert_eq!(
            Detection::new(1e160, 2.0, None, 0.5, 0, ts),
            Err(DetectionError::OutOfRange("x", 1e160, MAX_COORDINATE_PX))
        );
        assert_eq!(
            Detection::with_bound(10.0, 2.0, Some((5.0, 500.0)), 0.5, 0, ts, 100.0),
            Err(DetectionError::OutOfRange("height", 500.0, 100.0))
        );
        assert!(Detection::with_bound(-100.0, 100.0, None, 0.5, 0, ts, 100.0).is_ok());
    }

    #[test]
    fn test_from_batch_rejects_out_of_range() {
        let batch = DetectionBatch {
            frame_index: 3,
            timestamp: Utc.timestamp_millis(300),
            detections: vec![
                DetectionRecord::point(1e160, 0.0, 0.9),
                DetectionRecord::point(20_000.0, 10.0, 0.9),
                DetectionRecord::point(640.0, 400.0, 0.9),
            ],
        };

        let (dets, rejected) = Detection::from_batch(&batch, 1e4);

        assert_eq!(rejected, 2);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].position(), Vector2::new(640.0, 400.0));
    }

    #[test]
    fn test_from_batch() {
        let batch = DetectionBatch {
            frame_index: 7,
            timestamp: Utc.timestamp_millis(700),
            detections: vec![
                DetectionRecord::point(1.0, 2.0, 0.9),
                DetectionRecord::point(1.0, 2.0, 2.0),
                DetectionRecord {
                    x: 3.0,
                    y: 4.0,
                    w: Some(10.0),
                    h: None,
                    confidence: 0.4,
                },
            ],
        };

        let (dets, rejected) = Detection::from_batch(&batch, 1e4);

        assert_eq!(rejected, 1);
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].frame_index(), 7);
        assert_eq!(dets[1].position(), Vector2::new(3.0, 4.0));
        // Half a size is no size
        assert_eq!(dets[1].size(), None);
    }
}
