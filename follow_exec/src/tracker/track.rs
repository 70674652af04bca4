//! Track data and per-track motion

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::Serialize;

use super::Detection;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Unique identifier of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackId(pub u64);

/// An object followed across frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: TrackId,

    /// Estimated centre position.
    ///
    /// Units: pixels
    pub position: Vector2<f64>,

    /// Estimated velocity.
    ///
    /// Units: pixels/second
    pub velocity: Vector2<f64>,

    /// Last known width and height.
    ///
    /// Units: pixels
    pub size: Option<Vector2<f64>>,

    /// Confidence of the last associated detection
    pub confidence: f64,

    /// Number of frames since the track was spawned, including the spawning frame
    pub age: u32,

    /// Number of frames in which a detection was associated with the track
    pub hits: u32,

    /// Number of frames since a detection was last associated
    pub time_since_update: u32,

    pub status: TrackStatus,

    /// Position at the last association
    #[serde(skip)]
    last_measured: Vector2<f64>,

    /// Time elapsed since the last association
    #[serde(skip)]
    time_since_measured_s: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Lifecycle status of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackStatus {
    /// Seen too few times to be trusted
    Tentative,

    /// Seen enough times to be followed
    Confirmed,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Track {
    /// Spawn a new tentative track from an unassociated detection.
    pub fn spawn(id: TrackId, det: &Detection) -> Self {
        Self {
            id,
            position: det.position(),
            velocity: Vector2::zeros(),
            size: det.size(),
            confidence: det.confidence(),
            age: 1,
            hits: 1,
            time_since_update: 0,
            status: TrackStatus::Tentative,
            last_measured: det.position(),
            time_since_measured_s: 0.0,
        }
    }

    /// Propagate the track forward by `dt` seconds at constant velocity.
    pub fn predict(&mut self, dt: f64) {
        self.position += self.velocity * dt;
        self.time_since_measured_s += dt;
        self.age = self.age.saturating_add(1);
    }

    /// Update the track with an associated detection.
    ///
    /// The newly measured velocity is blended with the previous estimate using the `smoothing`
    /// weight. Returns true if this update confirmed the track.
    pub fn update(&mut self, det: &Detection, smoothing: f64, confirm_hits: u32) -> bool {
        let measured = det.position();

        if self.time_since_measured_s > 0.0 {
            let vel_meas = (measured - self.last_measured) / self.time_since_measured_s;
            self.velocity = vel_meas * smoothing + self.velocity * (1.0 - smoothing);
        }

        self.position = measured;
        self.last_measured = measured;
        self.time_since_measured_s = 0.0;

        if let Some(s) = det.size() {
            self.size = Some(s);
        }
        self.confidence = det.confidence();

        self.hits = self.hits.saturating_add(1);
        self.time_since_update = 0;

        if self.status == TrackStatus::Tentative && self.hits > confirm_hits {
            self.status = TrackStatus::Confirmed;
            true
        }
        else {
            false
        }
    }

    /// Record that no detection was associated this frame.
    pub fn mark_missed(&mut self) {
        self.time_since_update = self.time_since_update.saturating_add(1);
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TrackStatus::Confirmed
    }

    /// Area of the last known box, zero if the size is unknown.
    pub fn box_area(&self) -> f64 {
        self.size.map(|s| s.x * s.y).unwrap_or(0.0)
    }

    /// Height of the last known box.
    pub fn box_height(&self) -> Option<f64> {
        self.size.map(|s| s.y)
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}
