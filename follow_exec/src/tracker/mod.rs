//! # Tracker module
//!
//! Associates the detections made in each frame with a set of tracks. Each cycle the tracker:
//!
//! 1. drops malformed and low confidence detections,
//! 2. predicts every track forward with its last known velocity,
//! 3. builds the cost matrix between the predicted tracks and the detections,
//! 4. solves the minimum cost assignment and gates the resulting pairs,
//! 5. updates matched tracks, ages unmatched ones, and spawns tracks for unmatched detections,
//! 6. deletes tracks not seen for too long and prunes the set down to its capacity.
//!
//! Track IDs are never reused for the life of the tracker.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod assignment;
mod cost;
mod detection;
mod params;
mod state;
mod track;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use assignment::*;
pub use cost::*;
pub use detection::*;
pub use params::*;
pub use state::*;
pub use track::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during tracker operation.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid time step: {0}")]
    InvalidDt(f64),

    #[error("Invalid tracker parameters: {0}")]
    InvalidParams(crate::params::ParamsError),
}
