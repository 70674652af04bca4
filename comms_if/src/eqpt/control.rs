//! # Vehicle Control Communications Module
//!
//! Commands published to the vehicle actuation bridge and mirrored to the pilot process.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A steering and throttle demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMsg {
    /// Steering demand in [-1, 1], negative is left
    pub steering: f64,

    /// Throttle demand in [-1, 1], negative is reverse
    pub throttle: f64,

    /// `false` for the safe/neutral command, `true` when the demand is actively controlled
    pub valid: bool,

    /// Raised while the follow executable has lost its transport to the perception service
    #[serde(default)]
    pub degraded: bool,

    /// Name of the follow controller mode which produced the command
    #[serde(default)]
    pub mode: String,

    /// UTC time at which the command was produced
    #[serde(with = "ts_milliseconds")]
    pub time: DateTime<Utc>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlMsg {
    /// The neutral command: no steering, no throttle, not valid.
    pub fn safe(time: DateTime<Utc>) -> Self {
        Self {
            steering: 0.0,
            throttle: 0.0,
            valid: false,
            degraded: false,
            mode: String::from("Safe"),
            time,
        }
    }

    /// Returns true if this is a neutral command.
    pub fn is_safe(&self) -> bool {
        !self.valid && self.steering == 0.0 && self.throttle == 0.0
    }
}
