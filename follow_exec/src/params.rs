//! # Executable parameters
//!
//! All parameters are loaded from a single TOML file. Every table and every field within it has a
//! default, so a file only needs to contain the values which differ from those defaults.
//!
//! ```toml
//! [exec]
//! cycle_period_s = 0.1
//!
//! [tracker]
//! metric = "euclidean"
//!
//! [follow_ctrl]
//! priority = "closest_to_ego"
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use comms_if::net::NetParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use util::params::{self, LoadError};

use crate::{follow_ctrl::FollowCtrlParams, gateway::GatewayParams, tracker::TrackerParams};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The complete configuration of the executable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowExecParams {
    pub exec: ExecParams,
    pub tracker: TrackerParams,
    pub follow_ctrl: FollowCtrlParams,
    pub gateway: GatewayParams,
    pub net: NetParams,
}

/// Parameters of the main loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecParams {
    /// Target period of one cycle.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// What starts a cycle.
    pub drive_mode: DriveMode,

    /// Longest a cycle may take before the following cycles are skipped to catch up.
    ///
    /// Units: seconds
    pub watchdog_budget_s: f64,

    /// In frame driven mode, how long to wait for a detection batch before running the cycle
    /// with no detections.
    ///
    /// Units: seconds
    pub inbound_timeout_s: f64,

    /// Time without any detection batch after which the input is considered stalled, and the
    /// controller is given no tracks.
    ///
    /// Units: seconds
    pub stall_timeout_s: f64,

    /// Period at which the configuration file's modification time is polled.
    ///
    /// Units: seconds
    pub reload_poll_s: f64,

    /// Directory in which session directories are created.
    pub session_root: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How the main loop is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Cycles run at a fixed period, using whatever detections arrived in the meantime.
    Timer,

    /// Cycles run on the arrival of each detection batch, or on the inbound timeout.
    Frame,
}

/// Errors in loading or validating parameters.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("Could not load the parameters: {0}")]
    LoadError(LoadError),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FollowExecParams {
    /// Load and validate the parameters from the given file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ParamsError> {
        let p: Self = params::load_path(path).map_err(ParamsError::LoadError)?;
        p.validate()?;
        Ok(p)
    }

    /// Parse and validate the parameters from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ParamsError> {
        let p: Self = params::load_str(s).map_err(ParamsError::LoadError)?;
        p.validate()?;
        Ok(p)
    }

    /// Check that the parameters are usable.
    pub fn validate(&self) -> Result<(), ParamsError> {
        self.exec.validate()?;
        self.tracker.validate()?;
        self.follow_ctrl.validate()?;
        self.gateway.validate()?;

        if self.net.perception_topic.is_empty() || self.net.control_topic.is_empty() {
            return Err(ParamsError::InvalidValue(
                "net topics",
                "perception and control topics must not be empty".into()
            ))
        }

        Ok(())
    }
}

impl ExecParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_positive("exec.cycle_period_s", self.cycle_period_s)?;
        check_positive("exec.watchdog_budget_s", self.watchdog_budget_s)?;
        check_positive("exec.inbound_timeout_s", self.inbound_timeout_s)?;
        check_positive("exec.stall_timeout_s", self.stall_timeout_s)?;
        check_positive("exec.reload_poll_s", self.reload_poll_s)?;

        if self.watchdog_budget_s < self.cycle_period_s {
            return Err(ParamsError::InvalidValue(
                "exec.watchdog_budget_s",
                format!(
                    "budget ({}) must be at least the cycle period ({})",
                    self.watchdog_budget_s, self.cycle_period_s
                )
            ))
        }

        Ok(())
    }
}

impl Default for ExecParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.1,
            drive_mode: DriveMode::Timer,
            watchdog_budget_s: 0.2,
            inbound_timeout_s: 0.1,
            stall_timeout_s: 1.0,
            reload_poll_s: 1.0,
            session_root: PathBuf::from("sessions"),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Check that a value is finite and strictly positive.
pub fn check_positive(name: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamsError::InvalidValue(name, format!("expected a positive value, found {}", value)))
    }
}

/// Check that a value is finite and within the inclusive range.
pub fn check_range(
    name: &'static str,
    value: f64,
    min: f64,
    max: f64
) -> Result<(), ParamsError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ParamsError::InvalidValue(
            name,
            format!("expected a value in [{}, {}], found {}", min, max, value)
        ))
    }
}
