//! Parameters structure for FollowCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::params::{check_positive, check_range, ParamsError};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for follow control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowCtrlParams {

    // ---- TARGET SELECTION ----

    /// If true the controller starts enabled, otherwise it waits for a start following request.
    pub enabled_on_start: bool,

    /// Criterion used to choose between candidate targets.
    pub priority: TargetPriority,

    /// Number of consecutive cycles the same target must be selected before tracking begins.
    pub min_acquire_cycles: u32,

    /// Confirmed tracks remain selectable while their frames since update is at most this value.
    pub max_coast_cycles: u32,

    /// Time after losing the target during which a new one may be picked up without going
    /// through acquisition again.
    ///
    /// Units: seconds
    pub grace_period_s: f64,

    // ---- GEOMETRY ----

    /// Width of the image the detections are made in.
    ///
    /// Units: pixels
    pub image_width_px: f64,

    /// Horizontal position of the vehicle's forward axis in the image.
    ///
    /// Units: pixels
    pub forward_axis_x_px: f64,

    /// Reference point of the vehicle in the image, used for range and `closest_to_ego`.
    ///
    /// Units: pixels
    pub ego_point_px: [f64; 2],

    // ---- RANGE ----

    /// How the range to the target is estimated.
    pub range_model: RangeModel,

    /// Range of a target is `range_scale / box_height` with the box height model.
    ///
    /// Units: meter pixels
    pub range_scale: f64,

    /// Range of a target is the distance to the ego point times this scale with the ego
    /// distance model.
    ///
    /// Units: meters/pixel
    pub ego_range_scale: f64,

    /// Range to hold the target at.
    ///
    /// Units: meters
    pub desired_range_m: f64,

    // ---- GAINS ----

    pub lat_k_p: f64,
    pub lat_k_i: f64,
    pub lat_k_d: f64,

    pub lon_k_p: f64,
    pub lon_k_i: f64,
    pub lon_k_d: f64,

    // ---- LIMITS ----

    pub steering_min: f64,
    pub steering_max: f64,
    pub throttle_min: f64,
    pub throttle_max: f64,

    /// Largest increase of the throttle in one cycle. Decreases are not limited.
    pub throttle_ramp_step: f64,

    // ---- PROXIMITY STOP ----

    /// A confirmed track with a box at least this tall is too close, throttle is held at zero.
    ///
    /// Units: pixels
    pub unsafe_box_height_px: f64,

    /// Number of consecutive cycles without a too-close track before throttle is released.
    pub min_clear_cycles: u32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Criterion for selecting the target among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    /// Smallest predicted distance to the ego point
    ClosestToEgo,

    /// Highest confidence of the last associated detection
    HighestConfidence,

    /// Largest box area
    LargestBox,
}

/// Model used to estimate the range to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeModel {
    /// Inverse of the box height. Falls back to `EgoDistance` for tracks without a size.
    BoxHeight,

    /// Distance between the target and the ego point
    EgoDistance,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FollowCtrlParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        check_positive("follow_ctrl.image_width_px", self.image_width_px)?;
        check_range(
            "follow_ctrl.forward_axis_x_px", self.forward_axis_x_px, 0.0, self.image_width_px
        )?;
        check_range("follow_ctrl.grace_period_s", self.grace_period_s, 0.0, f64::MAX)?;
        check_positive("follow_ctrl.range_scale", self.range_scale)?;
        check_positive("follow_ctrl.ego_range_scale", self.ego_range_scale)?;
        check_range("follow_ctrl.desired_range_m", self.desired_range_m, 0.0, f64::MAX)?;
        check_positive("follow_ctrl.throttle_ramp_step", self.throttle_ramp_step)?;
        check_positive("follow_ctrl.unsafe_box_height_px", self.unsafe_box_height_px)?;

        for &(name, v) in [
            ("follow_ctrl.ego_point_px", self.ego_point_px[0]),
            ("follow_ctrl.ego_point_px", self.ego_point_px[1]),
            ("follow_ctrl.lat_k_p", self.lat_k_p),
            ("follow_ctrl.lat_k_i", self.lat_k_i),
            ("follow_ctrl.lat_k_d", self.lat_k_d),
            ("follow_ctrl.lon_k_p", self.lon_k_p),
            ("follow_ctrl.lon_k_i", self.lon_k_i),
            ("follow_ctrl.lon_k_d", self.lon_k_d),
        ].iter() {
            if !v.is_finite() {
                return Err(ParamsError::InvalidValue(name, format!("{} is not finite", v)))
            }
        }

        check_range("follow_ctrl.steering_min", self.steering_min, -1.0, 0.0)?;
        check_range("follow_ctrl.steering_max", self.steering_max, 0.0, 1.0)?;
        check_range("follow_ctrl.throttle_min", self.throttle_min, -1.0, 0.0)?;
        check_range("follow_ctrl.throttle_max", self.throttle_max, 0.0, 1.0)?;

        Ok(())
    }
}

impl Default for FollowCtrlParams {
    fn default() -> Self {
        Self {
            enabled_on_start: true,
            priority: TargetPriority::ClosestToEgo,
            min_acquire_cycles: 1,
            max_coast_cycles: 3,
            grace_period_s: 2.0,

            image_width_px: 1280.0,
            forward_axis_x_px: 640.0,
            ego_point_px: [640.0, 720.0],

            range_model: RangeModel::BoxHeight,
            range_scale: 500.0,
            ego_range_scale: 0.01,
            desired_range_m: 3.0,

            lat_k_p: 1.0,
            lat_k_i: 0.0,
            lat_k_d: 0.05,
            lon_k_p: 0.2,
            lon_k_i: 0.01,
            lon_k_d: 0.0,

            steering_min: -1.0,
            steering_max: 1.0,
            throttle_min: 0.0,
            throttle_max: 0.6,
            throttle_ramp_step: 0.05,

            unsafe_box_height_px: 360.0,
            min_clear_cycles: 3,
        }
    }
}
