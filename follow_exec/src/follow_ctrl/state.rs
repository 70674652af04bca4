//! Implementations for the FollowCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, trace, warn};
use serde::Serialize;

// Internal
use super::{
    estimate_range, is_selectable, lateral_error, select_target, FollowCtrlError,
    FollowCtrlParams, PidController,
};
use crate::tracker::{Track, TrackId};
use util::{maths::clamp, module::State};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Upper bound on the number of state transitions evaluated in one cycle.
const MAX_TRANSITIONS_PER_CYCLE: usize = 8;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Follow control module state
#[derive(Debug, Clone)]
pub struct FollowCtrl {
    pub(crate) params: FollowCtrlParams,

    /// Whether following has been enabled by the operator
    enabled: bool,

    mode: FollowMode,

    /// Target being tracked, only set while TRACKING
    target: Option<TrackId>,

    /// Candidate being acquired and the number of consecutive cycles it has been selected
    acquire_target: Option<TrackId>,
    acquire_count: u32,

    /// Time spent in the LOST state
    lost_elapsed_s: f64,

    lat_ctrl: PidController,
    lon_ctrl: PidController,

    /// Throttle output of the previous cycle, for ramp limiting
    prev_throttle: f64,

    /// Proximity stop state
    prox_stop: bool,
    clear_count: u32,

    report: StatusReport,
}

/// Input data to follow control.
#[derive(Debug, Clone, Default)]
pub struct InputData {
    /// Live tracks in ascending ID order
    pub tracks: Vec<Track>,

    /// Time since the previous cycle.
    ///
    /// Units: seconds
    pub dt: f64,
}

/// A steering and throttle demand produced by follow control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlCommand {
    /// Normalised steering demand, negative is left
    pub steering: f64,

    /// Normalised throttle demand, negative is reverse
    pub throttle: f64,

    /// False for the neutral command
    pub valid: bool,

    /// Controller mode which produced the command
    pub mode: FollowMode,
}

/// Status report for FollowCtrl processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub mode: FollowMode,
    pub enabled: bool,
    pub target_id: Option<u64>,
    pub num_selectable: usize,
    pub lat_error: f64,
    pub lon_error: f64,
    pub range_m: f64,
    pub steering_saturated: bool,
    pub throttle_saturated: bool,
    pub throttle_ramp_limited: bool,
    pub prox_stop: bool,
    pub num_transitions: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// State of the follow controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FollowMode {
    /// No candidates, waiting
    Idle,

    /// Candidates present, waiting for a target to be selected consistently
    Acquiring,

    /// Following a target
    Tracking,

    /// The target was lost, waiting for it or another to become selectable
    Lost,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FollowCtrl {
    /// Create a new controller with the given parameters.
    pub fn new(params: FollowCtrlParams) -> Self {
        let (lat_ctrl, lon_ctrl) = build_controllers(&params);

        Self {
            enabled: params.enabled_on_start,
            mode: FollowMode::Idle,
            target: None,
            acquire_target: None,
            acquire_count: 0,
            lost_elapsed_s: 0.0,
            lat_ctrl,
            lon_ctrl,
            prev_throttle: 0.0,
            prox_stop: false,
            clear_count: 0,
            report: StatusReport::default(),
            params,
        }
    }

    /// Replace the parameters and reset the controller to IDLE, keeping the enabled state.
    pub fn reconfigure(&mut self, params: FollowCtrlParams) {
        let enabled = self.enabled;
        *self = Self::new(params);
        self.enabled = enabled;
    }

    /// Enable or disable following.
    ///
    /// While disabled the controller is held in IDLE and produces the neutral command.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled != self.enabled {
            info!("Following {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> FollowMode {
        self.mode
    }

    /// Bring the controller to IDLE immediately, without waiting for the next cycle.
    pub fn make_safe(&mut self) {
        if self.mode != FollowMode::Idle {
            self.transition(FollowMode::Idle);
        }
        self.prev_throttle = 0.0;
        self.report = StatusReport {
            mode: self.mode,
            enabled: self.enabled,
            prox_stop: self.prox_stop,
            ..Default::default()
        };
    }

    /// Report of the last cycle.
    pub fn status_report(&self) -> StatusReport {
        self.report
    }

    /// Track currently being followed.
    pub fn target(&self) -> Option<TrackId> {
        self.target
    }

    /// Run one cycle of the controller.
    pub fn step(
        &mut self,
        tracks: &[Track],
        dt: f64
    ) -> Result<(ControlCommand, StatusReport), FollowCtrlError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(FollowCtrlError::InvalidDt(dt))
        }

        self.report = StatusReport::default();

        self.update_proximity(tracks);

        if self.mode == FollowMode::Lost {
            self.lost_elapsed_s += dt;
        }

        let selection = select_target(tracks, &self.params);

        if !self.enabled {
            if self.mode != FollowMode::Idle {
                self.transition(FollowMode::Idle);
            }
        }
        else {
            self.evaluate_transitions(tracks, selection);
        }

        // ---- OUTPUT ----

        let target_track = match (self.mode, self.target) {
            (FollowMode::Tracking, Some(id)) => tracks.iter().find(|t| t.id == id),
            _ => None
        };

        let cmd = match target_track {
            Some(t) => self.control(t, dt),
            None => self.neutral()
        };

        self.report.mode = self.mode;
        self.report.enabled = self.enabled;
        self.report.target_id = self.target.map(|t| t.0);
        self.report.num_selectable = tracks
            .iter()
            .filter(|t| is_selectable(t, self.params.max_coast_cycles))
            .count();
        self.report.prox_stop = self.prox_stop;

        trace!(
            "FollowCtrl {:?}: steering {:+.3}, throttle {:+.3}",
            cmd.mode, cmd.steering, cmd.throttle
        );

        Ok((cmd, self.report))
    }

    /// Evaluate transitions until the state is stable.
    fn evaluate_transitions(&mut self, tracks: &[Track], selection: Option<TrackId>) {
        let has_candidates = !tracks.is_empty();
        let mut acquire_counted = false;

        for _ in 0..MAX_TRANSITIONS_PER_CYCLE {
            let next = match self.mode {
                FollowMode::Idle => match has_candidates {
                    true => Some(FollowMode::Acquiring),
                    false => None
                },

                FollowMode::Acquiring => {
                    if !has_candidates {
                        Some(FollowMode::Idle)
                    }
                    else {
                        // Only count one selection per cycle
                        if !acquire_counted {
                            acquire_counted = true;
                            match selection {
                                Some(id) if self.acquire_target == Some(id) =>
                                    self.acquire_count += 1,
                                Some(id) => {
                                    self.acquire_target = Some(id);
                                    self.acquire_count = 1;
                                },
                                None => {
                                    self.acquire_target = None;
                                    self.acquire_count = 0;
                                }
                            }
                        }

                        match self.acquire_target {
                            Some(id) if self.acquire_count >= self.params.min_acquire_cycles => {
                                self.target = Some(id);
                                Some(FollowMode::Tracking)
                            },
                            _ => None
                        }
                    }
                },

                FollowMode::Tracking => {
                    let target_ok = self.target
                        .and_then(|id| tracks.iter().find(|t| t.id == id))
                        .map(|t| is_selectable(t, self.params.max_coast_cycles))
                        .unwrap_or(false);

                    match target_ok {
                        true => None,
                        false => Some(FollowMode::Lost)
                    }
                },

                FollowMode::Lost => {
                    if let Some(id) = selection {
                        self.target = Some(id);
                        Some(FollowMode::Tracking)
                    }
                    else if self.lost_elapsed_s >= self.params.grace_period_s {
                        Some(FollowMode::Idle)
                    }
                    else {
                        None
                    }
                }
            };

            match next {
                Some(n) => {
                    self.transition(n);

                    // LOST always lasts at least one cycle so the neutral command goes out
                    if n == FollowMode::Lost {
                        break
                    }
                },
                None => break
            }
        }
    }

    /// Move into the given mode.
    fn transition(&mut self, next: FollowMode) {
        info!("FollowCtrl: {:?} -> {:?}", self.mode, next);

        // Accumulators never carry over from one tracking period to the next
        if self.mode == FollowMode::Tracking {
            self.lat_ctrl.reset();
            self.lon_ctrl.reset();
        }

        match next {
            FollowMode::Idle => {
                self.target = None;
                self.acquire_target = None;
                self.acquire_count = 0;
            },
            FollowMode::Acquiring => {
                self.target = None;
                self.acquire_target = None;
                self.acquire_count = 0;
            },
            FollowMode::Tracking => {
                if let Some(id) = self.target {
                    info!("Tracking target {}", id);
                }
            },
            FollowMode::Lost => {
                warn!("Target {:?} lost", self.target);
                self.target = None;
                self.lost_elapsed_s = 0.0;
            }
        }

        self.mode = next;
        self.report.num_transitions += 1;
    }

    /// Compute the demand to follow the given track.
    fn control(&mut self, track: &Track, dt: f64) -> ControlCommand {
        let lat_error = lateral_error(track, &self.params);
        let range_m = estimate_range(track, &self.params);
        let lon_error = range_m - self.params.desired_range_m;

        let steering = self.lat_ctrl.get(lat_error, dt);
        let mut throttle = self.lon_ctrl.get(lon_error, dt);

        // Limit increases in throttle, decreases go straight through
        if throttle > self.prev_throttle + self.params.throttle_ramp_step {
            throttle = self.prev_throttle + self.params.throttle_ramp_step;
            self.report.throttle_ramp_limited = true;
        }

        if self.prox_stop {
            throttle = 0.0;
        }

        let steering = clamp(&steering, &self.params.steering_min, &self.params.steering_max);
        let throttle = clamp(&throttle, &self.params.throttle_min, &self.params.throttle_max);

        self.prev_throttle = throttle;

        self.report.lat_error = lat_error;
        self.report.lon_error = lon_error;
        self.report.range_m = range_m;
        self.report.steering_saturated = self.lat_ctrl.is_saturated();
        self.report.throttle_saturated = self.lon_ctrl.is_saturated();

        ControlCommand {
            steering,
            throttle,
            valid: true,
            mode: self.mode,
        }
    }

    /// Produce the neutral command for the current mode.
    fn neutral(&mut self) -> ControlCommand {
        self.prev_throttle = 0.0;
        ControlCommand::neutral(self.mode)
    }

    /// Update the proximity stop from the box heights of the confirmed tracks.
    fn update_proximity(&mut self, tracks: &[Track]) {
        let too_close = tracks.iter().any(|t| {
            t.is_confirmed()
                && t.box_height().map(|h| h >= self.params.unsafe_box_height_px).unwrap_or(false)
        });

        if too_close {
            if !self.prox_stop {
                warn!("Object too close, throttle held at zero");
            }
            self.prox_stop = true;
            self.clear_count = 0;
        }
        else if self.prox_stop {
            self.clear_count += 1;
            if self.clear_count >= self.params.min_clear_cycles {
                info!("Proximity clear for {} cycles, throttle released", self.clear_count);
                self.prox_stop = false;
                self.clear_count = 0;
            }
        }
    }
}

impl Default for FollowCtrl {
    fn default() -> Self {
        Self::new(FollowCtrlParams::default())
    }
}

impl State for FollowCtrl {
    type InitData = FollowCtrlParams;
    type InitError = FollowCtrlError;

    type InputData = InputData;
    type OutputData = ControlCommand;
    type StatusReport = StatusReport;
    type ProcError = FollowCtrlError;

    /// Initialise FollowCtrl, the enabled state is taken from the parameters.
    fn init(&mut self, init_data: Self::InitData) -> Result<(), Self::InitError> {
        init_data.validate().map_err(FollowCtrlError::InvalidParams)?;
        *self = Self::new(init_data);
        Ok(())
    }

    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        self.step(&input_data.tracks, input_data.dt)
    }
}

impl ControlCommand {
    /// The neutral command: zero steering, zero throttle, not valid.
    pub fn neutral(mode: FollowMode) -> Self {
        Self {
            steering: 0.0,
            throttle: 0.0,
            valid: false,
            mode,
        }
    }

    pub fn is_neutral(&self) -> bool {
        !self.valid && self.steering == 0.0 && self.throttle == 0.0
    }
}

impl Default for ControlCommand {
    fn default() -> Self {
        Self::neutral(FollowMode::Idle)
    }
}

impl Default for FollowMode {
    fn default() -> Self {
        FollowMode::Idle
    }
}

impl FollowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowMode::Idle => "Idle",
            FollowMode::Acquiring => "Acquiring",
            FollowMode::Tracking => "Tracking",
            FollowMode::Lost => "Lost",
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn build_controllers(params: &FollowCtrlParams) -> (PidController, PidController) {
    (
        PidController::new(
            params.lat_k_p, params.lat_k_i, params.lat_k_d,
            params.steering_min, params.steering_max
        ),
        PidController::new(
            params.lon_k_p, params.lon_k_i, params.lon_k_d,
            params.throttle_min, params.throttle_max
        )
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tracker::{Detection, TrackStatus};
    use chrono::{TimeZone, Utc};

    const DT: f64 = 0.1;

    fn track(id: u64, x: f64, h: Option<f64>, status: TrackStatus) -> Track {
        let size = h.map(|h| (h * 0.5, h));
        let d = Detection::new(x, 400.0, size, 0.9, 0, Utc.timestamp_millis(0)).unwrap();
        let mut t = Track::spawn(TrackId(id), &d);
        t.status = status;
        t
    }

    fn confirmed(id: u64, x: f64) -> Track {
        track(id, x, Some(100.0), TrackStatus::Confirmed)
    }

    #[test]
    fn test_idle_to_tracking_in_one_cycle() {
        let mut ctrl = FollowCtrl::default();

        let (cmd, _) = ctrl.step(&[], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Idle);
        assert!(cmd.is_neutral());

        let (cmd, rpt) = ctrl.step(&[confirmed(0, 900.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Tracking);
        assert_eq!(rpt.num_transitions, 2);
        assert_eq!(ctrl.target(), Some(TrackId(0)));
        assert!(cmd.valid);
        assert!(cmd.steering > 0.0);
        assert!(cmd.throttle > 0.0);
    }

    #[test]
    fn test_acquiring_waits_for_consistent_target() {
        let mut ctrl = FollowCtrl::new(FollowCtrlParams {
            min_acquire_cycles: 3,
            ..Default::default()
        });

        // Tentative tracks are candidates but can't be selected
        ctrl.step(&[track(0, 600.0, None, TrackStatus::Tentative)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Acquiring);

        for _ in 0..2 {
            let (cmd, _) = ctrl.step(&[confirmed(0, 600.0)], DT).unwrap();
            assert_eq!(ctrl.mode(), FollowMode::Acquiring);
            assert!(cmd.is_neutral());
        }
        ctrl.step(&[confirmed(0, 600.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Tracking);

        // Candidates disappear while acquiring
        let mut ctrl = FollowCtrl::new(FollowCtrlParams {
            min_acquire_cycles: 3,
            ..Default::default()
        });
        ctrl.step(&[confirmed(0, 600.0)], DT).unwrap();
        ctrl.step(&[], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Idle);
    }

    #[test]
    fn test_lost_and_recovered() {
        let mut ctrl = FollowCtrl::default();
        ctrl.step(&[confirmed(0, 640.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Tracking);

        // Target coasting too long, a different track doesn't keep tracking going
        let mut stale = confirmed(0, 640.0);
        stale.time_since_update = 4;
        let (cmd, _) = ctrl.step(&[stale, confirmed(1, 700.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Lost);
        assert!(cmd.is_neutral());

        // Within the grace period the new target is picked up
        let (cmd, _) = ctrl.step(&[confirmed(1, 700.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Tracking);
        assert_eq!(ctrl.target(), Some(TrackId(1)));
        assert!(cmd.valid);
    }

    #[test]
    fn test_lost_to_idle_after_grace() {
        let mut ctrl = FollowCtrl::new(FollowCtrlParams {
            grace_period_s: 0.5,
            ..Default::default()
        });
        ctrl.step(&[confirmed(0, 640.0)], DT).unwrap();
        ctrl.step(&[], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Lost);

        let mut cycles = 0;
        while ctrl.mode() == FollowMode::Lost {
            let (cmd, _) = ctrl.step(&[], DT).unwrap();
            assert!(cmd.is_neutral());
            cycles += 1;
            assert!(cycles < 10);
        }
        assert_eq!(ctrl.mode(), FollowMode::Idle);
        assert!(cycles >= 5);
    }

    #[test]
    fn test_disable_forces_idle() {
        let mut ctrl = FollowCtrl::default();
        ctrl.step(&[confirmed(0, 640.0)], DT).unwrap();

        ctrl.set_enabled(false);
        let (cmd, _) = ctrl.step(&[confirmed(0, 640.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Idle);
        assert!(cmd.is_neutral());

        ctrl.set_enabled(true);
        ctrl.step(&[confirmed(0, 640.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Tracking);
    }

    #[test]
    fn test_throttle_ramp() {
        let mut ctrl = FollowCtrl::default();

        // Far away target (small box), throttle climbs one step per cycle
        let far = confirmed(0, 640.0);
        let mut far = far;
        far.size = Some(nalgebra::Vector2::new(10.0, 20.0));

        let mut prev = 0.0;
        for _ in 0..5 {
            let (cmd, rpt) = ctrl.step(&[far.clone()], DT).unwrap();
            assert!(rpt.throttle_ramp_limited);
            assert!((cmd.throttle - prev - 0.05).abs() < 1e-9);
            prev = cmd.throttle;
        }

        // Too close, the throttle drops immediately
        let mut near = far.clone();
        near.size = Some(nalgebra::Vector2::new(100.0, 250.0));
        let (cmd, _) = ctrl.step(&[near], DT).unwrap();
        assert_eq!(cmd.throttle, 0.0);
    }

    #[test]
    fn test_proximity_stop() {
        let mut ctrl = FollowCtrl::default();
        let big = track(0, 640.0, Some(400.0), TrackStatus::Confirmed);
        let mut far = big.clone();
        far.size = Some(nalgebra::Vector2::new(10.0, 20.0));

        let (cmd, rpt) = ctrl.step(&[big], DT).unwrap();
        assert!(rpt.prox_stop);
        assert!(cmd.valid);
        assert_eq!(cmd.throttle, 0.0);

        // Held for two clear cycles, released on the third
        for _ in 0..2 {
            let (cmd, rpt) = ctrl.step(&[far.clone()], DT).unwrap();
            assert!(rpt.prox_stop);
            assert_eq!(cmd.throttle, 0.0);
        }
        let (cmd, rpt) = ctrl.step(&[far], DT).unwrap();
        assert!(!rpt.prox_stop);
        assert!(cmd.throttle > 0.0);
    }

    #[test]
    fn test_outputs_within_bounds() {
        let params = FollowCtrlParams {
            lat_k_p: 50.0,
            lon_k_p: 50.0,
            lon_k_i: 10.0,
            throttle_min: -0.3,
            throttle_max: 0.4,
            steering_min: -0.8,
            steering_max: 0.9,
            ..Default::default()
        };
        let mut ctrl = FollowCtrl::new(params);

        for (i, x) in [-1e6, 0.0, 640.0, 1280.0, 1e6, 3.0].iter().cycle().take(60).enumerate() {
            let h = if i % 2 == 0 { Some(1.0) } else { Some(300.0) };
            let t = track(0, *x, h, TrackStatus::Confirmed);
            let (cmd, _) = ctrl.step(&[t], DT).unwrap();
            assert!((-0.8..=0.9).contains(&cmd.steering));
            assert!((-0.3..=0.4).contains(&cmd.throttle));
        }
    }

    #[test]
    fn test_make_safe() {
        let mut ctrl = FollowCtrl::default();
        ctrl.step(&[confirmed(0, 640.0)], DT).unwrap();
        assert_eq!(ctrl.mode(), FollowMode::Tracking);

        ctrl.make_safe();
        assert_eq!(ctrl.mode(), FollowMode::Idle);
        assert_eq!(ctrl.target(), None);
        assert_eq!(ctrl.status_report().mode, FollowMode::Idle);
        assert!(ctrl.is_enabled());
    }

    #[test]
    fn test_invalid_dt() {
        let mut ctrl = FollowCtrl::default();
        assert!(matches!(ctrl.step(&[], f64::NAN), Err(FollowCtrlError::InvalidDt(_))));
    }
}
