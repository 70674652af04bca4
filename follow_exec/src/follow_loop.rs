//! # Follow loop
//!
//! One cycle of the executable, independent of the bus and of wall-clock time: the detections of
//! the cycle go through the tracker, the tracks through follow control, and the resulting demand
//! is turned into the command sent to the vehicle.
//!
//! Driving the loop from recorded inputs replays the same tracks and commands.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::{eqpt::control::ControlMsg, tc::Chatter};
use log::{debug, error, info, warn};
use std::sync::Arc;
use util::module::State;

use crate::{
    data_store::{DataStore, SafeModeCause},
    follow_ctrl::{self, ControlCommand, FollowCtrlError},
    params::FollowExecParams,
    tracker::{self, Detection, Track, TrackEvent, TrackerError},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Runs the cycles of the executable.
pub struct FollowLoop {
    ds: DataStore,

    params: Arc<FollowExecParams>,
}

/// Input to one cycle.
#[derive(Debug, Clone)]
pub struct CycleInput {
    /// Detections of the batch processed this cycle, `None` if no batch arrived
    pub detections: Option<Vec<Detection>>,

    /// Time since the previous cycle.
    ///
    /// Units: seconds
    pub dt: f64,

    /// Whether the transport is degraded
    pub degraded: bool,

    /// Time stamped onto the command
    pub time: DateTime<Utc>,
}

/// Output of one cycle.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    /// Command to publish
    pub msg: ControlMsg,

    /// Track lifecycle events of the cycle
    pub events: Vec<TrackEvent>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FollowLoopError {
    #[error("Tracker error: {0}")]
    TrackerError(TrackerError),

    #[error("FollowCtrl error: {0}")]
    FollowCtrlError(FollowCtrlError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FollowLoop {
    /// Initialise the modules with the given parameters.
    pub fn new(params: Arc<FollowExecParams>) -> Result<Self, FollowLoopError> {
        let mut ds = DataStore::default();

        ds.tracker.init(params.tracker.clone())
            .map_err(FollowLoopError::TrackerError)?;
        info!("Tracker init complete");

        ds.follow_ctrl.init(params.follow_ctrl.clone())
            .map_err(FollowLoopError::FollowCtrlError)?;
        info!("FollowCtrl init complete");

        Ok(Self { ds, params })
    }

    /// Run one cycle.
    pub fn step(&mut self, input: CycleInput) -> Result<CycleOutput, FollowLoopError> {
        let ds = &mut self.ds;

        ds.cycle_start();

        // ---- SAFE MODE ----

        if input.degraded {
            ds.make_safe(SafeModeCause::TransportDegraded);
        }
        else {
            ds.make_unsafe(SafeModeCause::TransportDegraded).ok();
        }

        // ---- TRACKING ----

        // The tracker rejects a bad time step, everything else runs on a sanitised one
        let dt = match input.dt.is_finite() && input.dt >= 0.0 {
            true => input.dt,
            false => 0.0
        };

        ds.since_batch_s += dt;

        let detections = match input.detections {
            Some(d) => {
                ds.since_batch_s = 0.0;
                d
            },
            None => Vec::new()
        };

        // Tracks age on every cycle, batch or not
        let tracker_result = ds.tracker
            .proc(&tracker::InputData { detections, dt: input.dt });

        let tracker_error = match tracker_result {
            Ok((output, rpt)) => {
                ds.tracker_output = output;
                ds.tracker_status_rpt = rpt;
                None
            },
            Err(e) => {
                error!("Tracker update failed, following with no tracks: {}", e);
                ds.tracker_output.tracks = Vec::new();
                ds.tracker_output.events = Vec::new();
                Some(e)
            }
        };

        let stalled = ds.since_batch_s >= self.params.exec.stall_timeout_s;
        if stalled != ds.input_stalled {
            match stalled {
                true => warn!(
                    "No detections for {:.2} s, following with no tracks", ds.since_batch_s
                ),
                false => info!("Detections resumed")
            }
            ds.input_stalled = stalled;
        }

        // ---- FOLLOW CONTROL ----

        let ctrl_input = follow_ctrl::InputData {
            tracks: match stalled || tracker_error.is_some() {
                true => Vec::new(),
                false => ds.tracker.tracks().to_vec()
            },
            dt,
        };

        let cmd = match ds.safe {
            true => {
                ds.follow_ctrl.make_safe();
                ds.follow_ctrl_status_rpt = ds.follow_ctrl.status_report();
                ControlCommand::neutral(ds.follow_ctrl.mode())
            },
            false => {
                let (cmd, rpt) = ds.follow_ctrl.proc(&ctrl_input)
                    .map_err(FollowLoopError::FollowCtrlError)?;
                ds.follow_ctrl_status_rpt = rpt;
                cmd
            }
        };
        ds.follow_ctrl_output = cmd;

        // ---- OUTPUT ----

        let msg = match ds.safe {
            true => ControlMsg {
                degraded: input.degraded,
                ..ControlMsg::safe(input.time)
            },
            false => to_msg(&cmd, input.degraded, input.time)
        };

        debug!(
            "Cycle {}: {} tracks, {:?}, steering {:+.3}, throttle {:+.3}",
            ds.num_cycles, ds.tracker.tracks().len(), cmd.mode, msg.steering, msg.throttle
        );

        ds.control_msg = Some(msg.clone());
        ds.num_cycles += 1;

        if let Some(e) = tracker_error {
            return Err(FollowLoopError::TrackerError(e))
        }

        Ok(CycleOutput {
            msg,
            events: ds.tracker_output.events.clone(),
        })
    }

    /// Act on a chatter request.
    ///
    /// Returns true if the request asks for the configuration to be reloaded, which is left to the
    /// caller.
    pub fn handle_chatter(&mut self, chatter: Chatter) -> bool {
        match chatter {
            Chatter::StartFollowing => {
                self.set_enabled(true);
                false
            },
            Chatter::StopFollowing => {
                self.set_enabled(false);
                false
            },
            Chatter::Restart => true,
            Chatter::Ignored => false
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.ds.follow_ctrl.set_enabled(enabled);
    }

    /// Switch to a new configuration snapshot.
    ///
    /// Tracks are kept, the controller restarts from IDLE with its accumulators cleared.
    pub fn apply_config(&mut self, params: Arc<FollowExecParams>) {
        self.ds.tracker.set_params(params.tracker.clone());
        self.ds.follow_ctrl.reconfigure(params.follow_ctrl.clone());
        self.params = params;
        info!("New configuration applied");
    }

    /// Put the loop into safe mode so only neutral commands are produced.
    pub fn make_safe(&mut self, cause: SafeModeCause) {
        self.ds.make_safe(cause);
    }

    pub fn params(&self) -> &Arc<FollowExecParams> {
        &self.params
    }

    pub fn tracks(&self) -> &[Track] {
        self.ds.tracker.tracks()
    }

    pub fn data_store(&self) -> &DataStore {
        &self.ds
    }

    pub fn data_store_mut(&mut self) -> &mut DataStore {
        &mut self.ds
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the bus message for a controller demand.
pub fn to_msg(cmd: &ControlCommand, degraded: bool, time: DateTime<Utc>) -> ControlMsg {
    ControlMsg {
        steering: cmd.steering,
        throttle: cmd.throttle,
        valid: cmd.valid,
        degraded,
        mode: cmd.mode.as_str().to_string(),
        time,
    }
}
