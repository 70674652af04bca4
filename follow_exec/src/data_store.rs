//! # Data Store
//!
//! Everything the control loop carries from one cycle to the next.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use comms_if::eqpt::control::ControlMsg;
use log::{info, warn};
use serde::Serialize;
use util::{
    archive::{ArchiveError, Archived, Archiver},
    session::Session,
};

use crate::{follow_ctrl, gateway, tracker};

// ---------------------------------------------------------------------------
// ENUMS
// ---------------------------------------------------------------------------

/// Gives the reason the executable has been put into safe mode
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize)]
pub enum SafeModeCause {
    /// A link to the bus has been down for too long
    TransportDegraded,

    /// Shutdown has been requested, the final commands must be neutral
    Shutdown,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Global data store for the executable.
#[derive(Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u64,

    /// Session elapsed time at the start of the cycle
    pub elapsed_s: f64,

    // Safe mode variables
    /// Determines if the executable is in safe mode, in which only neutral commands are sent.
    pub safe: bool,

    /// Gives the reason for being in safe mode.
    pub safe_cause: Option<SafeModeCause>,

    // Input monitoring
    /// Time since the last detection batch was processed.
    pub since_batch_s: f64,

    /// Set while no detection batch has been received for longer than the stall timeout.
    pub input_stalled: bool,

    // Tracker
    pub tracker: tracker::Tracker,
    pub tracker_output: tracker::OutputData,
    pub tracker_status_rpt: tracker::StatusReport,

    // FollowCtrl
    pub follow_ctrl: follow_ctrl::FollowCtrl,
    pub follow_ctrl_output: follow_ctrl::ControlCommand,
    pub follow_ctrl_status_rpt: follow_ctrl::StatusReport,

    /// Command sent to the vehicle this cycle
    pub control_msg: Option<ControlMsg>,

    /// Gateway counters, updated once per cycle
    pub gateway_status_rpt: gateway::StatusReport,

    // Monitoring Counters
    /// Number of consecutive cycle overruns
    pub num_consec_cycle_overruns: u64,

    /// Number of cycles skipped to recover from overruns
    pub num_skipped_cycles: u64,

    /// Number of detection batches superseded by a newer one before being processed
    pub num_stale_batches: u64,

    // Archives
    tracker_arch: Archiver,
    follow_ctrl_arch: Archiver,
}

/// Row of the tracker archive.
#[derive(Serialize)]
struct TrackerArchRow {
    time_s: f64,
    cycle: u64,
    num_detections: usize,
    num_low_confidence: usize,
    num_tracks: usize,
    num_confirmed: usize,
    num_matched: usize,
    num_gated: usize,
    num_spawned: usize,
    num_deleted: usize,
    num_pruned: usize,
    num_discarded: usize,
    assignment_cost: f64,
}

/// Row of the follow control archive.
#[derive(Serialize)]
struct FollowCtrlArchRow {
    time_s: f64,
    cycle: u64,
    mode: &'static str,
    enabled: bool,
    safe: bool,
    target_id: Option<u64>,
    lat_error: f64,
    lon_error: f64,
    range_m: f64,
    prox_stop: bool,
    steering: f64,
    throttle: f64,
    valid: bool,
    degraded: bool,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DataStore {
    /// Open the per-cycle archives in the session directory.
    pub fn open_archives(&mut self, session: &Session) -> Result<(), ArchiveError> {
        self.tracker_arch = Archiver::from_path(session, "tracker.csv")?;
        self.follow_ctrl_arch = Archiver::from_path(session, "follow_ctrl.csv")?;
        Ok(())
    }

    /// Puts the executable into safe mode with the given cause.
    pub fn make_safe(&mut self, cause: SafeModeCause) {
        if !self.safe {
            warn!("Make safe requested, cause: {:?}", cause);
            self.safe = true;
            self.safe_cause = Some(cause);

            // Make follow_ctrl safe
            self.follow_ctrl.make_safe();
        }
    }

    /// Attempts to disable the safe mode by clearing the given cause.
    ///
    /// Returns `Ok(())` if this cause was cleared and safe mode was disabled, or `Err(())`
    /// otherwise. To remove safe mode the provided cause must match the initial reason for safe
    /// mode being enabled.
    ///
    /// If safe mode was not enabled `Ok(())` is returned
    pub fn make_unsafe(&mut self, cause: SafeModeCause) -> Result<(), ()> {
        if !self.safe {
            return Ok(());
        }

        match self.safe_cause {
            Some(root_cause) => {
                if cause == root_cause {
                    self.safe = false;
                    self.safe_cause = None;
                    info!("Make unsafe requested, root cause match, safe mode disabled");
                    Ok(())
                } else {
                    Err(())
                }
            }
            None => Ok(()),
        }
    }

    /// Perform actions required at the start of a cycle.
    pub fn cycle_start(&mut self) {
        self.tracker_output = tracker::OutputData::default();
        self.tracker_status_rpt = tracker::StatusReport::default();
        self.follow_ctrl_output = follow_ctrl::ControlCommand::default();
        self.follow_ctrl_status_rpt = follow_ctrl::StatusReport::default();
        self.control_msg = None;

        self.elapsed_s = util::session::get_elapsed_seconds();
    }
}

impl Archived for DataStore {
    fn write(&mut self) -> Result<(), ArchiveError> {
        let t = &self.tracker_status_rpt;
        self.tracker_arch.serialise(TrackerArchRow {
            time_s: self.elapsed_s,
            cycle: self.num_cycles,
            num_detections: t.num_detections,
            num_low_confidence: t.num_low_confidence,
            num_tracks: t.num_tracks,
            num_confirmed: t.num_confirmed,
            num_matched: t.num_matched,
            num_gated: t.num_gated,
            num_spawned: t.num_spawned,
            num_deleted: t.num_deleted,
            num_pruned: t.num_pruned,
            num_discarded: t.num_discarded,
            assignment_cost: t.assignment_cost,
        })?;

        let f = &self.follow_ctrl_status_rpt;
        let (steering, throttle, valid, degraded) = match self.control_msg {
            Some(ref m) => (m.steering, m.throttle, m.valid, m.degraded),
            None => (0.0, 0.0, false, false)
        };
        self.follow_ctrl_arch.serialise(FollowCtrlArchRow {
            time_s: self.elapsed_s,
            cycle: self.num_cycles,
            mode: f.mode.as_str(),
            enabled: f.enabled,
            safe: self.safe,
            target_id: f.target_id,
            lat_error: f.lat_error,
            lon_error: f.lon_error,
            range_m: f.range_m,
            prox_stop: f.prox_stop,
            steering,
            throttle,
            valid,
            degraded,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_safe_mode_root_cause() {
        let mut ds = DataStore::default();

        assert!(ds.make_unsafe(SafeModeCause::TransportDegraded).is_ok());

        ds.make_safe(SafeModeCause::TransportDegraded);
        ds.make_safe(SafeModeCause::Shutdown);
        assert!(ds.safe);
        assert_eq!(ds.safe_cause, Some(SafeModeCause::TransportDegraded));

        assert!(ds.make_unsafe(SafeModeCause::Shutdown).is_err());
        assert!(ds.safe);
        assert!(ds.make_unsafe(SafeModeCause::TransportDegraded).is_ok());
        assert!(!ds.safe);
    }

    #[test]
    fn test_archives_discarded_without_session() {
        let mut ds = DataStore::default();
        ds.cycle_start();
        assert!(ds.write().is_ok());
    }
}
