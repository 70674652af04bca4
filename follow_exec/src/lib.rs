//! # Follow Library
//!
//! Tracking of detected objects across frames and the closed loop controller which follows the
//! selected target. The `follow_exec` binary wires these modules to the message bus.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Configuration of the executable, one table per module.
pub mod params;

/// Snapshot store for the executable's configuration.
pub mod config_store;

/// Multi-object tracker - associates detections with tracks frame to frame.
pub mod tracker;

/// Follow controller - selects a target and produces steering and throttle demands.
pub mod follow_ctrl;

/// Messaging gateway - all bus I/O on a dedicated thread.
pub mod gateway;

/// One cycle of tracking and control.
pub mod follow_loop;

/// Global data store for the executable.
pub mod data_store;
