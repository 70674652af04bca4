//! # Follow control module
//!
//! Selects a target among the confirmed tracks and closes the loop on its position in the image,
//! producing a steering and throttle demand every cycle.
//!
//! The controller runs a state machine:
//!
//! ```text
//!            candidates                 same target held
//!   IDLE ---------------> ACQUIRING -----------------------> TRACKING
//!    ^  <---------------                                       |   ^
//!    |    no candidates                        target lost     |   | target reselected
//!    |                                                         v   |   within grace
//!    +-------------------------------------------------------- LOST
//!                         grace period expired
//! ```
//!
//! Only the TRACKING state produces a valid command, all other states produce the neutral
//! command.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod controllers;
mod params;
mod select;
mod state;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use controllers::*;
pub use params::*;
pub use select::*;
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during follow control.
#[derive(Debug, thiserror::Error)]
pub enum FollowCtrlError {
    #[error("Invalid time step: {0}")]
    InvalidDt(f64),

    #[error("Invalid follow control parameters: {0}")]
    InvalidParams(crate::params::ParamsError),
}
