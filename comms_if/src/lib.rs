//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the following software: the message types
//! exchanged on the bus, the ZMQ socket wrappers, and the transport-agnostic message channels.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Teleop chatter requests (start/stop following, restart)
pub mod tc;

/// Message definitions for equipment (perception and vehicle) buses
pub mod eqpt;

/// Network module
pub mod net;

/// Transport-agnostic message channels
pub mod channel;

/// Topic framing of bus messages
pub mod frame;
