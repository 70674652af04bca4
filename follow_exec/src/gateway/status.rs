//! # Gateway status
//!
//! Counters shared between the gateway's I/O thread and its handle.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Live counters, updated by the I/O thread.
#[derive(Debug, Default)]
pub struct GatewayStatus {
    pub(crate) batches_received: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) rejected_detections: AtomicU64,
    pub(crate) dropped_inbound: AtomicU64,
    pub(crate) chatter_received: AtomicU64,
    pub(crate) dropped_chatter: AtomicU64,
    pub(crate) commands_sent: AtomicU64,
    pub(crate) dropped_outbound: AtomicU64,
    pub(crate) send_errors: AtomicU64,
    pub(crate) mirror_errors: AtomicU64,
    pub(crate) reconnects: AtomicU64,
    pub(crate) perception_connected: AtomicBool,
    pub(crate) control_connected: AtomicBool,
    pub(crate) degraded: AtomicBool,
}

/// Snapshot of the gateway counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub batches_received: u64,
    pub decode_errors: u64,
    pub rejected_detections: u64,
    pub dropped_inbound: u64,
    pub chatter_received: u64,
    pub dropped_chatter: u64,
    pub commands_sent: u64,
    pub dropped_outbound: u64,
    pub send_errors: u64,
    /// Commands published on the control topic whose pilot mirror failed
    pub mirror_errors: u64,
    pub reconnects: u64,
    pub perception_connected: bool,
    pub control_connected: bool,
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl GatewayStatus {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::Relaxed);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatusReport {
        StatusReport {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            rejected_detections: self.rejected_detections.load(Ordering::Relaxed),
            dropped_inbound: self.dropped_inbound.load(Ordering::Relaxed),
            chatter_received: self.chatter_received.load(Ordering::Relaxed),
            dropped_chatter: self.dropped_chatter.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            dropped_outbound: self.dropped_outbound.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            mirror_errors: self.mirror_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            perception_connected: self.perception_connected.load(Ordering::Relaxed),
            control_connected: self.control_connected.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}
