//! # Messaging gateway
//!
//! The gateway owns every connection to the bus. All network I/O happens on its own thread, which
//! exchanges data with the control loop through bounded queues:
//!
//! - detection batches are decoded and validated on the I/O thread and queued for the loop,
//!   dropping the oldest batch if the loop falls behind,
//! - teleop chatter is parsed and forwarded to the loop, dropping the oldest request if the loop
//!   doesn't collect them,
//! - control commands from the loop are published on the control topic and mirrored on the pilot
//!   topic, dropping the oldest command if the link can't keep up.
//!
//! Failed links are reconnected with a bounded exponential backoff. A link which stays down for
//! longer than `degraded_after_s` raises the degraded flag, which the loop uses to mark its
//! commands as degraded.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod backoff;
mod io;
mod queue;
mod status;

// ---------------------------------------------------------------------------
// EXPORTS
// ---------------------------------------------------------------------------

pub use backoff::Backoff;
pub use queue::{DropOldestQueue, PushOutcome};
pub use status::{GatewayStatus, StatusReport};

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::{
    channel::{ChannelError, MessageChannel, ZmqChannel},
    eqpt::control::ControlMsg,
    net::{zmq, NetParams},
    tc::Chatter,
};
use crossbeam_channel::{bounded, Sender};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    params::{check_positive, ParamsError},
    tracker::{Detection, MAX_COORDINATE_PX},
};
use io::{IoRequest, IoWorker, Link};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayParams {
    /// Maximum number of decoded detection batches waiting for the loop
    pub inbound_queue_len: usize,

    /// Maximum number of commands waiting to be published
    pub outbound_queue_len: usize,

    /// Maximum number of chatter requests waiting for the loop
    pub chatter_queue_len: usize,

    /// Largest magnitude of a detection's coordinates or size, detections beyond it are rejected.
    /// Capped at `tracker::MAX_COORDINATE_PX`.
    ///
    /// Units: pixels
    pub max_coordinate_px: f64,

    /// First delay between reconnection attempts.
    ///
    /// Units: seconds
    pub backoff_initial_s: f64,

    /// Longest delay between reconnection attempts.
    ///
    /// Units: seconds
    pub backoff_max_s: f64,

    /// Factor applied to the delay after each failed attempt
    pub backoff_multiplier: f64,

    /// Time a link may be down before the gateway reports itself as degraded.
    ///
    /// Units: seconds
    pub degraded_after_s: f64,

    /// Sleep between iterations of the I/O thread.
    ///
    /// Units: seconds
    pub poll_interval_s: f64,

    /// Longest time spent publishing queued commands on shutdown before the final safe command.
    ///
    /// Units: seconds
    pub shutdown_grace_s: f64,
}

/// A decoded detection batch.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    pub frame_index: u64,

    pub timestamp: DateTime<Utc>,

    /// Detections which passed validation
    pub detections: Vec<Detection>,

    /// Number of records in the batch which failed validation
    pub rejected: usize,
}

/// Handle on the gateway's I/O thread.
///
/// Dropping the handle shuts the thread down with a neutral final command, use
/// [`Gateway::shutdown`] to choose the final command and get the closing status.
pub struct Gateway {
    inbound: DropOldestQueue<DetectionFrame>,

    chatter: DropOldestQueue<Chatter>,

    outbound: DropOldestQueue<ControlMsg>,

    request_tx: Sender<IoRequest>,

    status: Arc<GatewayStatus>,

    join_handle: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Could not open the {0} channel: {1}")]
    ChannelError(&'static str, ChannelError),

    #[error("Could not start the gateway thread: {0}")]
    ThreadStartError(std::io::Error),

    #[error("The gateway thread panicked")]
    ThreadPanicked,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Gateway {
    /// Open the ZMQ channels described by `net` and start the gateway.
    pub fn zmq(
        ctx: &zmq::Context,
        net: &NetParams,
        params: &GatewayParams
    ) -> Result<Self, GatewayError> {
        let perception = ZmqChannel::subscriber(
            "perception",
            ctx,
            &net.perception_endpoint,
            &[net.perception_topic.as_str()]
        ).map_err(|e| GatewayError::ChannelError("perception", e))?;

        let chatter = ZmqChannel::subscriber(
            "chatter",
            ctx,
            &net.chatter_endpoint,
            &[net.chatter_topic.as_str()]
        ).map_err(|e| GatewayError::ChannelError("chatter", e))?;

        let control = ZmqChannel::publisher("control", ctx, &net.control_endpoint)
            .map_err(|e| GatewayError::ChannelError("control", e))?;

        Self::start(
            Box::new(perception),
            Some(Box::new(chatter)),
            Box::new(control),
            net,
            params
        )
    }

    /// Start the gateway over the given channels.
    ///
    /// The perception and chatter channels are only received from, the control channel is only
    /// sent on.
    pub fn start(
        perception: Box<dyn MessageChannel>,
        chatter: Option<Box<dyn MessageChannel>>,
        control: Box<dyn MessageChannel>,
        net: &NetParams,
        params: &GatewayParams
    ) -> Result<Self, GatewayError> {
        let inbound = DropOldestQueue::new(params.inbound_queue_len);
        let outbound = DropOldestQueue::new(params.outbound_queue_len);
        let chatter_queue = DropOldestQueue::new(params.chatter_queue_len);
        // Only a single shutdown request is ever sent
        let (request_tx, request_rx) = bounded(1);
        let status = Arc::new(GatewayStatus::default());

        let worker = IoWorker {
            perception: Link::new(perception, params),
            chatter: chatter.map(|c| Link::new(c, params)),
            control: Link::new(control, params),
            net: net.clone(),
            params: params.clone(),
            inbound: inbound.clone(),
            outbound: outbound.clone(),
            chatter_tx: chatter_queue.clone(),
            request_rx,
            status: status.clone(),
        };

        let join_handle = thread::Builder::new()
            .name("gateway".into())
            .spawn(move || worker.run())
            .map_err(GatewayError::ThreadStartError)?;

        info!("Gateway started");

        Ok(Self {
            inbound,
            chatter: chatter_queue,
            outbound,
            request_tx,
            status,
            join_handle: Some(join_handle),
        })
    }

    /// Queue a command for publication.
    ///
    /// Never blocks. If the outbound queue is full the oldest queued command is discarded.
    pub fn send_command(&self, msg: ControlMsg) {
        if let PushOutcome::DroppedOldest(n) = self.outbound.push(msg) {
            GatewayStatus::add(&self.status.dropped_outbound, n as u64);
            warn!("Outbound queue full, dropped {} oldest command(s)", n);
        }
    }

    /// Get the next detection batch, waiting at most `timeout` for one.
    pub fn recv_detections_timeout(&self, timeout: Duration) -> Option<DetectionFrame> {
        self.inbound.pop_timeout(timeout)
    }

    /// Get the most recent detection batch, discarding any older ones.
    ///
    /// Returns the batch and the number of batches which were discarded.
    pub fn latest_detections(&self) -> (Option<DetectionFrame>, usize) {
        let mut frames = self.inbound.drain();
        let latest = frames.pop();
        (latest, frames.len())
    }

    /// Get the next chatter request if one has arrived.
    pub fn try_recv_chatter(&self) -> Option<Chatter> {
        self.chatter.try_pop()
    }

    pub fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    pub fn status(&self) -> StatusReport {
        self.status.snapshot()
    }

    /// Stop the gateway.
    ///
    /// Queued commands are published for at most `shutdown_grace_s`, then `final_msg` is published
    /// on both the control and pilot topics and the channels are closed.
    pub fn shutdown(mut self, final_msg: ControlMsg) -> Result<StatusReport, GatewayError> {
        self.stop(final_msg)?;
        Ok(self.status.snapshot())
    }

    fn stop(&mut self, final_msg: ControlMsg) -> Result<(), GatewayError> {
        let handle = match self.join_handle.take() {
            Some(h) => h,
            None => return Ok(())
        };

        // The thread may already have exited, in which case join reports why
        self.request_tx.send(IoRequest::Shutdown(final_msg)).ok();

        handle.join().map_err(|_| GatewayError::ThreadPanicked)?;

        info!("Gateway stopped");

        Ok(())
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if let Err(e) = self.stop(ControlMsg::safe(Utc::now())) {
            warn!("Error stopping the gateway: {}", e);
        }
    }
}

impl GatewayParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        let lens = [self.inbound_queue_len, self.outbound_queue_len, self.chatter_queue_len];
        if lens.iter().any(|l| *l == 0) {
            return Err(ParamsError::InvalidValue(
                "gateway queue lengths",
                "queues must hold at least one item".into()
            ))
        }

        check_positive("gateway.backoff_initial_s", self.backoff_initial_s)?;
        check_positive("gateway.backoff_max_s", self.backoff_max_s)?;
        check_positive("gateway.degraded_after_s", self.degraded_after_s)?;
        check_positive("gateway.poll_interval_s", self.poll_interval_s)?;
        check_positive("gateway.shutdown_grace_s", self.shutdown_grace_s)?;
        check_positive("gateway.max_coordinate_px", self.max_coordinate_px)?;

        if self.max_coordinate_px > MAX_COORDINATE_PX {
            return Err(ParamsError::InvalidValue(
                "gateway.max_coordinate_px",
                format!("must be at most {}", MAX_COORDINATE_PX)
            ))
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ParamsError::InvalidValue(
                "gateway.backoff_multiplier",
                format!("expected a value of at least 1, found {}", self.backoff_multiplier)
            ))
        }

        if self.backoff_max_s < self.backoff_initial_s {
            return Err(ParamsError::InvalidValue(
                "gateway.backoff_max_s",
                "must be at least the initial backoff".into()
            ))
        }

        Ok(())
    }
}

impl Default for GatewayParams {
    fn default() -> Self {
        Self {
            inbound_queue_len: 8,
            outbound_queue_len: 4,
            chatter_queue_len: 16,
            max_coordinate_px: 1.0e4,
            backoff_initial_s: 0.1,
            backoff_max_s: 5.0,
            backoff_multiplier: 2.0,
            degraded_after_s: 2.0,
            poll_interval_s: 0.002,
            shutdown_grace_s: 0.5,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(GatewayParams::default().validate().is_ok());

        let p = GatewayParams { outbound_queue_len: 0, ..Default::default() };
        assert!(p.validate().is_err());

        let p = GatewayParams { backoff_multiplier: 0.5, ..Default::default() };
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InvalidValue("gateway.backoff_multiplier", _))
        ));

        let p = GatewayParams { backoff_max_s: 0.01, ..Default::default() };
        assert!(p.validate().is_err());

        let p = GatewayParams { chatter_queue_len: 0, ..Default::default() };
        assert!(p.validate().is_err());

        let p = GatewayParams { max_coordinate_px: 1e9, ..Default::default() };
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InvalidValue("gateway.max_coordinate_px", _))
        ));
    }
}
