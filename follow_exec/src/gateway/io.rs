//! # Gateway I/O thread

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::Utc;
use comms_if::{
    channel::{ChannelError, MessageChannel},
    eqpt::{control::ControlMsg, perception::DetectionBatch},
    frame,
    net::NetParams,
    tc::Chatter,
};
use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, error, info, trace, warn};
use std::{
    thread,
    time::{Duration, Instant},
};

use super::{
    Backoff, DetectionFrame, DropOldestQueue, GatewayParams, GatewayStatus, PushOutcome,
};
use crate::tracker::Detection;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum number of frames read from one channel in a single iteration.
const MAX_FRAMES_PER_POLL: usize = 64;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// State owned by the I/O thread.
pub(super) struct IoWorker {
    pub perception: Link,
    pub chatter: Option<Link>,
    pub control: Link,

    pub net: NetParams,
    pub params: GatewayParams,

    pub inbound: DropOldestQueue<DetectionFrame>,
    pub outbound: DropOldestQueue<ControlMsg>,
    pub chatter_tx: DropOldestQueue<Chatter>,
    pub request_rx: Receiver<IoRequest>,

    pub status: Arc<GatewayStatus>,
}

/// A channel and its reconnection state.
pub(super) struct Link {
    channel: Box<dyn MessageChannel>,

    backoff: Backoff,

    /// Time at which the link went down, `None` while it's up
    down_since: Option<Instant>,

    /// Set once the channel has been reopened (or dropped its connection on its own), meaning it
    /// may be considered up again as soon as it reports being connected
    reopened: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Requests from the gateway handle to the I/O thread.
pub(super) enum IoRequest {
    /// Drain the outbound queue, publish the final command and exit
    Shutdown(ControlMsg),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl IoWorker {
    pub fn run(mut self) {
        let poll = Duration::from_secs_f64(self.params.poll_interval_s);

        loop {
            let final_msg = match self.request_rx.try_recv() {
                Ok(IoRequest::Shutdown(msg)) => Some(msg),
                Err(TryRecvError::Disconnected) => Some(ControlMsg::safe(Utc::now())),
                Err(TryRecvError::Empty) => None
            };

            if let Some(msg) = final_msg {
                self.close(msg);
                return
            }

            let now = Instant::now();

            self.maintain_links(now);
            self.receive_perception(now);
            self.receive_chatter(now);
            self.publish_outbound(now);
            self.update_degraded(now);

            thread::sleep(poll);
        }
    }

    /// Publish what remains in the outbound queue within the grace period, then the final command.
    fn close(&mut self, final_msg: ControlMsg) {
        let poll = Duration::from_secs_f64(self.params.poll_interval_s);
        let deadline = Instant::now() + Duration::from_secs_f64(self.params.shutdown_grace_s);

        loop {
            let now = Instant::now();
            if self.outbound.is_empty() || now >= deadline {
                break
            }

            self.maintain_links(now);
            self.publish_outbound(now);

            if !self.outbound.is_empty() {
                thread::sleep(poll);
            }
        }

        let abandoned = self.outbound.drain().len();
        if abandoned > 0 {
            GatewayStatus::add(&self.status.dropped_outbound, abandoned as u64);
            warn!("{} queued command(s) not published before shutdown", abandoned);
        }

        let now = Instant::now();
        self.control.check(now);

        if self.control.is_up() && self.publish(&final_msg, now) {
            info!("Final command published");
        }
        else {
            error!("Could not publish the final command, the control link is down");
        }
    }

    fn maintain_links(&mut self, now: Instant) {
        self.perception.maintain(now, &self.status);
        self.control.maintain(now, &self.status);
        if let Some(ref mut c) = self.chatter {
            c.maintain(now, &self.status);
        }

        GatewayStatus::set(&self.status.perception_connected, self.perception.is_up());
        GatewayStatus::set(&self.status.control_connected, self.control.is_up());
    }

    fn receive_perception(&mut self, now: Instant) {
        for _ in 0..MAX_FRAMES_PER_POLL {
            if !self.perception.is_up() {
                break
            }

            let frame = match self.perception.channel.try_receive() {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(ChannelError::NonUtf8Frame) => {
                    GatewayStatus::incr(&self.status.decode_errors);
                    warn!("Dropped a non UTF-8 perception frame");
                    continue
                },
                Err(e) => {
                    self.perception.mark_down(now, &e);
                    break
                }
            };

            self.handle_detections(&frame);
        }
    }

    fn handle_detections(&self, frame: &str) {
        let payload = match frame::split(frame) {
            Ok((topic, payload)) if topic == self.net.perception_topic => payload,
            Ok((topic, _)) => {
                trace!("Ignoring frame on topic {}", topic);
                return
            },
            Err(e) => {
                GatewayStatus::incr(&self.status.decode_errors);
                warn!("Dropped a malformed perception frame: {}", e);
                return
            }
        };

        let batch: DetectionBatch = match serde_json::from_str(payload) {
            Ok(b) => b,
            Err(e) => {
                GatewayStatus::incr(&self.status.decode_errors);
                warn!("Could not decode a detection batch: {}", e);
                return
            }
        };

        GatewayStatus::incr(&self.status.batches_received);

        let (detections, rejected) = Detection::from_batch(&batch, self.params.max_coordinate_px);
        if rejected > 0 {
            GatewayStatus::add(&self.status.rejected_detections, rejected as u64);
            warn!(
                "Rejected {} of {} detections in frame {}",
                rejected, batch.detections.len(), batch.frame_index
            );
        }

        let outcome = self.inbound.push(DetectionFrame {
            frame_index: batch.frame_index,
            timestamp: batch.timestamp,
            detections,
            rejected,
        });

        if let PushOutcome::DroppedOldest(n) = outcome {
            GatewayStatus::add(&self.status.dropped_inbound, n as u64);
            debug!("Inbound queue full, dropped {} oldest batch(es)", n);
        }
    }

    fn receive_chatter(&mut self, now: Instant) {
        let link = match self.chatter {
            Some(ref mut l) => l,
            None => return
        };

        for _ in 0..MAX_FRAMES_PER_POLL {
            if !link.is_up() {
                break
            }

            let frame = match link.channel.try_receive() {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(ChannelError::NonUtf8Frame) => {
                    GatewayStatus::incr(&self.status.decode_errors);
                    continue
                },
                Err(e) => {
                    link.mark_down(now, &e);
                    break
                }
            };

            let payload = match frame::split(&frame) {
                Ok((topic, payload)) if topic == self.net.chatter_topic => payload,
                Ok(_) => continue,
                Err(e) => {
                    GatewayStatus::incr(&self.status.decode_errors);
                    warn!("Dropped a malformed chatter frame: {}", e);
                    continue
                }
            };

            match Chatter::from_json(payload) {
                Ok(Chatter::Ignored) => trace!("Ignoring chatter: {}", payload),
                Ok(c) => {
                    GatewayStatus::incr(&self.status.chatter_received);
                    info!("Chatter recieved: {:?}", c);
                    if let PushOutcome::DroppedOldest(n) = self.chatter_tx.push(c) {
                        GatewayStatus::add(&self.status.dropped_chatter, n as u64);
                        warn!("Chatter queue full, dropped {} request(s)", n);
                    }
                },
                Err(e) => {
                    GatewayStatus::incr(&self.status.decode_errors);
                    warn!("Invalid chatter: {}", e);
                }
            }
        }
    }

    /// Publish queued commands while the control link is up.
    fn publish_outbound(&mut self, now: Instant) {
        while self.control.is_up() {
            let msg = match self.outbound.try_pop() {
                Some(m) => m,
                None => break
            };

            if !self.publish(&msg, now) {
                GatewayStatus::incr(&self.status.dropped_outbound);
                break
            }
        }
    }

    /// Publish one command on the control topic and its mirror on the pilot topic.
    ///
    /// Returns `false` only if the command itself could not be published. A failed mirror is
    /// counted in `mirror_errors`.
    fn publish(&mut self, msg: &ControlMsg, now: Instant) -> bool {
        let frame = match frame::encode(&self.net.control_topic, msg) {
            Ok(f) => f,
            Err(e) => {
                error!("Could not encode the command for {}: {}", self.net.control_topic, e);
                return false
            }
        };

        if let Err(e) = self.control.channel.send(&frame) {
            GatewayStatus::incr(&self.status.send_errors);
            self.control.mark_down(now, &e);
            return false
        }

        GatewayStatus::incr(&self.status.commands_sent);
        trace!("Published command: {:?}", msg);

        if !self.net.pilot_topic.is_empty() {
            let mirrored = match frame::encode(&self.net.pilot_topic, msg) {
                Ok(f) => match self.control.channel.send(&f) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        GatewayStatus::incr(&self.status.send_errors);
                        self.control.mark_down(now, &e);
                        Err(e.to_string())
                    }
                },
                Err(e) => Err(e.to_string())
            };

            if let Err(e) = mirrored {
                GatewayStatus::incr(&self.status.mirror_errors);
                warn!("Could not mirror the command on {}: {}", self.net.pilot_topic, e);
            }
        }

        true
    }

    /// Raise or clear the degraded flag depending on how long the data links have been down.
    fn update_degraded(&self, now: Instant) {
        let limit = Duration::from_secs_f64(self.params.degraded_after_s);

        let degraded = [&self.perception, &self.control]
            .iter()
            .any(|l| l.down_for(now).map(|d| d >= limit).unwrap_or(false));

        if degraded != self.status.is_degraded() {
            if degraded {
                error!(
                    "Transport degraded: perception {}, control {}",
                    link_state_str(&self.perception), link_state_str(&self.control)
                );
            }
            else {
                info!("Transport restored");
            }
            GatewayStatus::set(&self.status.degraded, degraded);
        }
    }
}

impl Link {
    pub fn new(channel: Box<dyn MessageChannel>, params: &GatewayParams) -> Self {
        let mut link = Self {
            channel,
            backoff: Backoff::new(
                params.backoff_initial_s,
                params.backoff_max_s,
                params.backoff_multiplier
            ),
            down_since: None,
            reopened: true,
        };

        // Subscribers start unconnected until their publisher appears
        if !link.channel.is_connected() {
            link.down_since = Some(Instant::now());
        }

        link
    }

    pub fn is_up(&self) -> bool {
        self.down_since.is_none()
    }

    pub fn down_for(&self, now: Instant) -> Option<Duration> {
        self.down_since.map(|t| now.saturating_duration_since(t))
    }

    /// Mark the link as failed after an error on it.
    pub fn mark_down(&mut self, now: Instant, err: &ChannelError) {
        if self.down_since.is_none() {
            warn!("{} link failed: {}", self.channel.name(), err);
            self.down_since = Some(now);
        }
        self.reopened = false;
    }

    /// Follow the connection state reported by the channel.
    pub fn check(&mut self, now: Instant) {
        let connected = self.channel.is_connected();

        match (self.down_since, connected) {
            (None, false) => {
                warn!("{} link disconnected", self.channel.name());
                self.down_since = Some(now);
                // The transport reconnects by itself, so it may come back without being reopened
                self.reopened = true;
            },
            (Some(since), true) if self.reopened => {
                info!(
                    "{} link up after {:.2} s",
                    self.channel.name(),
                    now.saturating_duration_since(since).as_secs_f64()
                );
                self.down_since = None;
                self.backoff.reset();
            },
            _ => ()
        }
    }

    /// Check the link and reopen it if it's been down for long enough.
    pub fn maintain(&mut self, now: Instant, status: &GatewayStatus) {
        self.check(now);

        if self.is_up() || !self.backoff.ready(now) {
            return
        }

        GatewayStatus::incr(&status.reconnects);

        // The next attempt is always scheduled, a successful reopen clears it once connected
        let delay = self.backoff.failed(now);

        match self.channel.reconnect() {
            Ok(()) => {
                debug!("Reopened {} link", self.channel.name());
                self.reopened = true;
                self.check(now);
            },
            Err(e) => {
                warn!(
                    "Could not reconnect the {} link ({} attempts): {}, retrying in {:.2} s",
                    self.channel.name(), self.backoff.failures(), e, delay.as_secs_f64()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn link_state_str(link: &Link) -> &'static str {
    match link.is_up() {
        true => "up",
        false => "down"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::channel::MemoryChannel;

    fn params() -> GatewayParams {
        GatewayParams {
            backoff_initial_s: 0.01,
            backoff_max_s: 0.04,
            ..Default::default()
        }
    }

    /// Memory channel which refuses to send frames on one topic.
    struct FailingTopic {
        inner: MemoryChannel,
        topic: String,
    }

    impl MessageChannel for FailingTopic {
        fn send(&mut self, frame: &str) -> Result<(), ChannelError> {
            if frame.starts_with(self.topic.as_str()) {
                return Err(ChannelError::LinkDown)
            }
            self.inner.send(frame)
        }

        fn try_receive(&mut self) -> Result<Option<String>, ChannelError> {
            self.inner.try_receive()
        }

        fn reconnect(&mut self) -> Result<(), ChannelError> {
            self.inner.reconnect()
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn name(&self) -> &str {
            self.inner.name()
        }
    }

    fn worker(
        params: GatewayParams,
        chatter: Option<Box<dyn MessageChannel>>,
        control: Box<dyn MessageChannel>,
    ) -> IoWorker {
        let (perception, _) = MemoryChannel::pair("perception", "perception_src");
        let (_, request_rx) = crossbeam_channel::bounded(1);

        IoWorker {
            perception: Link::new(Box::new(perception), &params),
            chatter: chatter.map(|c| Link::new(c, &params)),
            control: Link::new(control, &params),
            net: NetParams::default(),
            inbound: DropOldestQueue::new(params.inbound_queue_len),
            outbound: DropOldestQueue::new(params.outbound_queue_len),
            chatter_tx: DropOldestQueue::new(params.chatter_queue_len),
            request_rx,
            status: Arc::new(GatewayStatus::default()),
            params,
        }
    }

    #[test]
    fn test_mirror_failure_is_not_a_drop() {
        let net = NetParams::default();
        let (control, mut sink) = MemoryChannel::pair("control", "control_sink");
        let control = FailingTopic { inner: control, topic: net.pilot_topic.clone() };
        let mut w = worker(params(), None, Box::new(control));

        w.outbound.push(ControlMsg::safe(Utc::now()));
        w.publish_outbound(Instant::now());

        let r = w.status.snapshot();
        assert_eq!(r.commands_sent, 1);
        assert_eq!(r.mirror_errors, 1);
        assert_eq!(r.send_errors, 1);
        assert_eq!(r.dropped_outbound, 0);

        let frame = sink.try_receive().unwrap().unwrap();
        assert!(frame.starts_with(net.control_topic.as_str()));
        assert_eq!(sink.try_receive().unwrap(), None);
    }

    #[test]
    fn test_control_failure_is_a_drop() {
        let net = NetParams::default();
        let (control, _sink) = MemoryChannel::pair("control", "control_sink");
        let control = FailingTopic { inner: control, topic: net.control_topic.clone() };
        let mut w = worker(params(), None, Box::new(control));

        w.outbound.push(ControlMsg::safe(Utc::now()));
        w.publish_outbound(Instant::now());

        let r = w.status.snapshot();
        assert_eq!(r.commands_sent, 0);
        assert_eq!(r.mirror_errors, 0);
        assert_eq!(r.dropped_outbound, 1);
        assert!(!w.control.is_up());
    }

    #[test]
    fn test_chatter_queue_bounded() {
        let net = NetParams::default();
        let (chatter, mut src) = MemoryChannel::pair("chatter", "chatter_src");
        let (control, _sink) = MemoryChannel::pair("control", "control_sink");
        let p = GatewayParams { chatter_queue_len: 2, ..params() };
        let mut w = worker(p, Some(Box::new(chatter)), Box::new(control));

        for req in [
            r#"{"following": "Start Following"}"#,
            r#"{"following": "Stop Following"}"#,
            r#"{"command": "restart"}"#,
        ].iter() {
            src.send(&format!("{} {}", net.chatter_topic, req)).unwrap();
        }

        w.receive_chatter(Instant::now());

        let r = w.status.snapshot();
        assert_eq!(r.chatter_received, 3);
        assert_eq!(r.dropped_chatter, 1);

        assert_eq!(w.chatter_tx.len(), 2);
        assert_eq!(w.chatter_tx.try_pop(), Some(Chatter::StopFollowing));
        assert_eq!(w.chatter_tx.try_pop(), Some(Chatter::Restart));
    }

    #[test]
    fn test_link_recovers() {
        let (a, _b) = MemoryChannel::pair("a", "b");
        let mem = a.link();
        let status = GatewayStatus::default();
        let mut link = Link::new(Box::new(a), &params());
        let t0 = Instant::now();

        assert!(link.is_up());

        mem.set_up(false);
        link.mark_down(t0, &ChannelError::LinkDown);
        assert!(!link.is_up());

        // Reconnects fail while the memory link is down, spaced by the backoff
        link.maintain(t0, &status);
        link.maintain(t0, &status);
        assert_eq!(mem.reconnect_attempts(), 1);

        link.maintain(t0 + Duration::from_millis(10), &status);
        assert_eq!(mem.reconnect_attempts(), 2);
        assert!(!link.is_up());

        mem.set_up(true);
        link.maintain(t0 + Duration::from_millis(50), &status);
        assert!(link.is_up());
        assert_eq!(link.down_for(t0), None);
        assert_eq!(status.snapshot().reconnects, 3);
    }

    #[test]
    fn test_error_needs_reopen() {
        let (a, _b) = MemoryChannel::pair("a", "b");
        let mut link = Link::new(Box::new(a), &params());
        let t0 = Instant::now();

        // The channel still reports connected but failed, so it stays down until reopened
        link.mark_down(t0, &ChannelError::LinkDown);
        link.check(t0);
        assert!(!link.is_up());
        assert_eq!(link.down_for(t0 + Duration::from_millis(5)), Some(Duration::from_millis(5)));

        link.maintain(t0, &GatewayStatus::default());
        assert!(link.is_up());
    }
}
