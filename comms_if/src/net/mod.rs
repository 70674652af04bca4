//! # Network Module
//!
//! Endpoint configuration and a ZMQ socket wrapper which tracks whether its peer is connected.
//!
//! ZMQ hides connection state from the user: a subscriber with no publisher simply receives
//! nothing. A [`MonitoredSocket`] listens to the socket's monitor events on a background thread so
//! the gateway can tell a quiet bus from a broken one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout of the monitor socket, bounds how long dropping a socket can take.
const MONITOR_POLL_TIMEOUT_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Used to give each monitor a unique inproc endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Endpoints and topics of the buses the follow executable is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetParams {
    /// Endpoint publishing detection batches from the perception service
    pub perception_endpoint: String,

    /// Topic of the detection batches
    pub perception_topic: String,

    /// Endpoint the control commands are published on, bound by this executable
    pub control_endpoint: String,

    /// Topic consumed by the vehicle actuation bridge
    pub control_topic: String,

    /// Topic of the command mirror consumed by the pilot process
    pub pilot_topic: String,

    /// Endpoint publishing the teleop chatter
    pub chatter_endpoint: String,

    /// Topic of the teleop chatter
    pub chatter_topic: String,
}

/// A zmq socket whose connection state is followed by a monitor thread.
pub struct MonitoredSocket {
    socket: Socket,

    monitor_thread: Option<thread::JoinHandle<()>>,

    state: Arc<LinkState>,
}

/// State shared between a [`MonitoredSocket`] and its monitor thread.
#[derive(Debug, Default)]
struct LinkState {
    shutdown: AtomicBool,

    connected: AtomicBool,

    /// Number of times an established connection has been lost
    disconnects: AtomicU64,
}

/// Options applied to a [`MonitoredSocket`].
///
/// Apart from `bind` these correspond to the options of the same name in the
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) documentation.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Bind to the endpoint rather than connect to it. Publishers owned by this executable bind,
    /// subscribers connect.
    pub bind: bool,

    /// `ZMQ_LINGER`, milliseconds
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`, milliseconds
    pub reconnect_ivl: i32,

    /// `ZMQ_RECONNECT_IVL_MAX`, milliseconds
    pub reconnect_ivl_max: i32,

    /// `ZMQ_RCVTIMEO`, milliseconds, -1 blocks
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`, milliseconds, -1 blocks
    pub send_timeout: i32,

    /// `ZMQ_RCVHWM`, messages
    pub recv_hwm: i32,

    /// `ZMQ_SNDHWM`, messages
    pub send_hwm: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not {0} to {1}: {2}")]
    EndpointError(&'static str, String, zmq::Error),

    #[error("Could not start the monitor thread: {0}")]
    MonitorThreadError(std::io::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(&'static str, zmq::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a socket of the given type, apply the options and bind or connect it.
    ///
    /// Never waits for a peer. A bound socket is considered connected straight away, a connecting
    /// socket becomes connected when its monitor reports the connection.
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        options: SocketOptions,
        endpoint: &str
    ) -> Result<Self, MonitoredSocketError> {
        let state = Arc::new(LinkState::default());

        let socket = ctx.socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // The monitor must be attached before connecting so the first event isn't missed
        let monitor_endpoint = format!(
            "inproc://follow_monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );
        socket.monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;

        let monitor = ctx.socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        set_sockopts!(monitor, (set_rcvtimeo, MONITOR_POLL_TIMEOUT_MS));
        monitor.connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::EndpointError("connect", monitor_endpoint.clone(), e))?;

        options.apply(&socket)?;

        if options.bind {
            socket.bind(endpoint)
                .map_err(|e| MonitoredSocketError::EndpointError("bind", endpoint.into(), e))?;
            state.connected.store(true, Ordering::Relaxed);
        }
        else {
            socket.connect(endpoint)
                .map_err(|e| MonitoredSocketError::EndpointError("connect", endpoint.into(), e))?;
        }

        let thread_state = state.clone();
        let monitor_thread = thread::Builder::new()
            .name(format!("monitor {}", endpoint))
            .spawn(move || run_monitor(monitor, monitor_endpoint, thread_state))
            .map_err(MonitoredSocketError::MonitorThreadError)?;

        Ok(Self {
            socket,
            monitor_thread: Some(monitor_thread),
            state,
        })
    }

    /// Whether the socket currently has a peer.
    pub fn connected(&self) -> bool {
        self.state.connected.load(Ordering::Relaxed)
    }

    /// Number of times an established connection has been lost.
    pub fn disconnects(&self) -> u64 {
        self.state.disconnects.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::Relaxed);

        // The monitor polls with a timeout so this join is bounded
        if let Some(jh) = self.monitor_thread.take() {
            jh.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl SocketOptions {
    /// Apply these options to the given socket.
    pub fn apply(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        set_sockopts!(
            socket,
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_reconnect_ivl_max, self.reconnect_ivl_max),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout),
            (set_rcvhwm, self.recv_hwm),
            (set_sndhwm, self.send_hwm)
        );

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // zmq's own defaults, except linger which zmq leaves infinite
        Self {
            bind: false,
            linger: 30_000,
            reconnect_ivl: 100,
            reconnect_ivl_max: 0,
            recv_timeout: -1,
            send_timeout: -1,
            recv_hwm: 1000,
            send_hwm: 1000,
        }
    }
}

impl Default for NetParams {
    fn default() -> Self {
        Self {
            perception_endpoint: "ipc:///tmp/follow/perception.sock".into(),
            perception_topic: "aav/following/detections".into(),
            control_endpoint: "ipc:///tmp/follow/following.sock".into(),
            control_topic: "aav/following/controls".into(),
            pilot_topic: "aav/following/pilot".into(),
            chatter_endpoint: "ipc:///tmp/follow/teleop_c.sock".into(),
            chatter_topic: "aav/teleop/chatter".into(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read one event from a monitor socket.
///
/// Monitor messages are two frames: the event number and value, then the peer address.
fn read_event(monitor: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = monitor.recv_msg(0)?;

    if msg.len() < 2 {
        return Err(zmq::Error::EINVAL)
    }
    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    if monitor.get_rcvmore()? {
        monitor.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

fn run_monitor(monitor: Socket, monitor_endpoint: String, state: Arc<LinkState>) {
    while !state.shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Error reading event from monitor {}: {}", monitor_endpoint, e);
                break
            }
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                state.connected.store(true, Ordering::Relaxed);
            },
            SocketEvent::DISCONNECTED => {
                if state.connected.swap(false, Ordering::Relaxed) {
                    state.disconnects.fetch_add(1, Ordering::Relaxed);
                    debug!("{} disconnected", monitor_endpoint);
                }
            },
            _ => ()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_net_params_partial() {
        let p: NetParams = serde_json::from_str(r#"{"control_topic": "x/controls"}"#).unwrap();
        assert_eq!(p.control_topic, "x/controls");
        assert_eq!(p.perception_topic, NetParams::default().perception_topic);
    }

    #[test]
    fn test_bound_socket_connected() {
        let ctx = Context::new();
        let opts = SocketOptions { bind: true, linger: 0, ..Default::default() };

        let s = MonitoredSocket::new(&ctx, zmq::PUB, opts, "inproc://net_test_bound").unwrap();
        assert!(s.connected());
        assert_eq!(s.disconnects(), 0);
    }
}
