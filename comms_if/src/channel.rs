//! # Message channels
//!
//! A `MessageChannel` moves whole frames (see [`crate::frame`]) between this process and the bus.
//! Two transports are provided:
//!
//! - [`ZmqChannel`], which wraps a [`MonitoredSocket`] in either publisher or subscriber mode,
//! - [`MemoryChannel`], an in-process pair backed by crossbeam channels, used for loopback and in
//!   tests. The link of a memory pair can be taken down to exercise reconnection.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::debug;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Capability of sending and receiving frames over some transport.
///
/// None of the methods may block for longer than the transport's configured timeouts.
pub trait MessageChannel: Send {
    /// Send a frame.
    fn send(&mut self, frame: &str) -> Result<(), ChannelError>;

    /// Receive the next frame if one is waiting, otherwise return `Ok(None)`.
    fn try_receive(&mut self) -> Result<Option<String>, ChannelError>;

    /// Tear down and re-establish the underlying transport.
    fn reconnect(&mut self) -> Result<(), ChannelError>;

    /// Whether the transport currently has a usable link.
    fn is_connected(&self) -> bool;

    /// Name of the channel for logging.
    fn name(&self) -> &str;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A channel over a monitored ZMQ socket.
pub struct ZmqChannel {
    name: String,

    ctx: zmq::Context,

    socket_type: zmq::SocketType,

    options: SocketOptions,

    endpoint: String,

    /// Topic prefixes subscribed to, only used by subscribers
    topics: Vec<String>,

    socket: Option<MonitoredSocket>,
}

/// One end of an in-memory channel pair.
pub struct MemoryChannel {
    name: String,

    tx: Sender<String>,

    rx: Receiver<String>,

    /// Topic prefixes accepted by this end, empty accepts everything
    topics: Vec<String>,

    link: MemoryLink,
}

/// Handle on the link shared by both ends of a memory pair.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    up: Arc<AtomicBool>,
    reconnects: Arc<AtomicU64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("The channel's socket isn't open")]
    NotOpen,

    #[error("Could not open the socket: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not subscribe to \"{0}\": {1}")]
    SubscribeError(String, zmq::Error),

    #[error("Could not send the frame: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a frame: {0}")]
    RecvError(zmq::Error),

    #[error("Recieved a frame which is not valid UTF-8")]
    NonUtf8Frame,

    #[error("The link is down")]
    LinkDown,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ZmqChannel {
    /// Create a publisher bound to the endpoint.
    pub fn publisher(
        name: &str,
        ctx: &zmq::Context,
        endpoint: &str
    ) -> Result<Self, ChannelError> {
        let options = SocketOptions {
            bind: true,
            linger: 0,
            send_timeout: 0,
            ..Default::default()
        };

        let mut chan = Self {
            name: name.to_string(),
            ctx: ctx.clone(),
            socket_type: zmq::PUB,
            options,
            endpoint: endpoint.to_string(),
            topics: Vec::new(),
            socket: None,
        };
        chan.open()?;

        Ok(chan)
    }

    /// Create a subscriber connected to the endpoint, filtering on the given topics.
    ///
    /// The subscriber doesn't wait for the publisher to appear, use `is_connected` to find out
    /// when the link is up.
    pub fn subscriber(
        name: &str,
        ctx: &zmq::Context,
        endpoint: &str,
        topics: &[&str]
    ) -> Result<Self, ChannelError> {
        let options = SocketOptions {
            bind: false,
            linger: 0,
            recv_timeout: 0,
            ..Default::default()
        };

        let mut chan = Self {
            name: name.to_string(),
            ctx: ctx.clone(),
            socket_type: zmq::SUB,
            options,
            endpoint: endpoint.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            socket: None,
        };
        chan.open()?;

        Ok(chan)
    }

    fn open(&mut self) -> Result<(), ChannelError> {
        // Drop any existing socket first so a bound endpoint is released
        self.socket = None;

        let socket = MonitoredSocket::new(
            &self.ctx,
            self.socket_type,
            self.options,
            &self.endpoint
        ).map_err(ChannelError::SocketError)?;

        for topic in self.topics.iter() {
            socket.set_subscribe(topic.as_bytes())
                .map_err(|e| ChannelError::SubscribeError(topic.clone(), e))?;
        }

        self.socket = Some(socket);

        Ok(())
    }
}

impl MessageChannel for ZmqChannel {
    fn send(&mut self, frame: &str) -> Result<(), ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::NotOpen)?;

        socket.send(frame, zmq::DONTWAIT)
            .map_err(ChannelError::SendError)
    }

    fn try_receive(&mut self) -> Result<Option<String>, ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::NotOpen)?;

        match socket.recv_string(zmq::DONTWAIT) {
            Ok(Ok(s)) => Ok(Some(s)),
            Ok(Err(_)) => Err(ChannelError::NonUtf8Frame),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(ChannelError::RecvError(e))
        }
    }

    fn reconnect(&mut self) -> Result<(), ChannelError> {
        debug!("Reconnecting {} to {}", self.name, self.endpoint);
        self.open()
    }

    fn is_connected(&self) -> bool {
        match self.socket {
            Some(ref s) => self.options.bind || s.connected(),
            None => false
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl MemoryChannel {
    /// Create a connected pair of channels. Frames sent on one end are received on the other.
    pub fn pair(name_a: &str, name_b: &str) -> (Self, Self) {
        let (tx_ab, rx_ab) = unbounded();
        let (tx_ba, rx_ba) = unbounded();
        let link = MemoryLink::new();

        let a = Self {
            name: name_a.to_string(),
            tx: tx_ab,
            rx: rx_ba,
            topics: Vec::new(),
            link: link.clone(),
        };
        let b = Self {
            name: name_b.to_string(),
            tx: tx_ba,
            rx: rx_ab,
            topics: Vec::new(),
            link,
        };

        (a, b)
    }

    /// Only accept frames starting with one of the given topics, like a ZMQ subscriber.
    pub fn with_topics(mut self, topics: &[&str]) -> Self {
        self.topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Get a handle on the link shared by both ends.
    pub fn link(&self) -> MemoryLink {
        self.link.clone()
    }

    fn accepts(&self, frame: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| frame.starts_with(t.as_str()))
    }
}

impl MessageChannel for MemoryChannel {
    fn send(&mut self, frame: &str) -> Result<(), ChannelError> {
        if !self.link.is_up() {
            return Err(ChannelError::LinkDown)
        }

        self.tx.send(frame.to_string())
            .map_err(|_| ChannelError::LinkDown)
    }

    fn try_receive(&mut self) -> Result<Option<String>, ChannelError> {
        if !self.link.is_up() {
            return Err(ChannelError::LinkDown)
        }

        loop {
            match self.rx.try_recv() {
                Ok(f) if self.accepts(&f) => return Ok(Some(f)),
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(ChannelError::LinkDown)
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), ChannelError> {
        self.link.reconnects.fetch_add(1, Ordering::Relaxed);

        match self.link.is_up() {
            true => Ok(()),
            false => Err(ChannelError::LinkDown)
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_up()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl MemoryLink {
    fn new() -> Self {
        Self {
            up: Arc::new(AtomicBool::new(true)),
            reconnects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bring the link up or down.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    /// Number of reconnect attempts made by either end.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}
