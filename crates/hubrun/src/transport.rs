//! # Transport Abstraction
//!
//! The capability a hub needs from the network: send bytes to a peer (or to all
//! peers), and be told when bytes arrive or peers come and go.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: A transport knows nothing about frames, targets or serializers.
//!   It moves opaque buffers.
//! - **Transport-Driven Scheduling**: the transport decides on which task or thread
//!   the delegate callbacks run, following the `RequestHandling` it was initialised with.
//!   Hubs never spawn their own worker pools.

pub mod memory;

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::config::RequestHandling;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The client has no established connection.
    #[error("not connected")]
    NotConnected,
    /// No connected peer carries this id.
    #[error("unknown peer {0}")]
    UnknownPeer(i32),
    /// The remote end refused the connection (wrong key, not listening).
    #[error("connection rejected: {0}")]
    Rejected(String),
    /// The operation timed out.
    #[error("transport timed out")]
    Timeout,
    /// The transport was used before `init` or after `dispose`.
    #[error("transport is not initialised")]
    Uninitialised,
    /// Generic I/O error or internal transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Delivery guarantee requested for one send.
///
/// The numeric values are part of the wire contract with existing transports.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMode {
    ReliableUnordered = 0,
    Sequenced = 1,
    ReliableOrdered = 2,
    ReliableSequenced = 3,
    Unreliable = 4,
}

impl DeliveryMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::ReliableUnordered),
            1 => Some(Self::Sequenced),
            2 => Some(Self::ReliableOrdered),
            3 => Some(Self::ReliableSequenced),
            4 => Some(Self::Unreliable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Identity of a connected peer, as assigned by the transport.
#[derive(Clone)]
pub struct PeerInfo {
    pub peer_id: i32,
    pub remote_endpoint: Option<SocketAddr>,
    /// Transport-specific connection handle.
    pub connection: Option<Arc<dyn Any + Send + Sync>>,
}

impl PeerInfo {
    pub fn new(peer_id: i32) -> Self {
        Self { peer_id, remote_endpoint: None, connection: None }
    }

    pub fn with_endpoint(mut self, endpoint: SocketAddr) -> Self {
        self.remote_endpoint = Some(endpoint);
        self
    }

    /// The peer id used for an attached in-process hub.
    pub fn local() -> Self {
        Self::new(crate::LOCAL_PEER_ID)
    }

    pub fn is_local(&self) -> bool {
        self.peer_id == crate::LOCAL_PEER_ID
    }
}

impl fmt::Debug for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerInfo")
            .field("peer_id", &self.peer_id)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("connection", &self.connection.is_some())
            .finish()
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_endpoint {
            Some(addr) => write!(f, "peer {} ({})", self.peer_id, addr),
            None => write!(f, "peer {}", self.peer_id),
        }
    }
}

/// Callbacks a server transport drives.
#[async_trait::async_trait]
pub trait ServerDelegate: Send + Sync {
    fn on_peer_connected(&self, peer: &PeerInfo);
    fn on_peer_disconnected(&self, peer: &PeerInfo);
    async fn on_data_received(&self, peer: PeerInfo, data: Vec<u8>);
}

/// Callbacks a client transport drives.
#[async_trait::async_trait]
pub trait ClientDelegate: Send + Sync {
    fn on_connected(&self);
    fn on_disconnected(&self);
    async fn on_data_received(&self, data: Vec<u8>);
}

/// Settings handed to a client transport at `init`.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub strategy: RequestHandling,
}

/// The accepting side of a connection-oriented transport.
///
/// This trait is designed to be object-safe (`Arc<dyn ServerTransport>`).
pub trait ServerTransport: Send + Sync + 'static {
    /// Binds the delegate. The transport must not keep the hub alive, hence `Weak`.
    fn init(&self, delegate: Weak<dyn ServerDelegate>, strategy: RequestHandling) -> Result<()>;

    fn listen(&self, port: u16, key: &str) -> Result<()>;

    fn listen_on(&self, ipv4: &str, ipv6: &str, port: u16, key: &str) -> Result<()>;

    /// Sends to one peer, or to every connected peer when `peer_id` is `None`.
    ///
    /// Enqueues and returns; never waits for the remote side.
    fn send(&self, peer_id: Option<i32>, mode: DeliveryMode, data: &[u8]) -> Result<()>;

    /// Runs queued deliveries on the calling thread (manual handling only).
    fn process_requests(&self);

    fn dispose(&self);
}

/// The connecting side of a connection-oriented transport.
#[async_trait::async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    fn init(&self, delegate: Weak<dyn ClientDelegate>, options: ClientOptions) -> Result<()>;

    fn connection_state(&self) -> ConnectionState;

    async fn connect(&self, address: &str, port: u16, key: &str) -> Result<()>;

    fn send(&self, mode: DeliveryMode, data: &[u8]) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn process_requests(&self);

    fn dispose(&self);
}
