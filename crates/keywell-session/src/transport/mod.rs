//! Transport boundary between the driver and the network.
//!
//! The session never touches sockets; the driver executes its `Send` actions
//! through a [`Transport`] and feeds [`TransportEvent`]s back in. Production
//! backends wrap a real peer-to-peer stack. [`MemoryTransport`] wires
//! sessions together in process for tests and simulations.

mod memory;

pub use memory::{MemoryHub, MemoryTransport};

use async_trait::async_trait;
use keywell_core::PeerId;
use thiserror::Error;

use crate::event::{Delivery, TransportStatus};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Events a transport surfaces to the driver.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The link changed state.
    Status(TransportStatus),
    /// A peer became reachable.
    PeerConnected {
        /// Peer that joined.
        peer: PeerId,
    },
    /// A peer stopped being reachable.
    PeerDisconnected {
        /// Peer that left.
        peer: PeerId,
    },
    /// Raw envelope bytes arrived. The session decodes and validates them.
    Envelope {
        /// Peer the transport attributes the bytes to.
        from: PeerId,
        /// Undecoded wire bytes.
        bytes: Vec<u8>,
    },
}

/// Network backend the driver drives.
///
/// `recv` is cancel-safe: the driver polls it inside `tokio::select!`
/// alongside its command mailbox. Returning `None` means the transport shut
/// down and the driver stops.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Begins looking for peers. Status and peer events follow via `recv`.
    async fn start_discovery(&mut self) -> Result<(), TransportError>;

    /// Stops looking for peers and drops current links.
    async fn stop_discovery(&mut self) -> Result<(), TransportError>;

    /// Peers currently reachable.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Delivers encoded envelope bytes to one peer or to everyone reachable.
    async fn send(&mut self, to: Delivery, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Waits for the next transport event.
    async fn recv(&mut self) -> Option<TransportEvent>;
}
