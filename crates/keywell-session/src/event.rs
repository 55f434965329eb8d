//! Session events, actions, and notices.

use keywell_core::{PeerId, StoredPool, StreamId, store::SentRecord};
use keywell_proto::Envelope;

use crate::error::SessionError;

/// Events the caller feeds into the session.
///
/// The caller is responsible for:
/// - Receiving envelope bytes from the transport
/// - Driving time forward via ticks
/// - Forwarding application intents (send, regenerate, exchange keys)
///
/// Generic over `I` (Instant type) to support both production
/// (std::time::Instant) and simulation environments.
#[derive(Debug, Clone)]
pub enum SessionEvent<I = std::time::Instant> {
    /// Application wants to bring the link up.
    Connect,

    /// Application wants to tear the link down.
    ///
    /// Stops discovery and fails in-flight exchanges. Exchanged key
    /// material is kept for the next link.
    Disconnect,

    /// Transport reported a link state change.
    TransportStatus(TransportStatus),

    /// A peer became reachable.
    PeerConnected {
        /// The peer that connected.
        peer: PeerId,
    },

    /// A peer went away.
    PeerDisconnected {
        /// The peer that disconnected.
        peer: PeerId,
    },

    /// Application wants to send on a shared stream.
    SendMessage {
        /// Target stream.
        stream: StreamId,
        /// Message plaintext.
        plaintext: Vec<u8>,
    },

    /// Application wants to send to one peer using its exchanged keys.
    SendDirect {
        /// Target peer.
        peer: PeerId,
        /// Message plaintext.
        plaintext: Vec<u8>,
    },

    /// Envelope bytes received from the transport.
    EnvelopeReceived {
        /// Transport-level sender.
        from: PeerId,
        /// Raw wire bytes, not yet decoded.
        bytes: Vec<u8>,
    },

    /// Application wants the pool replenished.
    RegenerateKeys {
        /// Regenerate even when the pool is above its low-water mark.
        force: bool,
    },

    /// Application wants to run a key exchange with a peer.
    BeginKeyExchange {
        /// Peer to exchange with.
        peer: PeerId,
        /// One-time keys to request, 1 to 256.
        count: u16,
    },

    /// Time tick for timeout processing.
    ///
    /// The caller should send ticks periodically so in-flight exchanges
    /// can detect unresponsive peers.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// Actions the session produces for the caller to execute.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Send an envelope over the transport.
    Send {
        /// Unicast or broadcast.
        to: Delivery,
        /// The envelope to put on the wire.
        envelope: Envelope,
    },

    /// Deliver decrypted plaintext to the application layer.
    DeliverMessage {
        /// Identity that sealed the message.
        from: PeerId,
        /// Stream it arrived on (0 for direct messages).
        stream: StreamId,
        /// Decrypted plaintext.
        plaintext: Vec<u8>,
    },

    /// Persist the pool snapshot.
    ///
    /// The caller decides the storage backend. Failures are reported as
    /// `PersistenceFailed` notices and never abort the session.
    PersistPool(StoredPool),

    /// Append one send audit record.
    RecordSent(SentRecord),

    /// Publish a notice on the observable stream.
    Notify(SessionNotice),

    /// Ask the transport to start peer discovery.
    StartDiscovery,

    /// Ask the transport to stop peer discovery.
    StopDiscovery,

    /// Log message for diagnostics.
    Log {
        /// Severity the driver should log at.
        level: LogLevel,
        /// Log message.
        message: String,
    },
}

/// Severity for [`SessionAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Verbose diagnostics.
    Debug,
    /// Normal operational events.
    Info,
    /// Unexpected but recoverable situations.
    Warn,
    /// Failures worth operator attention.
    Error,
}

/// Observable session updates, published as a single tagged union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The connection state moved.
    ConnectionChanged(LinkState),

    /// The local pool's fill level changed.
    KeyStatusChanged(KeyPoolStats),

    /// A key exchange finished and installed remote keys.
    ExchangeCompleted {
        /// Peer the exchange ran with.
        peer: PeerId,
        /// Keys installed into the peer's keyring.
        installed: usize,
    },

    /// A key exchange failed.
    ExchangeFailed {
        /// Peer the exchange ran with.
        peer: PeerId,
        /// Failure reason, preserved from the state machine.
        reason: String,
    },

    /// An operation failed and the error was routed to observers.
    ErrorOccurred(SessionError),
}

/// Connection state as the application sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// No link, no discovery running.
    Disconnected,
    /// Discovery running, no peers yet.
    Searching,
    /// A peer was found, link setup in progress.
    Connecting,
    /// Link established.
    Connected {
        /// Number of reachable peers.
        peers: usize,
    },
    /// The link failed.
    Failed {
        /// Transport-reported reason.
        reason: String,
    },
}

/// Link state as the transport reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// Transport constructed but not started.
    Idle,
    /// Discovery in progress.
    Searching,
    /// Connecting to a discovered peer.
    Connecting,
    /// At least one peer reachable.
    Connected {
        /// Number of reachable peers.
        peers: usize,
    },
    /// Transport failure.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

/// Addressing for an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every connected peer.
    Broadcast,
    /// One specific peer.
    Peer(PeerId),
}

/// Fill level of the local key pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPoolStats {
    /// Live pairs right now.
    pub current: usize,
    /// Maximum the pool may hold.
    pub capacity: usize,
    /// Below this, regeneration is mandatory.
    pub min_threshold: usize,
    /// Fill level regeneration aims for.
    pub target: usize,
}
