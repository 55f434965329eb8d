//! Keywell peer-to-peer session layer.
//!
//! One identity's end of the protocol: a [`P2pSession`] that owns the local
//! [`KeyPool`](keywell_core::KeyPool), tracks per-peer remote keyrings, and
//! runs the five-message key exchange, plus the Tokio [`SessionDriver`] that
//! connects it to a transport and a store.
//!
//! # Architecture
//!
//! The session follows the same Sans-IO shape as the core: events in through
//! [`P2pSession::handle`], [`SessionAction`]s out, all I/O in the driver.
//! Everything observable is deterministic given the event order and the
//! [`Environment`](keywell_core::Environment), which is what the end-to-end
//! tests rely on.
//!
//! # Components
//!
//! - [`P2pSession`]: single-writer orchestrator over pool, peers, exchanges
//! - [`KeyExchange`]: per-peer handshake state machine
//! - [`RemoteKeyring`]: FIFO ring of one-time keys a peer handed us
//! - [`SessionDriver`] / [`SessionHandle`]: Tokio actor and its mailbox
//! - [`transport`]: network boundary, with an in-process hub for tests
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod driver;
mod error;
mod event;
mod exchange;
mod keyring;
mod session;
mod system_env;
pub mod transport;

pub use driver::{IncomingMessage, SessionDriver, SessionHandle};
pub use error::SessionError;
pub use event::{
    Delivery, KeyPoolStats, LinkState, LogLevel, SessionAction, SessionEvent, SessionNotice,
    TransportStatus,
};
pub use exchange::{ExchangeConfig, ExchangeError, ExchangeState, KeyExchange};
pub use keyring::RemoteKeyring;
pub use session::{P2pSession, SessionConfig};
pub use system_env::SystemEnv;
pub use transport::{MemoryHub, MemoryTransport, Transport, TransportError, TransportEvent};
