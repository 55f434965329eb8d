//! Per-peer key exchange state machine.
//!
//! A five-message handshake moves batches of one-time public keys between
//! two peers: `KeyRequest` → `KeyOffer` → `KeyAck` → `KeyConfirm` →
//! `KeyCommit`. The machine here is pure state: it consumes decoded
//! payloads and produces reply payloads, while the session supplies key
//! batches and executes sends. Pending key material is held inside the
//! machine and released exactly once, at [`ExchangeState::Completed`].
//!
//! Each attempt carries a random exchange id. Every incoming leg is checked
//! against it, so replays from an earlier attempt cannot splice into a live
//! one.

use std::{ops::Sub, time::Duration};

use keywell_core::PeerId;
use keywell_proto::{
    Opcode,
    payloads::exchange::{KeyAck, KeyCommit, KeyConfirm, KeyOffer, KeyRequest},
};
use thiserror::Error;

/// Default patience for an unresponsive peer.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for exchange attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// A non-terminal exchange with no progress for this long fails.
    pub timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

/// Where an exchange attempt currently stands.
///
/// The initiator walks `Idle → RequestSent → OfferReceived → AckSent →
/// CommitSent → Completed`; the responder walks `Idle → RequestReceived →
/// OfferSent → AckReceived → Completed`. `Completed` and `Failed` are
/// terminal: the machine never leaves them except through a fresh
/// [`KeyExchange::initiate`] or [`KeyExchange::on_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    /// Constructed, nothing sent or received yet.
    Idle,
    /// Initiator sent `KeyRequest`, awaiting the offer.
    RequestSent,
    /// Responder received `KeyRequest`, offer not yet sent.
    RequestReceived,
    /// Responder sent `KeyOffer`, awaiting the ack.
    OfferSent,
    /// Initiator received the offer, reciprocal batch not yet sent.
    OfferReceived,
    /// Initiator sent `KeyAck`, awaiting confirmation.
    AckSent,
    /// Responder received the ack and confirmed, awaiting commit.
    AckReceived,
    /// Initiator sent `KeyCommit`, finalization pending.
    CommitSent,
    /// Both batches delivered and installed.
    Completed,
    /// Attempt aborted; nothing was installed.
    Failed {
        /// Why the attempt died.
        reason: String,
    },
}

impl ExchangeState {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Short name for log and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::RequestSent => "RequestSent",
            Self::RequestReceived => "RequestReceived",
            Self::OfferSent => "OfferSent",
            Self::OfferReceived => "OfferReceived",
            Self::AckSent => "AckSent",
            Self::AckReceived => "AckReceived",
            Self::CommitSent => "CommitSent",
            Self::Completed => "Completed",
            Self::Failed { .. } => "Failed",
        }
    }
}

/// Errors from driving the exchange machine.
///
/// Errors caused by the remote side (unexpected opcode, id mismatch, bound
/// violation) also move the machine to [`ExchangeState::Failed`]. Errors
/// caused by the local caller (`AlreadyActive`, invalid local batch) leave
/// the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// A non-terminal attempt is already running with this peer.
    #[error("key exchange already active with this peer")]
    AlreadyActive,

    /// Message arrived in a state that does not expect it.
    #[error("unexpected {opcode:?} in state {state}")]
    Unexpected {
        /// Opcode of the offending message or local call.
        opcode: Opcode,
        /// State the machine was in.
        state: &'static str,
    },

    /// Message referenced a different exchange attempt.
    #[error("exchange id mismatch: expected {expected:#018x}, got {got:#018x}")]
    IdMismatch {
        /// Id of the running attempt.
        expected: u64,
        /// Id the message carried.
        got: u64,
    },

    /// Key batch or requested count violated protocol bounds.
    #[error("invalid key batch: {reason}")]
    InvalidBatch {
        /// What was out of bounds.
        reason: String,
    },
}

/// State machine for one peer's key exchange.
///
/// Generic over the environment's instant type so timeouts run on virtual
/// time in tests. The machine is sans-IO: callers feed decoded payloads in
/// and put returned payloads on the wire.
#[derive(Debug, Clone)]
pub struct KeyExchange<I = std::time::Instant> {
    peer: PeerId,
    config: ExchangeConfig,
    state: ExchangeState,
    exchange: u64,
    /// Keys from the peer, held back until `Completed`.
    pending: Vec<[u8; 32]>,
    /// Instant of the last accepted transition; `tick` measures from here.
    last_activity: I,
}

impl<I: Copy> KeyExchange<I> {
    /// Fresh machine in `Idle`.
    pub fn new(peer: PeerId, config: ExchangeConfig, now: I) -> Self {
        Self { peer, config, state: ExchangeState::Idle, exchange: 0, pending: Vec::new(), last_activity: now }
    }

    /// Peer this machine talks to.
    #[must_use]
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// Id of the current attempt. Zero until the first attempt starts.
    #[must_use]
    pub fn exchange_id(&self) -> u64 {
        self.exchange
    }

    /// True once the attempt can no longer make progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Starts a new attempt as initiator.
    ///
    /// Allowed from `Idle` and from the terminal states; a running attempt
    /// is not interrupted.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::AlreadyActive`] while an attempt is in flight
    /// - [`ExchangeError::InvalidBatch`] when `count` is out of bounds
    pub fn initiate(&mut self, exchange: u64, count: u16, now: I) -> Result<KeyRequest, ExchangeError> {
        if !matches!(self.state, ExchangeState::Idle) && !self.state.is_terminal() {
            return Err(ExchangeError::AlreadyActive);
        }

        let request = KeyRequest { exchange, count };
        request.validate().map_err(|e| ExchangeError::InvalidBatch { reason: e.to_string() })?;

        self.reset(exchange);
        self.transition(ExchangeState::RequestSent, now);
        Ok(request)
    }

    /// Handles an incoming `KeyRequest`, becoming the responder.
    ///
    /// Returns the number of keys to offer. The caller generates that many
    /// pairs and passes their publics to [`KeyExchange::offer`].
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::AlreadyActive`] while an attempt is in flight (the
    ///   running attempt survives)
    /// - [`ExchangeError::InvalidBatch`] for an out-of-bounds count (fails
    ///   the machine)
    pub fn on_request(&mut self, request: &KeyRequest, now: I) -> Result<u16, ExchangeError> {
        if !matches!(self.state, ExchangeState::Idle) && !self.state.is_terminal() {
            return Err(ExchangeError::AlreadyActive);
        }

        self.reset(request.exchange);
        if let Err(e) = request.validate() {
            return Err(self.fail_with(ExchangeError::InvalidBatch { reason: e.to_string() }));
        }

        self.transition(ExchangeState::RequestReceived, now);
        Ok(request.count)
    }

    /// Sends the responder's key batch.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::Unexpected`] outside `RequestReceived`
    /// - [`ExchangeError::InvalidBatch`] for an empty or oversized batch
    ///
    /// Both leave the state untouched; the batch comes from the local pool,
    /// so a bad one is a caller bug, not peer misbehavior.
    pub fn offer(&mut self, keys: Vec<[u8; 32]>, now: I) -> Result<KeyOffer, ExchangeError> {
        if !matches!(self.state, ExchangeState::RequestReceived) {
            return Err(self.unexpected(Opcode::KeyOffer));
        }

        let offer = KeyOffer { exchange: self.exchange, keys };
        offer.validate().map_err(|e| ExchangeError::InvalidBatch { reason: e.to_string() })?;

        self.transition(ExchangeState::OfferSent, now);
        Ok(offer)
    }

    /// Handles the responder's offer.
    ///
    /// The offered keys are held pending. Returns how many arrived; the
    /// caller answers with a reciprocal batch of the same size via
    /// [`KeyExchange::ack`].
    ///
    /// # Errors
    ///
    /// All of these fail the machine:
    ///
    /// - [`ExchangeError::Unexpected`] outside `RequestSent`
    /// - [`ExchangeError::IdMismatch`] for a foreign exchange id
    /// - [`ExchangeError::InvalidBatch`] for an out-of-bounds batch
    pub fn on_offer(&mut self, offer: &KeyOffer, now: I) -> Result<usize, ExchangeError> {
        if !matches!(self.state, ExchangeState::RequestSent) {
            return Err(self.unexpected(Opcode::KeyOffer));
        }
        self.check_id(offer.exchange)?;
        if let Err(e) = offer.validate() {
            return Err(self.fail_with(ExchangeError::InvalidBatch { reason: e.to_string() }));
        }

        self.pending = offer.keys.clone();
        self.transition(ExchangeState::OfferReceived, now);
        Ok(self.pending.len())
    }

    /// Sends the initiator's reciprocal key batch.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::Unexpected`] outside `OfferReceived`
    /// - [`ExchangeError::InvalidBatch`] for an empty or oversized batch
    ///
    /// Both leave the state untouched.
    pub fn ack(&mut self, keys: Vec<[u8; 32]>, now: I) -> Result<KeyAck, ExchangeError> {
        if !matches!(self.state, ExchangeState::OfferReceived) {
            return Err(self.unexpected(Opcode::KeyAck));
        }

        let ack = KeyAck { exchange: self.exchange, keys };
        ack.validate().map_err(|e| ExchangeError::InvalidBatch { reason: e.to_string() })?;

        self.transition(ExchangeState::AckSent, now);
        Ok(ack)
    }

    /// Handles the initiator's reciprocal batch.
    ///
    /// The acked keys are held pending; the returned `KeyConfirm` goes back
    /// to the initiator.
    ///
    /// # Errors
    ///
    /// All of these fail the machine:
    ///
    /// - [`ExchangeError::Unexpected`] outside `OfferSent`
    /// - [`ExchangeError::IdMismatch`] for a foreign exchange id
    /// - [`ExchangeError::InvalidBatch`] for an out-of-bounds batch
    pub fn on_ack(&mut self, ack: &KeyAck, now: I) -> Result<KeyConfirm, ExchangeError> {
        if !matches!(self.state, ExchangeState::OfferSent) {
            return Err(self.unexpected(Opcode::KeyAck));
        }
        self.check_id(ack.exchange)?;
        if let Err(e) = ack.validate() {
            return Err(self.fail_with(ExchangeError::InvalidBatch { reason: e.to_string() }));
        }

        self.pending = ack.keys.clone();
        self.transition(ExchangeState::AckReceived, now);

        #[allow(clippy::cast_possible_truncation)] // validate() bounds the list to 256
        Ok(KeyConfirm { exchange: self.exchange, accepted: self.pending.len() as u16 })
    }

    /// Handles the responder's confirmation.
    ///
    /// Returns the `KeyCommit` to send. The caller sends it, then calls
    /// [`KeyExchange::finalize`] to install the pending keys.
    ///
    /// # Errors
    ///
    /// Both fail the machine:
    ///
    /// - [`ExchangeError::Unexpected`] outside `AckSent`
    /// - [`ExchangeError::IdMismatch`] for a foreign exchange id
    pub fn on_confirm(&mut self, confirm: &KeyConfirm, now: I) -> Result<KeyCommit, ExchangeError> {
        if !matches!(self.state, ExchangeState::AckSent) {
            return Err(self.unexpected(Opcode::KeyConfirm));
        }
        self.check_id(confirm.exchange)?;

        self.transition(ExchangeState::CommitSent, now);
        Ok(KeyCommit { exchange: self.exchange })
    }

    /// Completes the initiator side, releasing the peer's offered keys.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::Unexpected`] outside `CommitSent` (state
    ///   untouched)
    pub fn finalize(&mut self, now: I) -> Result<Vec<[u8; 32]>, ExchangeError> {
        if !matches!(self.state, ExchangeState::CommitSent) {
            return Err(self.unexpected(Opcode::KeyCommit));
        }

        self.transition(ExchangeState::Completed, now);
        Ok(std::mem::take(&mut self.pending))
    }

    /// Handles the initiator's commit, releasing the acked keys.
    ///
    /// # Errors
    ///
    /// Both fail the machine:
    ///
    /// - [`ExchangeError::Unexpected`] outside `AckReceived`
    /// - [`ExchangeError::IdMismatch`] for a foreign exchange id
    pub fn on_commit(&mut self, commit: &KeyCommit, now: I) -> Result<Vec<[u8; 32]>, ExchangeError> {
        if !matches!(self.state, ExchangeState::AckReceived) {
            return Err(self.unexpected(Opcode::KeyCommit));
        }
        self.check_id(commit.exchange)?;

        self.transition(ExchangeState::Completed, now);
        Ok(std::mem::take(&mut self.pending))
    }

    /// Aborts a non-terminal attempt. No effect on terminal states, so the
    /// original failure reason survives stray late calls.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = ExchangeState::Failed { reason: reason.into() };
            self.pending.clear();
        }
    }

    fn reset(&mut self, exchange: u64) {
        self.exchange = exchange;
        self.pending.clear();
    }

    fn transition(&mut self, next: ExchangeState, now: I) {
        self.state = next;
        self.last_activity = now;
    }

    /// Wrong-opcode error for remote messages: poisons the machine unless it
    /// already reached a terminal state.
    fn unexpected(&mut self, opcode: Opcode) -> ExchangeError {
        let err = ExchangeError::Unexpected { opcode, state: self.state.name() };
        if !self.state.is_terminal() {
            self.fail(err.to_string());
        }
        err
    }

    fn fail_with(&mut self, err: ExchangeError) -> ExchangeError {
        self.fail(err.to_string());
        err
    }

    fn check_id(&mut self, got: u64) -> Result<(), ExchangeError> {
        if got == self.exchange {
            return Ok(());
        }
        Err(self.fail_with(ExchangeError::IdMismatch { expected: self.exchange, got }))
    }
}

impl<I: Copy + Sub<Output = Duration>> KeyExchange<I> {
    /// Fails the attempt when it has sat without progress past the timeout.
    ///
    /// Returns `true` when this call moved the machine to `Failed`. Terminal
    /// states never time out.
    pub fn tick(&mut self, now: I) -> bool {
        if self.state.is_terminal() || matches!(self.state, ExchangeState::Idle) {
            return false;
        }
        if now - self.last_activity >= self.config.timeout {
            self.fail("timed out waiting for peer");
            return true;
        }
        false
    }
}
