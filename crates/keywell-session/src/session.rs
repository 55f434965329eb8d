//! Single-writer session orchestrator.
//!
//! `P2pSession` owns one identity's key pool, its per-peer keyrings, and its
//! per-peer exchange machines. All mutation flows through
//! [`P2pSession::handle`]: events go in, a list of [`SessionAction`]s comes
//! out, and the caller (normally [`crate::SessionDriver`]) executes them.
//! The session itself performs no I/O, which is what makes the end-to-end
//! tests deterministic.
//!
//! Error routing follows the direction of the event. Command events
//! (sends, exchanges, regeneration) return `Err` to the caller. Transport
//! events never fail the session: malformed or foreign traffic turns into
//! log actions and notices, and an envelope sealed for somebody else is
//! dropped without a trace beyond a debug line.

use std::collections::HashMap;

use keywell_core::{
    AccessScope, Environment, KeyPool, PeerId, PoolCodecError, RegenerationPlan, ReplenishPolicy,
    ServiceError, StreamId,
    service::{decrypt_one_time, encrypt_direct, encrypt_one_time},
    store::{SentRecord, StoredPool},
};
use keywell_proto::{
    Curve, Envelope, EnvelopeHeader, Opcode,
    payloads::{
        ErrorInfo, Payload,
        exchange::{KeyAck, KeyCommit, KeyConfirm, KeyOffer, KeyRequest},
    },
};

use crate::{
    error::SessionError,
    event::{
        Delivery, KeyPoolStats, LinkState, LogLevel, SessionAction, SessionEvent, SessionNotice,
        TransportStatus,
    },
    exchange::{ExchangeConfig, ExchangeError, ExchangeState, KeyExchange},
    keyring::{KEYRING_LOW_WATER, RemoteKeyring},
};

/// Default largest plaintext accepted for a single send.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default pool capacity.
const DEFAULT_CAPACITY: usize = 8192;

/// Session tunables.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Local pool capacity. Ignored when a restored pool is supplied.
    pub capacity: usize,
    /// Replenishment watermarks for the local pool.
    pub policy: ReplenishPolicy,
    /// Key exchange timeout configuration.
    pub exchange: ExchangeConfig,
    /// Largest plaintext accepted by the send paths.
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: ReplenishPolicy::default(),
            exchange: ExchangeConfig::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Everything the session tracks about one peer.
#[derive(Debug)]
struct PeerState<I> {
    /// Current or most recent exchange attempt.
    exchange: Option<KeyExchange<I>>,
    /// One-time public keys the peer handed us through exchanges.
    keyring: RemoteKeyring,
}

impl<I> Default for PeerState<I> {
    fn default() -> Self {
        Self { exchange: None, keyring: RemoteKeyring::new() }
    }
}

/// One identity's end of the protocol.
///
/// Single writer: only `handle` mutates, so every state change is totally
/// ordered by event arrival. The driver serializes concurrent callers
/// through its command mailbox.
pub struct P2pSession<E: Environment> {
    env: E,
    identity: PeerId,
    config: SessionConfig,
    pool: KeyPool,
    link: LinkState,
    peers: HashMap<PeerId, PeerState<E::Instant>>,
}

impl<E: Environment> P2pSession<E> {
    /// Builds a session, creating or adopting the key pool.
    ///
    /// With `restored: None` a fresh pool is generated up to the policy's
    /// high-water target and the returned actions include the first
    /// `PersistPool`. A restored pool is adopted as-is; its recorded
    /// capacity and curve win over `config.capacity`.
    pub fn new(
        env: E,
        identity: PeerId,
        config: SessionConfig,
        restored: Option<KeyPool>,
    ) -> (Self, Vec<SessionAction>) {
        let mut actions = Vec::new();
        let fresh = restored.is_none();

        let pool = match restored {
            Some(pool) => {
                actions.push(SessionAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "restored key pool: {} of {} pairs",
                        pool.len(),
                        pool.capacity()
                    ),
                });
                pool
            },
            None => {
                let mut pool = KeyPool::new(config.capacity, Curve::X25519);
                let target = config.policy.target(pool.capacity());
                pool.generate(target, &env);
                actions.push(SessionAction::Log {
                    level: LogLevel::Info,
                    message: format!("generated fresh key pool with {} pairs", pool.len()),
                });
                pool
            },
        };

        let session = Self {
            env,
            identity,
            config,
            pool,
            link: LinkState::Disconnected,
            peers: HashMap::new(),
        };

        if fresh {
            session.push_persist(&mut actions);
            actions.push(SessionAction::Notify(SessionNotice::KeyStatusChanged(
                session.key_stats(),
            )));
        }

        (session, actions)
    }

    /// Identity this session seals as.
    #[must_use]
    pub fn identity(&self) -> PeerId {
        self.identity
    }

    /// Link state as last reported.
    #[must_use]
    pub fn link(&self) -> &LinkState {
        &self.link
    }

    /// Current pool fill level against the policy thresholds.
    #[must_use]
    pub fn key_stats(&self) -> KeyPoolStats {
        let capacity = self.pool.capacity();
        KeyPoolStats {
            current: self.pool.len(),
            capacity,
            min_threshold: self.config.policy.min_threshold(capacity),
            target: self.config.policy.target(capacity),
        }
    }

    /// Serializes the pool for persistence, for example at shutdown.
    ///
    /// # Errors
    ///
    /// - [`PoolCodecError`] if snapshot encoding fails
    pub fn snapshot(&self) -> Result<StoredPool, PoolCodecError> {
        Ok(StoredPool {
            bytes: self.pool.to_bytes()?,
            curve: self.pool.curve(),
            capacity: self.pool.capacity() as u64,
        })
    }

    /// Applies one event and returns the actions to execute.
    ///
    /// # Errors
    ///
    /// Command events return the session error taxonomy directly; see the
    /// individual variants of [`SessionError`]. Transport-driven events
    /// (`EnvelopeReceived`, status changes, ticks) are infallible.
    pub fn handle(
        &mut self,
        event: SessionEvent<E::Instant>,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match event {
            SessionEvent::Connect => Ok(self.handle_connect()),
            SessionEvent::Disconnect => Ok(self.handle_disconnect()),
            SessionEvent::TransportStatus(status) => Ok(self.handle_transport_status(status)),
            SessionEvent::PeerConnected { peer } => Ok(self.handle_peer_connected(peer)),
            SessionEvent::PeerDisconnected { peer } => Ok(self.handle_peer_disconnected(peer)),
            SessionEvent::SendMessage { stream, plaintext } => {
                self.handle_send_message(stream, &plaintext)
            },
            SessionEvent::SendDirect { peer, plaintext } => {
                self.handle_send_direct(peer, &plaintext)
            },
            SessionEvent::EnvelopeReceived { from, bytes } => {
                Ok(self.handle_envelope(from, &bytes))
            },
            SessionEvent::RegenerateKeys { force } => Ok(self.handle_regenerate(force)),
            SessionEvent::BeginKeyExchange { peer, count } => {
                self.handle_begin_exchange(peer, count)
            },
            SessionEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    fn handle_connect(&mut self) -> Vec<SessionAction> {
        if !matches!(self.link, LinkState::Disconnected | LinkState::Failed { .. }) {
            return vec![SessionAction::Log {
                level: LogLevel::Debug,
                message: format!("connect ignored, link already {:?}", self.link),
            }];
        }

        let mut actions = vec![SessionAction::StartDiscovery];
        self.set_link(LinkState::Searching, &mut actions);
        actions.push(SessionAction::Log {
            level: LogLevel::Info,
            message: "starting peer discovery".to_string(),
        });
        actions
    }

    fn handle_disconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::StopDiscovery];
        self.fail_all_exchanges("peer disconnected", &mut actions);
        self.set_link(LinkState::Disconnected, &mut actions);
        actions.push(SessionAction::Log {
            level: LogLevel::Info,
            message: "session disconnected".to_string(),
        });
        actions
    }

    fn handle_transport_status(&mut self, status: TransportStatus) -> Vec<SessionAction> {
        let next = match status {
            TransportStatus::Idle => LinkState::Disconnected,
            TransportStatus::Searching => LinkState::Searching,
            TransportStatus::Connecting => LinkState::Connecting,
            TransportStatus::Connected { peers } => LinkState::Connected { peers },
            TransportStatus::Failed { reason } => LinkState::Failed { reason },
        };

        let mut actions = Vec::new();
        self.set_link(next, &mut actions);
        actions
    }

    fn handle_peer_connected(&mut self, peer: PeerId) -> Vec<SessionAction> {
        self.peers.entry(peer).or_default();
        vec![SessionAction::Log {
            level: LogLevel::Info,
            message: format!("peer {peer} connected"),
        }]
    }

    fn handle_peer_disconnected(&mut self, peer: PeerId) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::Log {
            level: LogLevel::Info,
            message: format!("peer {peer} disconnected"),
        }];

        // Keyring material survives; only the in-flight handshake dies.
        if let Some(state) = self.peers.get_mut(&peer)
            && let Some(machine) = state.exchange.as_mut()
            && !machine.is_terminal()
        {
            machine.fail("peer disconnected");
            actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed {
                peer,
                reason: "peer disconnected".to_string(),
            }));
        }
        actions
    }

    fn handle_send_message(
        &mut self,
        stream: StreamId,
        plaintext: &[u8],
    ) -> Result<Vec<SessionAction>, SessionError> {
        if stream == 0 {
            return Err(SessionError::InvalidStream { stream });
        }
        if !matches!(self.link, LinkState::Connected { .. }) {
            return Err(SessionError::PeerConnectionFailed {
                reason: "link is not connected".to_string(),
            });
        }
        if plaintext.len() > self.config.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: plaintext.len(),
                limit: self.config.max_message_size,
            });
        }

        let (envelope, consumed) = encrypt_one_time(
            &self.pool,
            AccessScope::Stream(stream),
            self.identity,
            plaintext,
            &self.env,
        )
        .map_err(encrypt_error)?;

        // The pair is spent the moment a ciphertext exists, whatever the
        // transport does with it afterwards.
        let hint = key_hint(envelope.header.recipient_key());
        let sealed = envelope.payload.len() as u64;
        if self.pool.remove(consumed).is_err() {
            unreachable!("encrypt_one_time returned a live id");
        }

        let mut actions = vec![SessionAction::Send { to: Delivery::Broadcast, envelope }];
        actions.push(SessionAction::RecordSent(SentRecord {
            sender: self.identity,
            scope: AccessScope::Stream(stream),
            key_hint: hint,
            bytes: sealed,
            at_unix_secs: self.env.wall_clock_secs(),
        }));

        self.replenish_if_due(&mut actions);
        self.push_persist(&mut actions);
        actions.push(SessionAction::Notify(SessionNotice::KeyStatusChanged(self.key_stats())));
        Ok(actions)
    }

    fn handle_send_direct(
        &mut self,
        peer: PeerId,
        plaintext: &[u8],
    ) -> Result<Vec<SessionAction>, SessionError> {
        if peer == self.identity {
            return Err(SessionError::InvalidIdentity {
                reason: "cannot send to own identity".to_string(),
            });
        }
        // Refuse before the keyring is touched; a consumed remote key
        // cannot be returned to the ring.
        if !matches!(self.link, LinkState::Connected { .. }) {
            return Err(SessionError::PeerConnectionFailed {
                reason: "link is not connected".to_string(),
            });
        }
        if plaintext.len() > self.config.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: plaintext.len(),
                limit: self.config.max_message_size,
            });
        }

        let (remote_key, remaining) = {
            let state = self.peers.get_mut(&peer).ok_or(SessionError::PeerNotFound { peer })?;
            let key = state.keyring.take_next().ok_or(SessionError::KeyPoolUnavailable)?;
            (key, state.keyring.len())
        };

        let envelope = encrypt_direct(
            &remote_key,
            self.pool.curve(),
            peer,
            self.identity,
            plaintext,
            &self.env,
        )
        .map_err(encrypt_error)?;

        let sealed = envelope.payload.len() as u64;
        let mut actions = vec![SessionAction::Send { to: Delivery::Peer(peer), envelope }];
        actions.push(SessionAction::RecordSent(SentRecord {
            sender: self.identity,
            scope: AccessScope::Direct(peer),
            key_hint: key_hint(&remote_key),
            bytes: sealed,
            at_unix_secs: self.env.wall_clock_secs(),
        }));

        if remaining <= KEYRING_LOW_WATER {
            actions.push(SessionAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "keyring for peer {peer} down to {remaining} keys, run a key exchange"
                ),
            });
        }
        Ok(actions)
    }

    fn handle_envelope(&mut self, from: PeerId, bytes: &[u8]) -> Vec<SessionAction> {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                return vec![
                    SessionAction::Log {
                        level: LogLevel::Warn,
                        message: format!("dropping malformed envelope from peer {from}: {e}"),
                    },
                    SessionAction::Notify(SessionNotice::ErrorOccurred(
                        SessionError::MalformedEnvelope { reason: e.to_string() },
                    )),
                ];
            },
        };

        if envelope.header.sender() == self.identity {
            // Broadcast echo of our own traffic.
            return vec![SessionAction::Log {
                level: LogLevel::Debug,
                message: "skipping own envelope".to_string(),
            }];
        }

        match envelope.header.opcode_enum() {
            Some(Opcode::Data) => self.handle_data(from, &envelope),
            Some(_) => self.handle_control(from, &envelope),
            None => vec![
                SessionAction::Log {
                    level: LogLevel::Warn,
                    message: format!(
                        "dropping envelope with unknown opcode {:#04x} from peer {from}",
                        envelope.header.opcode()
                    ),
                },
                SessionAction::Notify(SessionNotice::ErrorOccurred(
                    SessionError::MalformedEnvelope {
                        reason: format!("unknown opcode {:#04x}", envelope.header.opcode()),
                    },
                )),
            ],
        }
    }

    fn handle_data(&mut self, from: PeerId, envelope: &Envelope) -> Vec<SessionAction> {
        match decrypt_one_time(&self.pool, envelope) {
            Ok((plaintext, consumed)) => {
                if self.pool.remove(consumed).is_err() {
                    unreachable!("decrypt_one_time returned a live id");
                }

                let mut actions = vec![SessionAction::DeliverMessage {
                    from: envelope.header.sender(),
                    stream: envelope.header.stream(),
                    plaintext,
                }];
                self.replenish_if_due(&mut actions);
                self.push_persist(&mut actions);
                actions.push(SessionAction::Notify(SessionNotice::KeyStatusChanged(
                    self.key_stats(),
                )));
                actions
            },
            Err(e) => match decrypt_error(&e) {
                // Sealed for another replica holder; normal on shared streams.
                SessionError::MessageNotForThisReceiver => vec![SessionAction::Log {
                    level: LogLevel::Debug,
                    message: format!("envelope from peer {from} is not for this receiver"),
                }],
                error => vec![
                    SessionAction::Log {
                        level: LogLevel::Warn,
                        message: format!("failed to decrypt envelope from peer {from}: {e}"),
                    },
                    SessionAction::Notify(SessionNotice::ErrorOccurred(error)),
                ],
            },
        }
    }

    fn handle_control(&mut self, from: PeerId, envelope: &Envelope) -> Vec<SessionAction> {
        let payload = match Payload::from_envelope(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                let mut actions = Vec::new();
                let active =
                    self.peer_machine(from).is_some_and(|machine| !machine.is_terminal());
                if active {
                    self.report_exchange_failure(
                        from,
                        format!("malformed payload: {e}"),
                        &mut actions,
                    );
                } else {
                    actions.push(SessionAction::Log {
                        level: LogLevel::Warn,
                        message: format!("malformed control payload from peer {from}: {e}"),
                    });
                    actions.push(SessionAction::Notify(SessionNotice::ErrorOccurred(
                        SessionError::MalformedEnvelope { reason: e.to_string() },
                    )));
                }
                return actions;
            },
        };

        match payload {
            Payload::KeyRequest(request) => self.on_key_request(from, &request),
            Payload::KeyOffer(offer) => self.on_key_offer(from, &offer),
            Payload::KeyAck(ack) => self.on_key_ack(from, &ack),
            Payload::KeyConfirm(confirm) => self.on_key_confirm(from, &confirm),
            Payload::KeyCommit(commit) => self.on_key_commit(from, &commit),
            Payload::Error(info) => self.on_error_report(from, &info),
        }
    }

    /// Responder leg 1: a peer asked for keys, offer a fresh batch.
    fn on_key_request(&mut self, from: PeerId, request: &KeyRequest) -> Vec<SessionAction> {
        let now = self.env.now();
        let identity = self.identity;
        let curve = self.pool.curve();
        let exchange_config = self.config.exchange;
        let mut actions = Vec::new();

        let machine = self
            .peers
            .entry(from)
            .or_default()
            .exchange
            .get_or_insert_with(|| KeyExchange::new(from, exchange_config, now));

        let count = match machine.on_request(request, now) {
            Ok(count) => count,
            Err(ExchangeError::AlreadyActive) => {
                actions.push(SessionAction::Log {
                    level: LogLevel::Warn,
                    message: format!("rejecting key request from peer {from}: exchange active"),
                });
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed("exchange already active")),
                );
                return actions;
            },
            Err(e) => {
                self.report_exchange_failure(from, e.to_string(), &mut actions);
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                );
                return actions;
            },
        };

        // Offered keys are fresh pool pairs: the exchange replenishes us
        // while handing the peer addressable material.
        let fresh = self.generate_exchange_batch(count as usize);
        let Some(machine) = self.peer_machine(from) else {
            unreachable!("peer entry created above");
        };

        if fresh.is_empty() {
            let reason = "no one-time keys available to offer".to_string();
            machine.fail(reason.clone());
            actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed {
                peer: from,
                reason: reason.clone(),
            }));
            push_control(
                &mut actions,
                from,
                identity,
                curve,
                Payload::Error(ErrorInfo::no_keys(reason)),
            );
            return actions;
        }

        match machine.offer(fresh, now) {
            Ok(offer) => {
                actions.push(SessionAction::Log {
                    level: LogLevel::Info,
                    message: format!("offering {} one-time keys to peer {from}", offer.keys.len()),
                });
                push_control(&mut actions, from, identity, curve, Payload::KeyOffer(offer));
                self.push_persist(&mut actions);
                actions.push(SessionAction::Notify(SessionNotice::KeyStatusChanged(
                    self.key_stats(),
                )));
            },
            Err(e) => {
                self.report_exchange_failure(from, e.to_string(), &mut actions);
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                );
            },
        }
        actions
    }

    /// Initiator leg 2: hold the peer's offer, answer with our batch.
    fn on_key_offer(&mut self, from: PeerId, offer: &KeyOffer) -> Vec<SessionAction> {
        let now = self.env.now();
        let identity = self.identity;
        let curve = self.pool.curve();
        let mut actions = Vec::new();

        {
            let Some(machine) = self.peer_machine(from) else {
                return vec![stray_control(from, "KeyOffer")];
            };
            if machine.is_terminal() {
                return vec![stray_control(from, "KeyOffer")];
            }
        }

        let held = {
            let Some(machine) = self.peer_machine(from) else {
                unreachable!("machine checked above");
            };
            match machine.on_offer(offer, now) {
                Ok(held) => held,
                Err(e) => {
                    self.report_exchange_failure(from, e.to_string(), &mut actions);
                    push_control(
                        &mut actions,
                        from,
                        identity,
                        curve,
                        Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                    );
                    return actions;
                },
            }
        };

        let fresh = self.generate_exchange_batch(held);
        let Some(machine) = self.peer_machine(from) else {
            unreachable!("machine checked above");
        };

        if fresh.is_empty() {
            let reason = "no one-time keys available to reciprocate".to_string();
            machine.fail(reason.clone());
            actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed {
                peer: from,
                reason: reason.clone(),
            }));
            push_control(
                &mut actions,
                from,
                identity,
                curve,
                Payload::Error(ErrorInfo::no_keys(reason)),
            );
            return actions;
        }

        match machine.ack(fresh, now) {
            Ok(ack) => {
                push_control(&mut actions, from, identity, curve, Payload::KeyAck(ack));
                self.push_persist(&mut actions);
                actions.push(SessionAction::Notify(SessionNotice::KeyStatusChanged(
                    self.key_stats(),
                )));
            },
            Err(e) => {
                self.report_exchange_failure(from, e.to_string(), &mut actions);
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                );
            },
        }
        actions
    }

    /// Responder leg 3: hold the reciprocal batch, confirm receipt.
    fn on_key_ack(&mut self, from: PeerId, ack: &KeyAck) -> Vec<SessionAction> {
        let now = self.env.now();
        let identity = self.identity;
        let curve = self.pool.curve();
        let mut actions = Vec::new();

        let confirm = {
            let Some(machine) = self.peer_machine(from) else {
                return vec![stray_control(from, "KeyAck")];
            };
            if machine.is_terminal() {
                return vec![stray_control(from, "KeyAck")];
            }
            machine.on_ack(ack, now)
        };

        match confirm {
            Ok(confirm) => {
                push_control(&mut actions, from, identity, curve, Payload::KeyConfirm(confirm));
            },
            Err(e) => {
                self.report_exchange_failure(from, e.to_string(), &mut actions);
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                );
            },
        }
        actions
    }

    /// Initiator leg 4: commit and install the peer's offered keys.
    fn on_key_confirm(&mut self, from: PeerId, confirm: &KeyConfirm) -> Vec<SessionAction> {
        let now = self.env.now();
        let identity = self.identity;
        let curve = self.pool.curve();
        let mut actions = Vec::new();

        let outcome = {
            let Some(state) = self.peers.get_mut(&from) else {
                return vec![stray_control(from, "KeyConfirm")];
            };
            let Some(machine) = state.exchange.as_mut() else {
                return vec![stray_control(from, "KeyConfirm")];
            };
            if machine.is_terminal() {
                return vec![stray_control(from, "KeyConfirm")];
            }

            match machine.on_confirm(confirm, now) {
                Ok(commit) => {
                    let keys = match machine.finalize(now) {
                        Ok(keys) => keys,
                        Err(_) => unreachable!("on_confirm leaves the machine in CommitSent"),
                    };
                    Ok((commit, state.keyring.install(&keys)))
                },
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok((commit, installed)) => {
                push_control(&mut actions, from, identity, curve, Payload::KeyCommit(commit));
                actions.push(SessionAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "key exchange with peer {from} completed, installed {installed} keys"
                    ),
                });
                actions.push(SessionAction::Notify(SessionNotice::ExchangeCompleted {
                    peer: from,
                    installed,
                }));
            },
            Err(e) => {
                self.report_exchange_failure(from, e.to_string(), &mut actions);
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                );
            },
        }
        actions
    }

    /// Responder leg 5: install the acked keys.
    fn on_key_commit(&mut self, from: PeerId, commit: &KeyCommit) -> Vec<SessionAction> {
        let now = self.env.now();
        let identity = self.identity;
        let curve = self.pool.curve();
        let mut actions = Vec::new();

        let outcome = {
            let Some(state) = self.peers.get_mut(&from) else {
                return vec![stray_control(from, "KeyCommit")];
            };
            let Some(machine) = state.exchange.as_mut() else {
                return vec![stray_control(from, "KeyCommit")];
            };
            if machine.is_terminal() {
                return vec![stray_control(from, "KeyCommit")];
            }

            machine.on_commit(commit, now).map(|keys| state.keyring.install(&keys))
        };

        match outcome {
            Ok(installed) => {
                actions.push(SessionAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "key exchange with peer {from} completed, installed {installed} keys"
                    ),
                });
                actions.push(SessionAction::Notify(SessionNotice::ExchangeCompleted {
                    peer: from,
                    installed,
                }));
            },
            Err(e) => {
                self.report_exchange_failure(from, e.to_string(), &mut actions);
                push_control(
                    &mut actions,
                    from,
                    identity,
                    curve,
                    Payload::Error(ErrorInfo::exchange_failed(e.to_string())),
                );
            },
        }
        actions
    }

    /// A peer reported a structured error; fail any in-flight exchange.
    fn on_error_report(&mut self, from: PeerId, info: &ErrorInfo) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::Log {
            level: LogLevel::Warn,
            message: format!("peer {from} reported error {:#06x}: {}", info.code, info.message),
        }];

        if let Some(machine) = self.peer_machine(from)
            && !machine.is_terminal()
        {
            let reason = format!("peer reported: {}", info.message);
            machine.fail(reason.clone());
            actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed {
                peer: from,
                reason,
            }));
        }
        actions
    }

    fn handle_regenerate(&mut self, force: bool) -> Vec<SessionAction> {
        match self.config.policy.plan(self.pool.len(), self.pool.capacity(), force) {
            RegenerationPlan::Skip => vec![SessionAction::Log {
                level: LogLevel::Debug,
                message: format!("regeneration skipped, pool holds {} pairs", self.pool.len()),
            }],
            RegenerationPlan::Generate { count } => {
                let generated = self.pool.generate(count, &self.env).len();
                let mut actions = vec![SessionAction::Log {
                    level: LogLevel::Info,
                    message: format!(
                        "generated {generated} pairs, pool at {} of {}",
                        self.pool.len(),
                        self.pool.capacity()
                    ),
                }];
                self.push_persist(&mut actions);
                actions.push(SessionAction::Notify(SessionNotice::KeyStatusChanged(
                    self.key_stats(),
                )));
                actions
            },
        }
    }

    fn handle_begin_exchange(
        &mut self,
        peer: PeerId,
        count: u16,
    ) -> Result<Vec<SessionAction>, SessionError> {
        if peer == self.identity {
            return Err(SessionError::InvalidIdentity {
                reason: "cannot exchange keys with own identity".to_string(),
            });
        }
        if !matches!(self.link, LinkState::Connected { .. }) {
            return Err(SessionError::PeerConnectionFailed {
                reason: "link is not connected".to_string(),
            });
        }

        let now = self.env.now();
        let exchange_id = self.env.random_u64();
        let identity = self.identity;
        let curve = self.pool.curve();
        let exchange_config = self.config.exchange;

        let machine = self
            .peers
            .entry(peer)
            .or_default()
            .exchange
            .get_or_insert_with(|| KeyExchange::new(peer, exchange_config, now));
        let request = machine.initiate(exchange_id, count, now)?;

        let mut actions = vec![SessionAction::Log {
            level: LogLevel::Info,
            message: format!("requesting {count} one-time keys from peer {peer}"),
        }];
        push_control(&mut actions, peer, identity, curve, Payload::KeyRequest(request));
        Ok(actions)
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        for (peer, state) in &mut self.peers {
            if let Some(machine) = state.exchange.as_mut()
                && machine.tick(now)
                && let ExchangeState::Failed { reason } = machine.state()
            {
                actions.push(SessionAction::Log {
                    level: LogLevel::Warn,
                    message: format!("key exchange with peer {peer} failed: {reason}"),
                });
                actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed {
                    peer: *peer,
                    reason: reason.clone(),
                }));
            }
        }
        actions
    }

    /// Mints fresh pool pairs and returns their public halves.
    ///
    /// Exchange batches are new generations, so offering keys replenishes
    /// the local pool as a side effect. The batch comes back smaller than
    /// asked when the pool is near capacity, and empty when full.
    fn generate_exchange_batch(&mut self, count: usize) -> Vec<[u8; 32]> {
        let ids = self.pool.generate(count, &self.env);
        ids.iter()
            .map(|id| match self.pool.public_key(*id) {
                Some(public) => public,
                None => unreachable!("freshly generated id is live"),
            })
            .collect()
    }

    fn peer_machine(&mut self, peer: PeerId) -> Option<&mut KeyExchange<E::Instant>> {
        self.peers.get_mut(&peer)?.exchange.as_mut()
    }

    /// Logs a failed exchange and emits the `ExchangeFailed` notice.
    ///
    /// The machine usually poisoned itself already; `fail` is a no-op then
    /// and the original reason stands.
    fn report_exchange_failure(
        &mut self,
        peer: PeerId,
        reason: String,
        actions: &mut Vec<SessionAction>,
    ) {
        actions.push(SessionAction::Log {
            level: LogLevel::Warn,
            message: format!("key exchange with peer {peer} failed: {reason}"),
        });
        if let Some(machine) = self.peer_machine(peer) {
            machine.fail(reason.clone());
        }
        actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed { peer, reason }));
    }

    fn fail_all_exchanges(&mut self, reason: &str, actions: &mut Vec<SessionAction>) {
        for (peer, state) in &mut self.peers {
            if let Some(machine) = state.exchange.as_mut()
                && !machine.is_terminal()
            {
                machine.fail(reason);
                actions.push(SessionAction::Notify(SessionNotice::ExchangeFailed {
                    peer: *peer,
                    reason: reason.to_string(),
                }));
            }
        }
    }

    fn replenish_if_due(&mut self, actions: &mut Vec<SessionAction>) {
        if let RegenerationPlan::Generate { count } =
            self.config.policy.plan(self.pool.len(), self.pool.capacity(), false)
        {
            let generated = self.pool.generate(count, &self.env).len();
            actions.push(SessionAction::Log {
                level: LogLevel::Info,
                message: format!("pool fell below threshold, generated {generated} pairs"),
            });
        }
    }

    fn push_persist(&self, actions: &mut Vec<SessionAction>) {
        match self.snapshot() {
            Ok(stored) => actions.push(SessionAction::PersistPool(stored)),
            Err(e) => {
                actions.push(SessionAction::Log {
                    level: LogLevel::Error,
                    message: format!("pool snapshot failed: {e}"),
                });
                actions.push(SessionAction::Notify(SessionNotice::ErrorOccurred(
                    SessionError::PersistenceFailed { reason: e.to_string() },
                )));
            },
        }
    }

    fn set_link(&mut self, next: LinkState, actions: &mut Vec<SessionAction>) {
        if self.link != next {
            self.link = next.clone();
            actions.push(SessionAction::Notify(SessionNotice::ConnectionChanged(next)));
        }
    }
}

/// First bytes of the consumed public key, enough to correlate an audit
/// record with a wire capture without storing the whole key.
fn key_hint(public: &[u8; 32]) -> [u8; 8] {
    let mut hint = [0u8; 8];
    hint.copy_from_slice(&public[..8]);
    hint
}

fn encrypt_error(e: ServiceError) -> SessionError {
    match e {
        ServiceError::NoKeysAvailable => SessionError::KeyPoolUnavailable,
        other => SessionError::EncryptionFailed { reason: other.to_string() },
    }
}

fn decrypt_error(e: &ServiceError) -> SessionError {
    match e {
        ServiceError::NoMatchingKey => SessionError::MessageNotForThisReceiver,
        other => SessionError::DecryptionFailed { reason: other.to_string() },
    }
}

fn stray_control(from: PeerId, leg: &str) -> SessionAction {
    SessionAction::Log {
        level: LogLevel::Debug,
        message: format!("ignoring stray {leg} from peer {from}, no active exchange"),
    }
}

/// Builds and queues a control envelope; an encode failure degrades to an
/// error log instead of killing the session.
fn push_control(
    actions: &mut Vec<SessionAction>,
    to: PeerId,
    identity: PeerId,
    curve: Curve,
    payload: Payload,
) {
    let mut header = EnvelopeHeader::new(payload.opcode(), curve);
    header.set_sender(identity);
    match payload.into_envelope(header) {
        Ok(envelope) => actions.push(SessionAction::Send { to: Delivery::Peer(to), envelope }),
        Err(e) => actions.push(SessionAction::Log {
            level: LogLevel::Error,
            message: format!("failed to encode control payload: {e}"),
        }),
    }
}
