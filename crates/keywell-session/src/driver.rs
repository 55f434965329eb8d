//! Tokio actor around [`P2pSession`].
//!
//! The driver owns the session, a [`Transport`], and a [`KeyPoolStore`] and
//! runs them on one task: commands from the [`SessionHandle`] mailbox,
//! transport events, and a periodic tick all funnel into
//! [`P2pSession::handle`], and the returned actions are executed here.
//! `Log` actions become `tracing` events, notices fan out over a broadcast
//! channel, decrypted messages flow to the handle's receiver.

use std::{ops::ControlFlow, time::Duration};

use keywell_core::{Environment, KeyPool, PeerId, StreamId, store::KeyPoolStore};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    error::SessionError,
    event::{KeyPoolStats, LogLevel, SessionAction, SessionEvent, SessionNotice},
    session::{P2pSession, SessionConfig},
    transport::{Transport, TransportEvent},
};

/// Mailbox depth for handle commands.
const COMMAND_DEPTH: usize = 32;

/// Buffer for decrypted messages awaiting the application.
const INCOMING_DEPTH: usize = 32;

/// Broadcast capacity for notices; slow subscribers observe `Lagged`.
const NOTICE_DEPTH: usize = 64;

/// Exchange timeouts are checked at this cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Decrypted message delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Peer the transport attributed the envelope to.
    pub from: PeerId,
    /// Stream the message was sealed for; zero for direct messages.
    pub stream: StreamId,
    /// Decrypted payload.
    pub plaintext: Vec<u8>,
}

type Reply<T> = oneshot::Sender<T>;

enum SessionCommand {
    Connect { reply: Reply<Result<(), SessionError>> },
    Disconnect { reply: Reply<Result<(), SessionError>> },
    SendMessage { stream: StreamId, plaintext: Vec<u8>, reply: Reply<Result<(), SessionError>> },
    SendDirect { public_id: u64, plaintext: Vec<u8>, reply: Reply<Result<(), SessionError>> },
    BeginKeyExchange { peer: PeerId, count: u16, reply: Reply<Result<(), SessionError>> },
    RegenerateKeys { force: bool, reply: Reply<Result<(), SessionError>> },
    KeyStats { reply: Reply<KeyPoolStats> },
    Shutdown { reply: Reply<()> },
}

/// Spawns and owns the session task.
pub struct SessionDriver;

impl SessionDriver {
    /// Loads the persisted pool, builds the session, and spawns its task.
    ///
    /// A snapshot found under `identity` in the store restores the previous
    /// pool; otherwise a fresh one is generated and persisted immediately.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PersistenceFailed`] if the store cannot be read or
    ///   the stored snapshot no longer decodes
    pub async fn spawn<E, S, T>(
        env: E,
        identity: PeerId,
        config: SessionConfig,
        store: S,
        transport: T,
    ) -> Result<SessionHandle, SessionError>
    where
        E: Environment,
        S: KeyPoolStore,
        T: Transport,
    {
        let restored = match store.load_pool(identity).await? {
            Some(stored) => Some(KeyPool::from_bytes(&stored.bytes).map_err(|e| {
                SessionError::PersistenceFailed { reason: e.to_string() }
            })?),
            None => None,
        };

        let (session, initial) = P2pSession::new(env.clone(), identity, config, restored);

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_DEPTH);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_DEPTH);
        let (notices_tx, _) = broadcast::channel(NOTICE_DEPTH);

        let task = SessionTask {
            session,
            env,
            store,
            transport,
            incoming: incoming_tx,
            notices: notices_tx.clone(),
        };
        let join = tokio::spawn(task.run(commands_rx, initial));

        Ok(SessionHandle {
            identity,
            commands: commands_tx,
            incoming: incoming_rx,
            notices: notices_tx,
            abort: join.abort_handle(),
        })
    }
}

/// Handle to a running session task.
///
/// Cheap operations go through the command mailbox; replies come back on
/// oneshot channels so callers observe the session's error taxonomy
/// directly. Dropping the handle closes the mailbox and stops the task.
pub struct SessionHandle {
    identity: PeerId,
    commands: mpsc::Sender<SessionCommand>,
    incoming: mpsc::Receiver<IncomingMessage>,
    notices: broadcast::Sender<SessionNotice>,
    abort: tokio::task::AbortHandle,
}

impl SessionHandle {
    /// Identity the session seals as.
    #[must_use]
    pub fn identity(&self) -> PeerId {
        self.identity
    }

    /// Starts peer discovery.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PeerConnectionFailed`] if the session task stopped
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Connect { reply }).await?
    }

    /// Stops discovery and fails in-flight exchanges.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PeerConnectionFailed`] if the session task stopped
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply }).await?
    }

    /// Seals `plaintext` for `stream` with the next one-time pair and
    /// broadcasts it.
    ///
    /// # Errors
    ///
    /// See [`SessionError`]; the send-path variants are returned unchanged.
    pub async fn send_message(
        &self,
        stream: StreamId,
        plaintext: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SendMessage { stream, plaintext, reply }).await?
    }

    /// Seals `plaintext` for the peer `public_id` resolves to and sends it
    /// directly.
    ///
    /// The recipient directory in the store resolves `public_id`; an unknown
    /// identifier fails with [`SessionError::PeerNotFound`].
    ///
    /// # Errors
    ///
    /// See [`SessionError`]; the send-path variants are returned unchanged.
    pub async fn send_direct(
        &self,
        public_id: u64,
        plaintext: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SendDirect { public_id, plaintext, reply }).await?
    }

    /// Starts a key exchange asking `peer` for `count` one-time keys.
    ///
    /// Completion and failure arrive as notices, not through this call.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidIdentity`] when targeting the own identity
    /// - [`SessionError::PeerConnectionFailed`] when the link is down
    /// - [`SessionError::KeyManagementFailed`] when an exchange is active
    pub async fn begin_key_exchange(&self, peer: PeerId, count: u16) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::BeginKeyExchange { peer, count, reply }).await?
    }

    /// Runs one replenishment round; `force` generates even above threshold.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PeerConnectionFailed`] if the session task stopped
    pub async fn regenerate_keys(&self, force: bool) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::RegenerateKeys { force, reply }).await?
    }

    /// Current pool fill level against the policy thresholds.
    ///
    /// # Errors
    ///
    /// - [`SessionError::PeerConnectionFailed`] if the session task stopped
    pub async fn key_stats(&self) -> Result<KeyPoolStats, SessionError> {
        self.request(|reply| SessionCommand::KeyStats { reply }).await
    }

    /// Next decrypted message, or `None` once the task stopped.
    pub async fn recv_message(&mut self) -> Option<IncomingMessage> {
        self.incoming.recv().await
    }

    /// Subscribes to session notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Stops the task, persisting the pool first.
    ///
    /// Waits for the task to acknowledge; if the mailbox is already gone the
    /// task is aborted instead.
    pub async fn shutdown(self) {
        let (reply, ack) = oneshot::channel();
        if self.commands.send(SessionCommand::Shutdown { reply }).await.is_ok() {
            let _ = ack.await;
        } else {
            self.abort.abort();
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> Result<R, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| task_stopped())?;
        response.await.map_err(|_| task_stopped())
    }
}

fn task_stopped() -> SessionError {
    SessionError::PeerConnectionFailed { reason: "session task stopped".to_string() }
}

struct SessionTask<E: Environment, S, T> {
    session: P2pSession<E>,
    env: E,
    store: S,
    transport: T,
    incoming: mpsc::Sender<IncomingMessage>,
    notices: broadcast::Sender<SessionNotice>,
}

impl<E, S, T> SessionTask<E, S, T>
where
    E: Environment,
    S: KeyPoolStore,
    T: Transport,
{
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        initial: Vec<SessionAction>,
    ) {
        self.execute(initial).await;
        let mut ticker = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                maybe_command = commands.recv() => {
                    let Some(command) = maybe_command else { break };
                    if self.handle_command(command).await.is_break() {
                        // Shutdown already wound down and acknowledged
                        return;
                    }
                },
                maybe_event = self.transport.recv() => {
                    let Some(event) = maybe_event else { break };
                    self.on_transport_event(event).await;
                },
                _ = ticker.tick() => {
                    let now = self.env.now();
                    self.dispatch_infallible(SessionEvent::Tick { now }).await;
                },
            }
        }

        self.wind_down().await;
    }

    async fn handle_command(&mut self, command: SessionCommand) -> ControlFlow<()> {
        match command {
            SessionCommand::Connect { reply } => {
                let _ = reply.send(self.dispatch(SessionEvent::Connect).await);
            },
            SessionCommand::Disconnect { reply } => {
                let _ = reply.send(self.dispatch(SessionEvent::Disconnect).await);
            },
            SessionCommand::SendMessage { stream, plaintext, reply } => {
                let result = self.dispatch(SessionEvent::SendMessage { stream, plaintext }).await;
                let _ = reply.send(result);
            },
            SessionCommand::SendDirect { public_id, plaintext, reply } => {
                let _ = reply.send(self.send_direct(public_id, plaintext).await);
            },
            SessionCommand::BeginKeyExchange { peer, count, reply } => {
                let result = self.dispatch(SessionEvent::BeginKeyExchange { peer, count }).await;
                let _ = reply.send(result);
            },
            SessionCommand::RegenerateKeys { force, reply } => {
                let _ = reply.send(self.dispatch(SessionEvent::RegenerateKeys { force }).await);
            },
            SessionCommand::KeyStats { reply } => {
                let _ = reply.send(self.session.key_stats());
            },
            SessionCommand::Shutdown { reply } => {
                self.wind_down().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            },
        }
        ControlFlow::Continue(())
    }

    async fn send_direct(
        &mut self,
        public_id: u64,
        plaintext: Vec<u8>,
    ) -> Result<(), SessionError> {
        let Some(recipient) = self.store.fetch_recipient(public_id).await? else {
            return Err(SessionError::PeerNotFound { peer: public_id });
        };
        self.dispatch(SessionEvent::SendDirect { peer: recipient.peer, plaintext }).await
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        let session_event = match event {
            TransportEvent::Status(status) => SessionEvent::TransportStatus(status),
            TransportEvent::PeerConnected { peer } => SessionEvent::PeerConnected { peer },
            TransportEvent::PeerDisconnected { peer } => SessionEvent::PeerDisconnected { peer },
            TransportEvent::Envelope { from, bytes } => {
                SessionEvent::EnvelopeReceived { from, bytes }
            },
        };
        self.dispatch_infallible(session_event).await;
    }

    async fn dispatch(&mut self, event: SessionEvent<E::Instant>) -> Result<(), SessionError> {
        let actions = self.session.handle(event)?;
        self.execute(actions).await;
        Ok(())
    }

    /// Transport and tick events never return errors from the session.
    async fn dispatch_infallible(&mut self, event: SessionEvent<E::Instant>) {
        if let Err(e) = self.dispatch(event).await {
            tracing::error!(error = %e, "event unexpectedly failed");
        }
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send { to, envelope } => match envelope.encode_to_vec() {
                    Ok(bytes) => {
                        if let Err(e) = self.transport.send(to, bytes).await {
                            tracing::warn!(error = %e, "transport send failed");
                            let _ = self.notices.send(SessionNotice::ErrorOccurred(
                                SessionError::PeerConnectionFailed { reason: e.to_string() },
                            ));
                        }
                    },
                    Err(e) => tracing::error!(error = %e, "failed to encode envelope"),
                },
                SessionAction::DeliverMessage { from, stream, plaintext } => {
                    let message = IncomingMessage { from, stream, plaintext };
                    if self.incoming.send(message).await.is_err() {
                        tracing::debug!("incoming receiver dropped, discarding message");
                    }
                },
                SessionAction::PersistPool(stored) => {
                    if let Err(e) = self.store.save_pool(self.session.identity(), stored).await {
                        tracing::warn!(error = %e, "failed to persist key pool");
                        let _ = self.notices.send(SessionNotice::ErrorOccurred(
                            SessionError::PersistenceFailed { reason: e.to_string() },
                        ));
                    }
                },
                SessionAction::RecordSent(record) => {
                    if let Err(e) = self.store.record_sent(record).await {
                        tracing::warn!(error = %e, "failed to record send audit entry");
                    }
                },
                SessionAction::Notify(notice) => {
                    // No subscribers is fine
                    let _ = self.notices.send(notice);
                },
                SessionAction::StartDiscovery => {
                    if let Err(e) = self.transport.start_discovery().await {
                        tracing::warn!(error = %e, "failed to start discovery");
                        let _ = self.notices.send(SessionNotice::ErrorOccurred(
                            SessionError::PeerConnectionFailed { reason: e.to_string() },
                        ));
                    }
                },
                SessionAction::StopDiscovery => {
                    if let Err(e) = self.transport.stop_discovery().await {
                        tracing::warn!(error = %e, "failed to stop discovery");
                    }
                },
                SessionAction::Log { level, message } => match level {
                    LogLevel::Debug => tracing::debug!("{}", message),
                    LogLevel::Info => tracing::info!("{}", message),
                    LogLevel::Warn => tracing::warn!("{}", message),
                    LogLevel::Error => tracing::error!("{}", message),
                },
            }
        }
    }

    async fn wind_down(&mut self) {
        if let Err(e) = self.transport.stop_discovery().await {
            tracing::debug!(error = %e, "failed to stop discovery during shutdown");
        }
        match self.session.snapshot() {
            Ok(stored) => {
                if let Err(e) = self.store.save_pool(self.session.identity(), stored).await {
                    tracing::warn!(error = %e, "failed to persist pool during shutdown");
                }
            },
            Err(e) => tracing::warn!(error = %e, "failed to snapshot pool during shutdown"),
        }
        tracing::debug!(identity = self.session.identity(), "session task stopped");
    }
}
