//! In-process transport backed by a shared hub.
//!
//! No network; envelope bytes flow through Tokio mpsc channels between
//! every transport attached to the same [`MemoryHub`]. Discovery is
//! instantaneous: joining the hub connects a member to everyone already
//! attached. Used by the integration tests and short-lived simulations.

#![allow(clippy::disallowed_types, reason = "Hub lock guards synchronous map access only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use keywell_core::PeerId;
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportEvent};
use crate::event::{Delivery, TransportStatus};

type Members = HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>;

/// Shared medium connecting [`MemoryTransport`]s in one process.
///
/// Clones share the same member table, so every transport attached through
/// any clone sees the same hub.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    members: Arc<Mutex<Members>>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport for `identity`, not yet joined.
    ///
    /// The transport joins on `start_discovery` and leaves on
    /// `stop_discovery` or drop.
    #[must_use]
    pub fn attach(&self, identity: PeerId) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        MemoryTransport { hub: self.clone(), identity, tx, events: rx, joined: false }
    }

    #[allow(clippy::expect_used)]
    fn join(&self, identity: PeerId, tx: mpsc::UnboundedSender<TransportEvent>) {
        let mut members = self.members.lock().expect("Mutex poisoned");

        for (peer, sender) in members.iter() {
            let _ = sender.send(TransportEvent::PeerConnected { peer: identity });
            let _ = tx.send(TransportEvent::PeerConnected { peer: *peer });
        }
        members.insert(identity, tx);

        let peers = members.len() - 1;
        for sender in members.values() {
            let _ = sender.send(TransportEvent::Status(TransportStatus::Connected { peers }));
        }
    }

    #[allow(clippy::expect_used)]
    fn leave(&self, identity: PeerId) {
        let mut members = self.members.lock().expect("Mutex poisoned");
        if members.remove(&identity).is_none() {
            return;
        }

        let peers = members.len().saturating_sub(1);
        for sender in members.values() {
            let _ = sender.send(TransportEvent::PeerDisconnected { peer: identity });
            let _ = sender.send(TransportEvent::Status(TransportStatus::Connected { peers }));
        }
    }

    #[allow(clippy::expect_used)]
    fn deliver(&self, from: PeerId, to: Delivery, bytes: Vec<u8>) -> Result<(), TransportError> {
        let members = self.members.lock().expect("Mutex poisoned");
        match to {
            Delivery::Broadcast => {
                for (peer, sender) in members.iter() {
                    if *peer != from {
                        let _ = sender.send(TransportEvent::Envelope {
                            from,
                            bytes: bytes.clone(),
                        });
                    }
                }
                Ok(())
            },
            Delivery::Peer(peer) => {
                let sender = members
                    .get(&peer)
                    .ok_or_else(|| TransportError::Connection(format!("peer {peer} is not reachable")))?;
                sender
                    .send(TransportEvent::Envelope { from, bytes })
                    .map_err(|_| TransportError::Connection(format!("peer {peer} went away")))
            },
        }
    }

    #[allow(clippy::expect_used)]
    fn peers_of(&self, identity: PeerId) -> Vec<PeerId> {
        let members = self.members.lock().expect("Mutex poisoned");
        let mut peers: Vec<PeerId> =
            members.keys().copied().filter(|peer| *peer != identity).collect();
        peers.sort_unstable();
        peers
    }
}

/// One member's end of a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: MemoryHub,
    identity: PeerId,
    tx: mpsc::UnboundedSender<TransportEvent>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    joined: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start_discovery(&mut self) -> Result<(), TransportError> {
        if !self.joined {
            self.hub.join(self.identity, self.tx.clone());
            self.joined = true;
        }
        Ok(())
    }

    async fn stop_discovery(&mut self) -> Result<(), TransportError> {
        if self.joined {
            self.hub.leave(self.identity);
            self.joined = false;
            let _ = self.tx.send(TransportEvent::Status(TransportStatus::Idle));
        }
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        if self.joined { self.hub.peers_of(self.identity) } else { Vec::new() }
    }

    async fn send(&mut self, to: Delivery, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.joined {
            return Err(TransportError::Connection("not joined to the hub".to_string()));
        }
        self.hub.deliver(self.identity, to, bytes)
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if self.joined {
            self.hub.leave(self.identity);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    async fn next(transport: &mut MemoryTransport) -> TransportEvent {
        transport.recv().await.unwrap()
    }

    #[tokio::test]
    async fn first_joiner_connects_alone() {
        let hub = MemoryHub::new();
        let mut alone = hub.attach(1);

        alone.start_discovery().await.unwrap();

        assert!(matches!(
            next(&mut alone).await,
            TransportEvent::Status(TransportStatus::Connected { peers: 0 })
        ));
        assert!(alone.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn second_joiner_is_announced_to_both_sides() {
        let hub = MemoryHub::new();
        let mut first = hub.attach(1);
        let mut second = hub.attach(2);

        first.start_discovery().await.unwrap();
        next(&mut first).await; // own join status
        second.start_discovery().await.unwrap();

        assert!(matches!(next(&mut first).await, TransportEvent::PeerConnected { peer: 2 }));
        assert!(matches!(
            next(&mut first).await,
            TransportEvent::Status(TransportStatus::Connected { peers: 1 })
        ));
        assert!(matches!(next(&mut second).await, TransportEvent::PeerConnected { peer: 1 }));
        assert!(matches!(
            next(&mut second).await,
            TransportEvent::Status(TransportStatus::Connected { peers: 1 })
        ));
        assert_eq!(first.connected_peers(), vec![2]);
        assert_eq!(second.connected_peers(), vec![1]);
    }

    #[tokio::test]
    async fn broadcast_skips_the_sender() {
        let hub = MemoryHub::new();
        let mut a = hub.attach(1);
        let mut b = hub.attach(2);
        let mut c = hub.attach(3);
        for t in [&mut a, &mut b, &mut c] {
            t.start_discovery().await.unwrap();
        }

        a.send(Delivery::Broadcast, vec![0xAB]).await.unwrap();

        let mut saw = 0;
        for t in [&mut b, &mut c] {
            loop {
                match next(t).await {
                    TransportEvent::Envelope { from: 1, bytes } => {
                        assert_eq!(bytes, vec![0xAB]);
                        saw += 1;
                        break;
                    },
                    _ => continue,
                }
            }
        }
        assert_eq!(saw, 2);

        // Sender's own queue holds join traffic only, no echo
        while let Ok(event) = a.events.try_recv() {
            assert!(!matches!(event, TransportEvent::Envelope { .. }));
        }
    }

    #[tokio::test]
    async fn peer_delivery_reaches_only_the_target() {
        let hub = MemoryHub::new();
        let mut a = hub.attach(1);
        let mut b = hub.attach(2);
        a.start_discovery().await.unwrap();
        b.start_discovery().await.unwrap();

        a.send(Delivery::Peer(2), vec![0xCD]).await.unwrap();

        loop {
            if let TransportEvent::Envelope { from: 1, bytes } = next(&mut b).await {
                assert_eq!(bytes, vec![0xCD]);
                break;
            }
        }

        let missing = a.send(Delivery::Peer(9), vec![0xEF]).await;
        assert!(matches!(missing, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn leaving_notifies_the_rest() {
        let hub = MemoryHub::new();
        let mut staying = hub.attach(1);
        let mut leaving = hub.attach(2);
        staying.start_discovery().await.unwrap();
        leaving.start_discovery().await.unwrap();
        while staying.events.try_recv().is_ok() {}
        while leaving.events.try_recv().is_ok() {}

        leaving.stop_discovery().await.unwrap();

        assert!(matches!(next(&mut staying).await, TransportEvent::PeerDisconnected { peer: 2 }));
        assert!(matches!(
            next(&mut staying).await,
            TransportEvent::Status(TransportStatus::Connected { peers: 0 })
        ));
        assert!(matches!(
            next(&mut leaving).await,
            TransportEvent::Status(TransportStatus::Idle)
        ));
        assert!(leaving.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn sending_before_joining_fails() {
        let hub = MemoryHub::new();
        let mut detached = hub.attach(1);

        let result = detached.send(Delivery::Broadcast, vec![1]).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn drop_leaves_the_hub() {
        let hub = MemoryHub::new();
        let mut staying = hub.attach(1);
        staying.start_discovery().await.unwrap();
        {
            let mut passing = hub.attach(2);
            passing.start_discovery().await.unwrap();
        }
        while let Ok(event) = staying.events.try_recv() {
            if matches!(event, TransportEvent::PeerDisconnected { peer: 2 }) {
                return;
            }
        }
        panic!("no PeerDisconnected after drop");
    }
}
