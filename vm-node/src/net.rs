//! # Machine-to-Machine Transport
//!
//! One short-lived TCP connection per outgoing message, newline-delimited
//! JSON on the wire. [`sender::Sender`] resolves destinations through the
//! read-only [`Directory`]; [`receiver::Receiver`] accepts inbound
//! connections and dispatches decoded messages to registered handlers.

pub mod receiver;
pub mod sender;

pub use receiver::Receiver;
pub use sender::{DeliveryError, Sender};

use crate::config;

/// Read-only peer directory, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    peers: Vec<config::Peer>,
}

impl Directory {
    #[must_use]
    pub fn new(peers: Vec<config::Peer>) -> Self {
        Self { peers }
    }

    #[must_use]
    pub fn endpoint_for(&self, vm_id: &str) -> Option<&str> {
        self.peers
            .iter()
            .find(|peer| peer.id == vm_id)
            .map(|peer| peer.host.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &config::Peer> {
        self.peers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
