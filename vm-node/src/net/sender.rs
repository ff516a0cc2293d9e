//! Outbound side of the transport: one fresh connection per message.
//!
//! No pooling and no retry. Traffic volume is low and messages are tiny,
//! so connection setup cost does not matter here.

use super::Directory;
use crate::console;
use protocol::{Message, SendMessage};
use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("No peer {0:?} in the directory")]
    UnknownPeer(String),
    #[error("Can't resolve peer address ({name})")]
    NameResolution { name: String, source: io::Error },
    #[error("Peer name {name} resolved to 0 addresses, can't reach peer")]
    Unreachable { name: String },
    #[error("Can't establish stream to {name}")]
    Connect { name: String, source: io::Error },
    #[error("Failed to write message to {name}")]
    Write {
        name: String,
        source: protocol::WireError,
    },
}

pub struct Sender {
    directory: Arc<Directory>,
    connect_timeout: Duration,
}

impl Sender {
    #[must_use]
    pub fn new(directory: Arc<Directory>, connect_timeout: Duration) -> Self {
        Self {
            directory,
            connect_timeout,
        }
    }

    /// Deliver one message.
    ///
    /// A broadcast (`destination_id == "0"`) is attempted to every peer in
    /// the directory independently; a failed peer is logged and skipped,
    /// never aborting delivery to the rest. Unicast failures are the
    /// caller's to handle.
    pub fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        if message.is_broadcast() {
            for peer in self.directory.iter() {
                if let Err(e) = self.send_to(&peer.host, message) {
                    console::error!(&e, "Broadcast delivery to peer {} failed", peer.id);
                }
            }
            Ok(())
        } else {
            let host = self
                .directory
                .endpoint_for(&message.destination_id)
                .ok_or_else(|| DeliveryError::UnknownPeer(message.destination_id.clone()))?;
            self.send_to(host, message)
        }
    }

    /// Connect, write exactly one encoded message, close.
    fn send_to(&self, name: &str, message: &Message) -> Result<(), DeliveryError> {
        let mut addrs = name
            .to_socket_addrs()
            .map_err(|e| DeliveryError::NameResolution {
                name: name.to_owned(),
                source: e,
            })?
            .peekable();

        while let Some(addr) = addrs.next() {
            let mut stream = match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => stream,
                Err(e) => match addrs.peek() {
                    Some(_) => continue, // Retry next resolved address if available
                    None => {
                        return Err(DeliveryError::Connect {
                            name: name.to_owned(),
                            source: e,
                        })
                    }
                },
            };

            // Stream drops here, closing the connection after one message
            return stream.send(message).map_err(|e| DeliveryError::Write {
                name: name.to_owned(),
                source: e,
            });
        }
        Err(DeliveryError::Unreachable {
            name: name.to_owned(),
        })
    }
}
