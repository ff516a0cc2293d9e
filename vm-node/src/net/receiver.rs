//! Inbound side of the transport.
//!
//! One accept loop on its own thread; per-connection reads and per-message
//! handler dispatch both run on the worker pool, so a slow handler can
//! neither stall its connection's remaining reads nor starve the accept
//! loop.

use crate::console;
use protocol::{Message, MessageKind, RecvMessage, WireError};
use std::{
    collections::HashMap,
    io::{self, BufReader},
    net::{TcpListener, TcpStream},
    num::NonZero,
    sync::Arc,
    thread::{self, JoinHandle},
};
use thread_pool::ThreadPool;

type Handler = Arc<dyn Fn(Message) + Send + Sync>;
type Registry = HashMap<MessageKind, Handler>;

/// Listens on a port and dispatches each decoded inbound message to the
/// handler registered for its kind.
pub struct Receiver {
    handlers: Registry,
    pool: Arc<ThreadPool>,
}

impl Receiver {
    pub fn new(thread_count: NonZero<usize>) -> io::Result<Self> {
        Ok(Self {
            handlers: HashMap::new(),
            pool: Arc::new(ThreadPool::new(thread_count)?),
        })
    }

    /// Register the handler for one message kind. Handlers are fixed
    /// before [`Receiver::start`]; re-registration replaces.
    pub fn register(
        &mut self,
        kind: MessageKind,
        handler: impl Fn(Message) + Send + Sync + 'static,
    ) {
        if self.handlers.insert(kind, Arc::new(handler)).is_some() {
            console::warning!("Replacing existing handler for {kind}");
        }
    }

    /// Start the blocking accept loop on its own thread.
    pub fn start(self, listener: TcpListener) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("{}::accept_loop", module_path!()))
            .spawn(move || self.listen(&listener))
    }

    fn listen(self, listener: &TcpListener) {
        let handlers = Arc::new(self.handlers);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let handlers = Arc::clone(&handlers);
                    let pool = Arc::clone(&self.pool);
                    self.pool
                        .execute(move || Self::serve_connection(stream, &handlers, &pool));
                }
                Err(e) => console::error!(&e, "Accepting new connection failed"),
            }
        }
    }

    /// Read delimited messages until the peer closes or a decode error.
    /// A decode error drops only this connection; the accept loop keeps
    /// serving fresh ones.
    fn serve_connection(stream: TcpStream, handlers: &Registry, pool: &ThreadPool) {
        let mut reader = BufReader::new(stream);
        loop {
            match reader.recv() {
                Ok(message) => Self::dispatch(message, handlers, pool),
                Err(WireError::Closed) => break,
                Err(e) => {
                    console::error!(&e, "Dropping connection after receive failure");
                    break;
                }
            }
        }
    }

    fn dispatch(message: Message, handlers: &Registry, pool: &ThreadPool) {
        match handlers.get(&message.kind) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                pool.execute(move || handler(message));
            }
            // Unhandled kinds are an event, not an error
            None => console::warning!(
                "No handler registered for {} from {}",
                message.kind,
                message.source_id
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is ok in test code")]
mod tests {
    use super::*;
    use protocol::SendMessage;
    use std::{io::Write, sync::mpsc, time::Duration};

    fn started_receiver(
        register: impl FnOnce(&mut Receiver),
    ) -> (std::net::SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut receiver = Receiver::new(4.try_into().unwrap()).unwrap();
        register(&mut receiver);
        let accept = receiver.start(listener).unwrap();
        (addr, accept)
    }

    #[test]
    fn dispatches_by_kind() {
        let (tx, rx) = mpsc::channel();
        let (addr, _accept) = started_receiver(|receiver| {
            receiver.register(MessageKind::ReqStock, move |message| {
                tx.send(message).unwrap();
            });
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.send(&Message::req_stock("T1", "02")).unwrap();

        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received, Message::req_stock("T1", "02"));
    }

    #[test]
    fn keeps_accepting_after_garbage_connection() {
        let (tx, rx) = mpsc::channel();
        let (addr, _accept) = started_receiver(|receiver| {
            receiver.register(MessageKind::ReqStock, move |message| {
                tx.send(message).unwrap();
            });
        });

        {
            let mut garbage = TcpStream::connect(addr).unwrap();
            garbage.write_all(b"not json at all\n").unwrap();
        }

        let mut stream = TcpStream::connect(addr).unwrap();
        stream.send(&Message::req_stock("T1", "05")).unwrap();
        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received.item_code().unwrap(), "05");
    }

    #[test]
    fn unregistered_kind_is_not_fatal() {
        let (tx, rx) = mpsc::channel();
        let (addr, _accept) = started_receiver(|receiver| {
            receiver.register(MessageKind::ReqStock, move |message| {
                tx.send(message).unwrap();
            });
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .send(&Message::resp_prepay("T2", "T1", "02", true))
            .unwrap();
        stream.send(&Message::req_stock("T1", "02")).unwrap();

        // The unhandled message above was logged and skipped
        let received = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(received.kind, MessageKind::ReqStock);
    }
}
