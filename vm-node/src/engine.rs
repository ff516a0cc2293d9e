//! # Coordination Engine
//!
//! The protocol state machine of one machine. Two roles run concurrently:
//! the initiator side (broadcast a stock inquiry, collect replies over a
//! bounded window, reserve at the nearest peer) and the responder side
//! (answer inquiries from local stock, grant reservations atomically).
//!
//! Per-inquiry state lives in correlation tables keyed by drink code plus
//! a sequence number; entries are released by drop guards, so a timed-out
//! or abandoned inquiry cannot be resurrected by a late reply.

use crate::{
    config::Config,
    console,
    inventory::Inventory,
    net::{DeliveryError, Sender},
    reservation::{Order, OrderStatus, ReservationStore},
    select::{select_nearest, StockReply},
};
use protocol::{Message, MessageKind, CERT_CODE_LEN};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReserveError {
    #[error("No peer reported stock for drink {0:?}")]
    NoStockFound(String),
    #[error("An inquiry for drink {0:?} is already in flight")]
    InquiryInFlight(String),
    #[error("Peer {peer_id} declined the reservation")]
    Declined { peer_id: String },
    #[error("Peer {peer_id} did not acknowledge the reservation in time")]
    Timeout { peer_id: String },
    #[error("Could not deliver the reservation request to peer {peer_id}")]
    Delivery {
        peer_id: String,
        source: DeliveryError,
    },
}

#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("Authorization code {0:?} is not a well-formed code")]
    InvalidCode(String),
    #[error("Authorization code {0:?} is not known at this machine")]
    NotFound(String),
    #[error("Authorization code {0:?} has already been used")]
    AlreadyUsed(String),
}

/// Successful reservation: where to walk, and the code to present there.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub peer_id: String,
    pub x: f64,
    pub y: f64,
    pub cert_code: String,
}

/// A drink released by redeeming an authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispense {
    pub drink_code: String,
    pub quantity: u8,
}

struct StockInquiry {
    seq: u64,
    tx: mpsc::Sender<StockReply>,
}

/// Ack correlation key: the wire carries no inquiry id, so a pending
/// reservation is identified by the peer it was sent to plus the drink.
type AckKey = (String, String);

pub struct Engine {
    vm_id: String,
    x: f64,
    y: f64,
    discovery_window: Duration,
    reservation_timeout: Duration,
    sender: Sender,
    inventory: Mutex<Inventory>,
    reservations: Mutex<ReservationStore>,
    orders: Mutex<Vec<Order>>,
    inquiries: Mutex<HashMap<String, StockInquiry>>,
    acks: Mutex<HashMap<AckKey, mpsc::Sender<bool>>>,
    seq: AtomicU64,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: &Config,
        inventory: Inventory,
        reservations: ReservationStore,
        sender: Sender,
    ) -> Self {
        Self {
            vm_id: config.id.clone(),
            x: config.coor_x,
            y: config.coor_y,
            discovery_window: config.discovery_window,
            reservation_timeout: config.reservation_timeout,
            sender,
            inventory: Mutex::new(inventory),
            reservations: Mutex::new(reservations),
            orders: Mutex::new(Vec::new()),
            inquiries: Mutex::new(HashMap::new()),
            acks: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Register the four kind handlers on a receiver.
    pub fn register_handlers(self: &std::sync::Arc<Self>, receiver: &mut crate::net::Receiver) {
        let engine = std::sync::Arc::clone(self);
        receiver.register(MessageKind::ReqStock, move |m| engine.handle_req_stock(&m));
        let engine = std::sync::Arc::clone(self);
        receiver.register(MessageKind::RespStock, move |m| engine.handle_resp_stock(&m));
        let engine = std::sync::Arc::clone(self);
        receiver.register(MessageKind::ReqPrepay, move |m| engine.handle_req_prepay(&m));
        let engine = std::sync::Arc::clone(self);
        receiver.register(MessageKind::RespPrepay, move |m| {
            engine.handle_resp_prepay(&m);
        });
    }

    /// Remaining local stock; used by the wrapping machine logic to decide
    /// whether a peer inquiry is needed at all.
    #[must_use]
    pub fn quantity_of(&self, item_code: &str) -> u8 {
        self.lock_inventory().quantity(item_code)
    }

    /// Local orders, newest last.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock(&self.orders).clone()
    }

    /// # Initiator: find a peer with stock and reserve one unit there
    ///
    /// Broadcasts `REQ_STOCK`, collects replies over the discovery window
    /// (correct under 0, 1 or N replies in any order), picks the nearest
    /// stock-bearing peer, and makes exactly one reservation attempt.
    /// An unreachable peer and a silent one look identical here: the
    /// degraded case is always "no reply within the window".
    pub fn find_and_reserve(&self, item_code: &str) -> Result<Reservation, ReserveError> {
        let replies = self.collect_stock_replies(item_code)?;
        console::debug!(
            "Inquiry for {item_code} collected {} replies",
            replies.len()
        );
        let Some(nearest) = select_nearest((self.x, self.y), &replies).cloned() else {
            return Err(ReserveError::NoStockFound(item_code.to_owned()));
        };
        self.reserve_at(&nearest, item_code)
    }

    /// # Redeem an authorization code granted by this machine
    ///
    /// Find and mark-used happen under one store lock, so two concurrent
    /// redemptions of the same code cannot both observe it ACTIVE; the
    /// loser of that race is reported as already used, same as a replay.
    pub fn redeem(&self, code: &str) -> Result<Dispense, RedeemError> {
        if code.len() != CERT_CODE_LEN || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RedeemError::InvalidCode(code.to_owned()));
        }

        let mut store = self.lock_reservations();
        let Some(held) = store.find_by_code(code) else {
            return Err(RedeemError::NotFound(code.to_owned()));
        };
        let dispense = Dispense {
            drink_code: held.order.drink_code.clone(),
            quantity: held.order.quantity,
        };
        if store.mark_used(code) {
            console::log!("Code {code} redeemed, dispensing {}", dispense.drink_code);
            Ok(dispense)
        } else {
            Err(RedeemError::AlreadyUsed(code.to_owned()))
        }
    }

    fn collect_stock_replies(&self, item_code: &str) -> Result<Vec<StockReply>, ReserveError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        {
            let mut inquiries = self.lock(&self.inquiries);
            if inquiries.contains_key(item_code) {
                return Err(ReserveError::InquiryInFlight(item_code.to_owned()));
            }
            inquiries.insert(item_code.to_owned(), StockInquiry { seq, tx });
        }
        // Released on every exit path, so replies arriving after the
        // window (or after abandonment) find no entry and are dropped
        let _guard = InquiryGuard {
            inquiries: &self.inquiries,
            item_code,
            seq,
        };

        if let Err(e) = self.sender.send(&Message::req_stock(&self.vm_id, item_code)) {
            console::error!(&e, "Stock inquiry broadcast failed");
        }

        let mut replies = Vec::new();
        let deadline = Instant::now() + self.discovery_window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(reply) => replies.push(reply),
                Err(_) => break,
            }
        }
        Ok(replies)
    }

    /// Single reservation attempt at the selected peer. Retry, if wanted,
    /// is the caller's policy.
    fn reserve_at(&self, peer: &StockReply, item_code: &str) -> Result<Reservation, ReserveError> {
        let cert_code = self.lock_reservations().generate_code();

        let (tx, rx) = mpsc::channel();
        let key: AckKey = (peer.vm_id.clone(), item_code.to_owned());
        {
            let mut acks = self.lock(&self.acks);
            if acks.contains_key(&key) {
                return Err(ReserveError::InquiryInFlight(item_code.to_owned()));
            }
            acks.insert(key.clone(), tx);
        }
        let _guard = AckGuard {
            acks: &self.acks,
            key: &key,
        };

        let order_index = self.push_order(Order {
            origin_vm: self.vm_id.clone(),
            drink_code: item_code.to_owned(),
            quantity: 1,
            cert_code: cert_code.clone(),
            status: OrderStatus::Pending,
        });

        let request = Message::req_prepay(&self.vm_id, &peer.vm_id, item_code, &cert_code);
        if let Err(e) = self.sender.send(&request) {
            self.finish_order(order_index, OrderStatus::Declined);
            return Err(ReserveError::Delivery {
                peer_id: peer.vm_id.clone(),
                source: e,
            });
        }

        match rx.recv_timeout(self.reservation_timeout) {
            Ok(true) => {
                self.finish_order(order_index, OrderStatus::Approved);
                console::log!(
                    "Reserved {item_code} at {} under code {cert_code}",
                    peer.vm_id
                );
                Ok(Reservation {
                    peer_id: peer.vm_id.clone(),
                    x: peer.x,
                    y: peer.y,
                    cert_code,
                })
            }
            Ok(false) => {
                self.finish_order(order_index, OrderStatus::Declined);
                Err(ReserveError::Declined {
                    peer_id: peer.vm_id.clone(),
                })
            }
            Err(_) => {
                self.finish_order(order_index, OrderStatus::Declined);
                Err(ReserveError::Timeout {
                    peer_id: peer.vm_id.clone(),
                })
            }
        }
    }

    /// # Responder: answer a stock inquiry
    /// A query, not a reservation: no inventory side effects.
    fn handle_req_stock(&self, message: &Message) {
        let item_code = match message.item_code() {
            Ok(code) => code,
            Err(e) => {
                console::error!(&e, "Dropping REQ_STOCK from {}", message.source_id);
                return;
            }
        };
        let quantity = self.lock_inventory().quantity(item_code);
        let reply = Message::resp_stock(
            &self.vm_id,
            &message.source_id,
            item_code,
            quantity,
            self.x,
            self.y,
        );
        if let Err(e) = self.sender.send(&reply) {
            console::error!(&e, "Failed to answer stock inquiry from {}", message.source_id);
        }
    }

    /// # Initiator: route a stock reply into its open inquiry
    fn handle_resp_stock(&self, message: &Message) {
        let parsed = message
            .item_code()
            .map(str::to_owned)
            .and_then(|code| Ok((code, message.quantity()?, message.coordinates()?)));
        let (item_code, quantity, (x, y)) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                console::error!(&e, "Dropping RESP_STOCK from {}", message.source_id);
                return;
            }
        };

        match self.lock(&self.inquiries).get(&item_code) {
            Some(inquiry) => {
                // Collector may have just left; a dead channel is the same
                // as a closed inquiry
                let _ = inquiry.tx.send(StockReply {
                    vm_id: message.source_id.clone(),
                    quantity,
                    x,
                    y,
                });
            }
            None => console::debug!(
                "Stale RESP_STOCK for {item_code} from {}",
                message.source_id
            ),
        }
    }

    /// # Responder: grant or refuse a reservation
    ///
    /// Check-and-decrement happens under the inventory lock: two
    /// simultaneous requests for the last unit cannot both succeed. A
    /// drink this machine does not carry is refused the same way as an
    /// empty slot.
    fn handle_req_prepay(&self, message: &Message) {
        let parsed = message
            .item_code()
            .map(str::to_owned)
            .and_then(|code| Ok((code, message.quantity()?, message.cert_code()?.to_owned())));
        let (item_code, quantity, cert_code) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                console::error!(&e, "Dropping REQ_PREPAY from {}", message.source_id);
                return;
            }
        };

        // One order is one drink; reject rather than trust the field
        let granted = quantity == 1 && self.lock_inventory().decrement_by_one(&item_code);
        if granted {
            self.lock_reservations().save(
                &cert_code,
                Order {
                    origin_vm: message.source_id.clone(),
                    drink_code: item_code.clone(),
                    quantity: 1,
                    cert_code: cert_code.clone(),
                    status: OrderStatus::Approved,
                },
            );
            console::log!(
                "Holding one {item_code} for {} under code {cert_code}",
                message.source_id
            );
        }

        let reply = Message::resp_prepay(&self.vm_id, &message.source_id, &item_code, granted);
        if let Err(e) = self.sender.send(&reply) {
            console::error!(&e, "Failed to answer reservation from {}", message.source_id);
        }
    }

    /// # Initiator: route a reservation verdict into its pending attempt
    fn handle_resp_prepay(&self, message: &Message) {
        let parsed = message
            .item_code()
            .map(str::to_owned)
            .and_then(|code| Ok((code, message.availability()?)));
        let (item_code, available) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                console::error!(&e, "Dropping RESP_PREPAY from {}", message.source_id);
                return;
            }
        };

        let key: AckKey = (message.source_id.clone(), item_code.clone());
        match self.lock(&self.acks).get(&key) {
            Some(tx) => {
                let _ = tx.send(available);
            }
            None => console::debug!(
                "Stale RESP_PREPAY for {item_code} from {}",
                message.source_id
            ),
        }
    }

    fn push_order(&self, order: Order) -> usize {
        let mut orders = self.lock(&self.orders);
        orders.push(order);
        orders.len() - 1
    }

    fn finish_order(&self, index: usize, status: OrderStatus) {
        let mut orders = self.lock(&self.orders);
        if let Some(order) = orders.get_mut(index) {
            // Terminal orders are immutable
            if order.status == OrderStatus::Pending {
                order.status = status;
            }
        }
    }

    fn lock_inventory(&self) -> MutexGuard<'_, Inventory> {
        self.lock(&self.inventory)
    }

    fn lock_reservations(&self) -> MutexGuard<'_, ReservationStore> {
        self.lock(&self.reservations)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        // A panicked handler must not wedge the whole machine
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct InquiryGuard<'a> {
    inquiries: &'a Mutex<HashMap<String, StockInquiry>>,
    item_code: &'a str,
    seq: u64,
}

impl Drop for InquiryGuard<'_> {
    fn drop(&mut self) {
        let mut inquiries = self
            .inquiries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inquiries
            .get(self.item_code)
            .is_some_and(|inquiry| inquiry.seq == self.seq)
        {
            inquiries.remove(self.item_code);
        }
    }
}

struct AckGuard<'a> {
    acks: &'a Mutex<HashMap<AckKey, mpsc::Sender<bool>>>,
    key: &'a AckKey,
}

impl Drop for AckGuard<'_> {
    fn drop(&mut self) {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}
