#![deny(clippy::unwrap_used, clippy::allow_attributes_without_reason)]
#![warn(clippy::perf, clippy::complexity, clippy::pedantic, clippy::suspicious)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "We're not going to write comprehensive docs"
)]

//! # Vending Fleet - Node Implementation
//!
//! This crate contains one networked vending machine of a cooperating
//! fleet. Machines answer each other's stock inquiries and grant
//! reservations, so a user facing an empty slot can be sent to the nearest
//! peer holding the drink, with a one-time authorization code to redeem
//! there.
//!
//! For the wire protocol, look into the [`protocol`] crate. The node
//! architecture is blocking [`std::net::TcpStream`] IO on worker threads:
//! an accept loop feeds inbound connections to a thread pool, and the
//! [`engine`] module holds the protocol state machine.

use std::thread::{self, JoinHandle};

pub mod config;
pub mod console;
pub mod engine;
pub mod inventory;
pub mod net;
pub mod reservation;
pub mod select;


pub trait ThreadJoin: Sized {
    fn join(self) -> thread::Result<()>;

    fn thread(&self) -> &thread::Thread;

    fn join_and_format_error(self) -> Result<(), String> {
        let name = self.thread().name().unwrap_or("").to_string();
        self.join().map_err(|e| -> String {
            format!(
                "Thread {} panicked, Err: {:?}",
                name,
                e.downcast_ref::<&str>()
            )
        })
    }
}

impl ThreadJoin for JoinHandle<()> {
    fn join(self) -> thread::Result<()> {
        self.join()
    }

    fn thread(&self) -> &thread::Thread {
        self.thread()
    }
}
