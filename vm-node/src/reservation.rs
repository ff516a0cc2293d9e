//! Authorization-code store for reserved drinks.
//!
//! The machine that grants a reservation owns the code record and the held
//! order. Codes move ACTIVE -> USED exactly once; a replayed redemption
//! fails safely instead of dispensing twice.

use protocol::CERT_CODE_LEN;
use rand::{distributions::Alphanumeric, rngs::StdRng, Rng};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Approved,
    Declined,
}

/// One unit of one drink, promised to a machine's user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub origin_vm: String,
    pub drink_code: String,
    pub quantity: u8,
    pub cert_code: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeStatus {
    Active,
    Used,
}

/// A stored authorization code and the order it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationCode {
    pub status: CodeStatus,
    pub order: Order,
}

/// In-memory mapping of authorization code to held order.
///
/// The randomness source is injected so code generation is seedable in
/// tests (`StdRng::seed_from_u64`).
#[derive(Debug)]
pub struct ReservationStore {
    codes: HashMap<String, ReservationCode>,
    rng: StdRng,
}

impl ReservationStore {
    #[must_use]
    pub fn new(rng: StdRng) -> Self {
        Self {
            codes: HashMap::new(),
            rng,
        }
    }

    /// Fresh 5-character alphanumeric code, uniform over `[A-Za-z0-9]`.
    /// Collisions with stored codes are astronomically rare but checked,
    /// not assumed: regenerate until unused.
    pub fn generate_code(&mut self) -> String {
        loop {
            let code: String = (&mut self.rng)
                .sample_iter(Alphanumeric)
                .take(CERT_CODE_LEN)
                .map(char::from)
                .collect();
            if !self.codes.contains_key(&code) {
                return code;
            }
        }
    }

    /// Upsert: the code becomes (or stays) ACTIVE holding `order`.
    pub fn save(&mut self, code: &str, order: Order) {
        self.codes.insert(
            code.to_owned(),
            ReservationCode {
                status: CodeStatus::Active,
                order,
            },
        );
    }

    #[must_use]
    pub fn find_by_code(&self, code: &str) -> Option<&ReservationCode> {
        self.codes.get(code)
    }

    /// ACTIVE -> USED, one-way. Returns true only on the first transition;
    /// an already-USED or unknown code returns false and changes nothing,
    /// so callers can tell first consumption from a replay.
    pub fn mark_used(&mut self, code: &str) -> bool {
        match self.codes.get_mut(code) {
            Some(held) if held.status == CodeStatus::Active => {
                held.status = CodeStatus::Used;
                true
            }
            _ => false,
        }
    }
}
