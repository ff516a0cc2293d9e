//! Drink stock owned by one machine.
//!
//! The store is exclusively owned: peers never see it except through
//! protocol messages. The coordination engine wraps it in a mutex so
//! check-and-decrement is one atomic step against concurrent reservations.

use std::collections::HashMap;

/// Slot capacity of the physical machine.
pub const MAX_QUANTITY: u8 = 99;

/// Per-machine mapping of drink code to remaining quantity.
#[derive(Debug, Default)]
pub struct Inventory {
    stock: HashMap<String, u8>,
}

impl Inventory {
    /// Build from initial records. Quantities are clamped to
    /// `[0, MAX_QUANTITY]` here and only here; runtime decrements below
    /// zero are rejected, not clamped.
    pub fn new(records: impl IntoIterator<Item = (String, u8)>) -> Self {
        Self {
            stock: records
                .into_iter()
                .map(|(code, quantity)| (code, quantity.min(MAX_QUANTITY)))
                .collect(),
        }
    }

    /// Whether this machine carries the drink at all, in stock or not.
    #[must_use]
    pub fn is_handled(&self, code: &str) -> bool {
        self.stock.contains_key(code)
    }

    /// False for unhandled codes as well as empty slots.
    #[must_use]
    pub fn has_stock(&self, code: &str) -> bool {
        self.quantity(code) > 0
    }

    /// Remaining units; 0 for unhandled codes.
    #[must_use]
    pub fn quantity(&self, code: &str) -> u8 {
        self.stock.get(code).copied().unwrap_or(0)
    }

    /// Remove one unit. Returns true iff a unit was actually removed;
    /// false when the code is unhandled or already at zero. Never panics,
    /// this sits on the hot reservation path.
    pub fn decrement_by_one(&mut self, code: &str) -> bool {
        match self.stock.get_mut(code) {
            Some(quantity) if *quantity > 0 => {
                *quantity -= 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is ok in test code")]
mod tests {
    use super::*;

    fn inventory(records: &[(&str, u8)]) -> Inventory {
        Inventory::new(
            records
                .iter()
                .map(|(code, quantity)| ((*code).to_owned(), *quantity)),
        )
    }

    #[test]
    fn queries() {
        let inventory = inventory(&[("02", 3), ("05", 0)]);
        assert!(inventory.is_handled("02"));
        assert!(inventory.is_handled("05"));
        assert!(!inventory.is_handled("99"));
        assert!(inventory.has_stock("02"));
        assert!(!inventory.has_stock("05"));
        assert!(!inventory.has_stock("99"));
        assert_eq!(inventory.quantity("02"), 3);
        assert_eq!(inventory.quantity("99"), 0);
    }

    #[test]
    fn decrement_floor_at_zero() {
        let mut inventory = inventory(&[("02", 1)]);
        assert!(inventory.decrement_by_one("02"));
        assert_eq!(inventory.quantity("02"), 0);
        // Already empty: refused, quantity stays at zero
        assert!(!inventory.decrement_by_one("02"));
        assert_eq!(inventory.quantity("02"), 0);
        assert!(!inventory.decrement_by_one("unhandled"));
    }

    #[test]
    fn construction_clamps_to_slot_capacity() {
        let inventory = inventory(&[("02", 200)]);
        assert_eq!(inventory.quantity("02"), MAX_QUANTITY);
    }
}
