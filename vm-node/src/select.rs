//! Nearest-peer choice over collected stock replies. Pure.

/// One peer's answer to a stock inquiry.
#[derive(Debug, Clone, PartialEq)]
pub struct StockReply {
    pub vm_id: String,
    pub quantity: u8,
    pub x: f64,
    pub y: f64,
}

/// Pick the stock-bearing reply closest to `origin` by Euclidean distance.
///
/// Replies with zero quantity are filtered out. Ties keep the first
/// candidate in input order, so the choice is deterministic. Returns
/// `None` when nothing qualifies.
#[must_use]
pub fn select_nearest(origin: (f64, f64), replies: &[StockReply]) -> Option<&StockReply> {
    let mut best: Option<(&StockReply, f64)> = None;
    for reply in replies.iter().filter(|reply| reply.quantity > 0) {
        let distance = (reply.x - origin.0).hypot(reply.y - origin.1);
        // Strict comparison keeps the earlier reply on a tie
        if best.is_none_or(|(_, nearest)| distance < nearest) {
            best = Some((reply, distance));
        }
    }
    best.map(|(reply, _)| reply)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is ok in test code")]
mod tests {
    use super::*;

    fn reply(vm_id: &str, quantity: u8, x: f64, y: f64) -> StockReply {
        StockReply {
            vm_id: vm_id.to_owned(),
            quantity,
            x,
            y,
        }
    }

    #[test]
    fn picks_nearest_with_stock() {
        let replies = [reply("T2", 3, 20.0, 20.0), reply("T3", 7, 10.0, 30.0)];
        let chosen = select_nearest((10.0, 10.0), &replies).unwrap();
        assert_eq!(chosen.vm_id, "T2");
    }

    #[test]
    fn filters_out_empty_machines() {
        let replies = [reply("T2", 0, 11.0, 10.0), reply("T3", 1, 10.0, 30.0)];
        let chosen = select_nearest((10.0, 10.0), &replies).unwrap();
        assert_eq!(chosen.vm_id, "T3");
    }

    #[test]
    fn tie_break_keeps_input_order() {
        let replies = [reply("T4", 1, 10.0, 20.0), reply("T2", 1, 20.0, 10.0)];
        let chosen = select_nearest((10.0, 10.0), &replies).unwrap();
        assert_eq!(chosen.vm_id, "T4");
    }

    #[test]
    fn empty_or_all_filtered_is_none() {
        assert!(select_nearest((0.0, 0.0), &[]).is_none());
        let replies = [reply("T2", 0, 1.0, 1.0)];
        assert!(select_nearest((0.0, 0.0), &replies).is_none());
    }
}
