//! Lottery ticket numbers awarded for an accepted receipt.

use std::collections::HashSet;

use rand::Rng;

/// Tickets issued per purchased unit.
pub const TICKETS_PER_UNIT: u32 = 3;

const TICKET_MIN: u32 = 10_000_000;
const TICKET_MAX: u32 = 99_999_999;

/// Draw `count` distinct eight-digit ticket numbers.
pub fn draw_tickets<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<u32> {
    let mut seen = HashSet::with_capacity(count);
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let ticket = rng.gen_range(TICKET_MIN..=TICKET_MAX);
        if seen.insert(ticket) {
            out.push(ticket);
        }
    }
    out
}

pub fn tickets_for_quantity(quantity: u32) -> usize {
    (quantity * TICKETS_PER_UNIT) as usize
}
