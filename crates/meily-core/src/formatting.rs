//! Small text helpers shared by the user-facing copy.

/// Group digits by thousands with a plain space: `18900` → `18 900`.
pub fn format_price(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(ch);
    }
    out
}

/// Lottery tickets are always shown zero-padded to eight digits.
pub fn format_ticket(ticket: u32) -> String {
    format!("{ticket:08}")
}

/// `part / whole` as a percentage; zero when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_grouping() {
        assert_eq!(format_price(0), "0");
        assert_eq!(format_price(900), "900");
        assert_eq!(format_price(18_900), "18 900");
        assert_eq!(format_price(567_000), "567 000");
        assert_eq!(format_price(1_234_567), "1 234 567");
    }

    #[test]
    fn tickets_are_padded() {
        assert_eq!(format_ticket(10_000_001), "10000001");
        assert_eq!(format_ticket(42), "00000042");
    }

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent(1, 0), 0.0);
        assert_eq!(percent(1, 2), 50.0);
    }
}
