use crate::model::{DateRange, Discount, DiscountKind, Money};

/// A price quote for one stay. `discount` is `None` both when no promo
/// code was given and when the code did not resolve to an active
/// discount — unknown codes price silently at full rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub nights: i64,
    pub nightly_rate: Money,
    pub subtotal: Money,
    pub discount: Option<AppliedDiscount>,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDiscount {
    pub code: String,
    pub amount: Money,
}

/// Compute the price of a stay. `subtotal = nights × nightly_rate`;
/// a percentage discount scales the subtotal, a fixed discount is capped
/// at the subtotal. Half-up rounding is applied to the final total only,
/// and the total never goes below zero.
pub fn quote(nightly_rate: Money, stay: &DateRange, promo: Option<(&str, &Discount)>) -> PriceQuote {
    let nights = stay.nights();
    let subtotal = nights * nightly_rate;

    let (discount, total) = match promo {
        Some((code, d)) => {
            let total = discounted_total(subtotal, &d.kind);
            let amount = subtotal - total;
            (
                Some(AppliedDiscount { code: code.to_string(), amount }),
                total,
            )
        }
        None => (None, subtotal),
    };

    PriceQuote { nights, nightly_rate, subtotal, discount, total }
}

fn discounted_total(subtotal: Money, kind: &DiscountKind) -> Money {
    match kind {
        DiscountKind::Percentage(pct) => {
            let remaining_pct = 100i64.saturating_sub(*pct as i64).max(0);
            // Half-up rounding of subtotal × remaining% — the only
            // rounding step in the whole computation.
            (subtotal * remaining_pct + 50) / 100
        }
        DiscountKind::Fixed(amount) => subtotal - (*amount).clamp(0, subtotal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn stay(start: &str, end: &str) -> DateRange {
        DateRange::new(d(start), d(end))
    }

    #[test]
    fn no_promo_is_exact_multiple() {
        let q = quote(5000, &stay("2024-06-01", "2024-06-06"), None);
        assert_eq!(q.nights, 5);
        assert_eq!(q.nightly_rate, 5000);
        assert_eq!(q.subtotal, 25_000);
        assert_eq!(q.discount, None);
        assert_eq!(q.total, 25_000);
    }

    #[test]
    fn ten_percent_off_5000() {
        let disc = Discount::percentage(10);
        let q = quote(1000, &stay("2024-06-01", "2024-06-06"), Some(("SAVE10", &disc)));
        assert_eq!(q.subtotal, 5000);
        let applied = q.discount.unwrap();
        assert_eq!(applied.code, "SAVE10");
        assert_eq!(applied.amount, 500);
        assert_eq!(q.total, 4500);
    }

    #[test]
    fn percentage_rounds_half_up_on_total() {
        // 3 nights × 333 = 999; 15% off → 849.15 exact, rounds to 849
        let disc = Discount::percentage(15);
        let q = quote(333, &stay("2024-06-01", "2024-06-04"), Some(("X", &disc)));
        assert_eq!(q.total, 849);
        assert_eq!(q.discount.unwrap().amount, 150);

        // 1 night × 125 = 125; 50% off → 62.5 exact, half-up to 63
        let disc = Discount::percentage(50);
        let q = quote(125, &stay("2024-06-01", "2024-06-02"), Some(("Y", &disc)));
        assert_eq!(q.total, 63);
        assert_eq!(q.discount.unwrap().amount, 62);
    }

    #[test]
    fn fixed_discount_caps_at_subtotal() {
        let disc = Discount::fixed(4000);
        let q = quote(1000, &stay("2024-06-01", "2024-06-03"), Some(("BIG", &disc)));
        assert_eq!(q.subtotal, 2000);
        assert_eq!(q.discount.unwrap().amount, 2000);
        assert_eq!(q.total, 0);
    }

    #[test]
    fn fixed_discount_simple() {
        let disc = Discount::fixed(500);
        let q = quote(1000, &stay("2024-06-01", "2024-06-04"), Some(("F", &disc)));
        assert_eq!(q.subtotal, 3000);
        assert_eq!(q.discount.unwrap().amount, 500);
        assert_eq!(q.total, 2500);
    }

    #[test]
    fn hundred_percent_floors_at_zero() {
        let disc = Discount::percentage(100);
        let q = quote(1000, &stay("2024-06-01", "2024-06-03"), Some(("FREE", &disc)));
        assert_eq!(q.total, 0);

        // Over 100% clamps rather than going negative
        let disc = Discount::percentage(150);
        let q = quote(1000, &stay("2024-06-01", "2024-06-03"), Some(("BROKEN", &disc)));
        assert_eq!(q.total, 0);
        assert_eq!(q.discount.unwrap().amount, 2000);
    }
}
