//! Decimal helpers for order sizing and pricing.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Smallest price increment for listed equities above $1.
pub const CENT: Decimal = dec!(0.01);

/// Convert a market-data float into a decimal, rejecting NaN and infinities.
pub fn from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
}

/// Round to whole cents, half away from zero.
pub fn round_to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

/// Whole shares `budget` buys at `price`, never less than one.
pub fn whole_shares(budget: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ONE;
    }
    (budget / price).floor().max(Decimal::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_cents() {
        assert_eq!(round_to_cents(dec!(12.345)), dec!(12.35));
        assert_eq!(round_to_cents(dec!(12.344)), dec!(12.34));
        assert_eq!(round_to_cents(dec!(0.005)), dec!(0.01));
    }

    #[test]
    fn test_whole_shares() {
        assert_eq!(whole_shares(dec!(30), dec!(12.40)), dec!(2));
        assert_eq!(whole_shares(dec!(5), dec!(12.40)), dec!(1));
        assert_eq!(whole_shares(dec!(24.80), dec!(12.40)), dec!(2));
        assert_eq!(whole_shares(dec!(30), Decimal::ZERO), dec!(1));
    }

    #[test]
    fn test_from_f64_rejects_non_finite() {
        assert!(from_f64(f64::NAN).is_none());
        assert!(from_f64(f64::INFINITY).is_none());
        assert_eq!(from_f64(12.5), Some(dec!(12.5)));
    }
}
