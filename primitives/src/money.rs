//! Monetary amounts.
//!
//! Amounts are fixed-point decimals, never binary floats. Intermediate
//! arithmetic keeps full precision; values are rounded half-to-even to
//! [`MONEY_SCALE`] decimal places when they are persisted.

use rust_decimal::{Decimal, RoundingStrategy};

pub use rust_decimal::Decimal as Money;

/// Number of decimal places kept for every persisted amount.
pub const MONEY_SCALE: u32 = 6;

/// The default currency of new billing accounts.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Rounds `amount` to [`MONEY_SCALE`] places using banker's rounding.
pub fn round(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Upper-cases and trims an ISO-4217 currency code.
pub fn normalize_currency(currency: &str) -> String {
    currency.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rounds_half_to_even() {
        let half_down: Decimal = "0.0000005".parse().expect("valid decimal");
        let half_up: Decimal = "0.0000015".parse().expect("valid decimal");
        let plain: Decimal = "12.34567891".parse().expect("valid decimal");

        assert_eq!(Decimal::ZERO, round(half_down));
        assert_eq!(Decimal::new(2, 6), round(half_up));
        assert_eq!(Decimal::new(12_345_679, 6), round(plain));
    }

    #[test]
    fn normalizes_currency_codes() {
        assert_eq!("USD", normalize_currency(" usd "));
    }
}
