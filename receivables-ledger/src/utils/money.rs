//! Exact currency arithmetic on `rust_decimal::Decimal`.
//!
//! Every value that gets stored is rounded to two fractional digits with
//! round-half-up. Epsilon comparison exists only for legacy float input.

use crate::error::LedgerError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits kept for stored amounts.
pub const MONEY_SCALE: u32 = 2;

/// Fractional digits kept for item quantities.
pub const QUANTITY_SCALE: u32 = 3;

/// Tolerance used when comparing against legacy floating-point data.
pub fn legacy_epsilon() -> Decimal {
    Decimal::new(1, MONEY_SCALE)
}

/// Round half-up (away from zero) to two decimals.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `quantity × unit_price`, rounded.
pub fn line_amount(quantity: Decimal, unit_price: Decimal) -> Decimal {
    round_money(quantity * unit_price)
}

/// `amount × rate_percent / 100`, rounded. Used for VAT.
pub fn percentage_of(amount: Decimal, rate_percent: Decimal) -> Decimal {
    round_money(amount * rate_percent / Decimal::ONE_HUNDRED)
}

/// Reject amounts carrying more precision than a stored value can hold.
pub fn ensure_money_scale(value: Decimal, field: &str) -> Result<(), LedgerError> {
    if value.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::validation(format!(
            "{} must have at most {} decimal places, got {}",
            field, MONEY_SCALE, value
        )));
    }
    Ok(())
}

/// Strictly positive, two-decimal amount.
pub fn ensure_positive_amount(value: Decimal, field: &str) -> Result<(), LedgerError> {
    if value <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    ensure_money_scale(value, field)
}

/// Convert a legacy float amount at the system boundary.
pub fn from_legacy_f64(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(round_money)
}

/// Equality within [`legacy_epsilon`], for comparing against imported data.
pub fn approx_eq_legacy(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() < legacy_epsilon()
}
