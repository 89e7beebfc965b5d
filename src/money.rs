//! Fixed-point helpers for splitting monetary amounts.
//!
//! Ledger amounts are [Decimal] values rounded to two decimal places.
//! Splitting an amount across revenue streams or installments must not
//! create or lose money, so every split in this module makes the final
//! share absorb the rounding remainder: the shares always sum back to
//! the input exactly.

use rust_decimal::Decimal;

/// The number of decimal places a ledger amount is rounded to.
pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Round `amount` to the ledger's monetary precision.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp(MONEY_DECIMAL_PLACES)
}

/// Split `total` into one share per weight, proportionally to `weights`.
///
/// Each share except the last is `total * weight / sum(weights)` rounded
/// to the monetary precision. The last share is the remainder, so the
/// shares sum to `total` exactly.
///
/// Returns an empty vector when `weights` is empty or sums to zero,
/// since no proportion can be derived.
pub fn split_proportionally(total: Decimal, weights: &[Decimal]) -> Vec<Decimal> {
    let weight_sum: Decimal = weights.iter().sum();

    if weights.is_empty() || weight_sum.is_zero() {
        return Vec::new();
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut allocated = Decimal::ZERO;

    for weight in &weights[..weights.len() - 1] {
        let share = round_money(total * weight / weight_sum);
        allocated += share;
        shares.push(share);
    }

    shares.push(total - allocated);
    shares
}

/// Split `total` into `parts` equal shares.
///
/// Shares are rounded to the monetary precision and the last share
/// absorbs the rounding remainder, so the shares sum to `total` exactly.
///
/// Returns an empty vector when `parts` is zero.
pub fn split_evenly(total: Decimal, parts: u32) -> Vec<Decimal> {
    if parts == 0 {
        return Vec::new();
    }

    let share = round_money(total / Decimal::from(parts));
    let mut shares = vec![share; parts as usize - 1];
    shares.push(total - share * Decimal::from(parts - 1));
    shares
}
