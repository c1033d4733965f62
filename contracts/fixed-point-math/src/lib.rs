//! Fixed-point helpers shared by the lending risk contracts.
//!
//! Prices and probabilities are 18-decimal fixed-point values over `[0, PRICE_SCALE]`,
//! loan currency amounts carry 6 decimals, and every ratio is expressed in basis
//! points over [`BPS_DENOMINATOR`]. All helpers return `None` instead of wrapping or
//! panicking so callers can map the failure onto their own error type.

#![no_std]

use soroban_sdk::{Env, I256};

/// 1.0 in price fixed-point (18 decimals)
pub const PRICE_SCALE: i128 = 1_000_000_000_000_000_000;

/// Fractional digits of a price value
pub const PRICE_DECIMALS: u32 = 18;

/// Fractional digits of a loan currency amount
pub const LOAN_DECIMALS: u32 = 6;

/// Basis point denominator (10000 = 100%)
pub const BPS_DENOMINATOR: i128 = 10_000;

/// Computes `a * b / denominator` with a 256-bit intermediate product.
///
/// Returns `None` when the denominator is zero or the quotient does not fit in an `i128`.
pub fn mul_div(env: &Env, a: i128, b: i128, denominator: i128) -> Option<i128> {
    if denominator == 0 {
        return None;
    }

    let product = I256::from_i128(env, a).mul(&I256::from_i128(env, b));
    product.div(&I256::from_i128(env, denominator)).to_i128()
}

/// `amount * bps / 10000`.
pub fn apply_bps(amount: i128, bps: u32) -> Option<i128> {
    amount
        .checked_mul(bps as i128)?
        .checked_div(BPS_DENOMINATOR)
}

/// `amount * (10000 + bps) / 10000`, i.e. the amount grown by `bps`.
pub fn add_bps(amount: i128, bps: u32) -> Option<i128> {
    let factor = BPS_DENOMINATOR.checked_add(bps as i128)?;
    amount.checked_mul(factor)?.checked_div(BPS_DENOMINATOR)
}

/// Moves `amount` from `from_decimals` fractional digits to `to_decimals`.
///
/// Narrowing truncates toward zero.
pub fn rescale(amount: i128, from_decimals: u32, to_decimals: u32) -> Option<i128> {
    if from_decimals == to_decimals {
        return Some(amount);
    }

    if to_decimals > from_decimals {
        let factor = 10i128.checked_pow(to_decimals - from_decimals)?;
        amount.checked_mul(factor)
    } else {
        let factor = 10i128.checked_pow(from_decimals - to_decimals)?;
        amount.checked_div(factor)
    }
}

/// Absolute difference of two values.
pub fn abs_diff(a: i128, b: i128) -> Option<i128> {
    a.checked_sub(b)?.checked_abs()
}

/// Relative deviation of `value` from `reference` in basis points.
///
/// `None` when the reference is not strictly positive.
pub fn deviation_bps(value: i128, reference: i128) -> Option<i128> {
    if reference <= 0 {
        return None;
    }

    abs_diff(value, reference)?
        .checked_mul(BPS_DENOMINATOR)?
        .checked_div(reference)
}
