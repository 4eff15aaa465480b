//! Fee calculator.
//!
//! Splits an escrowed amount into the platform's commission and the seller's share. All arithmetic is done in integer
//! minor units. The commission is rounded half-to-even on the minor unit and the seller amount is derived by
//! subtraction, so `platform_fee + seller_amount == total_amount` holds exactly for every input.
use std::fmt::Display;

use escrow_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One hundred percent, in basis points.
pub const MAX_COMMISSION_BPS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    #[error("Commission rate of {0} basis points is outside the range 0..=10000")]
    RateOutOfRange(u32),
    #[error("Cannot split a negative amount ({0})")]
    NegativeAmount(Money),
}

//--------------------------------------    CommissionRate     ---------------------------------------------------------
/// A commission rate in basis points (1/100th of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CommissionRate(u32);

impl CommissionRate {
    pub fn from_bps(bps: u32) -> Result<Self, FeeError> {
        if bps > MAX_COMMISSION_BPS {
            return Err(FeeError::RateOutOfRange(bps));
        }
        Ok(Self(bps))
    }

    /// Builds a rate, capping anything above 100% at 100%.
    pub const fn clamped(bps: u32) -> Self {
        if bps > MAX_COMMISSION_BPS {
            Self(MAX_COMMISSION_BPS)
        } else {
            Self(bps)
        }
    }

    pub fn bps(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for CommissionRate {
    type Error = FeeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_bps(value)
    }
}

impl From<CommissionRate> for u32 {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

impl Display for CommissionRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

//--------------------------------------       FeeSplit        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub total_amount: Money,
    pub platform_fee: Money,
    pub seller_amount: Money,
}

/// Splits `total` into the platform fee and the seller's share at the given commission rate.
///
/// The result is deterministic: the same inputs always give the same split.
pub fn split(total: Money, rate: CommissionRate) -> Result<FeeSplit, FeeError> {
    if total.is_negative() {
        return Err(FeeError::NegativeAmount(total));
    }
    let numerator = i128::from(total.value()) * i128::from(rate.bps());
    let fee = round_half_even(numerator, i128::from(MAX_COMMISSION_BPS));
    // fee <= total because rate <= 100%, so this always fits back into an i64
    let platform_fee = Money::from(i64::try_from(fee).unwrap_or(total.value()));
    Ok(FeeSplit { total_amount: total, platform_fee, seller_amount: total - platform_fee })
}

/// Integer division of non-negative values, rounding ties to the even quotient.
fn round_half_even(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    match (remainder * 2).cmp(&denominator) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 == 0 => quotient,
        std::cmp::Ordering::Equal => quotient + 1,
    }
}
