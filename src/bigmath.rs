/// Arbitrary-precision helpers shared by the position ledger and PnL
/// calculator. Token amounts, cost basis and PnL are never passed through
/// floating point; percentages are computed with a fixed `10^30` scaling
/// factor and reduced to a 6-fractional-digit display value by
/// truncation.
use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use once_cell::sync::Lazy;
use std::fmt;

/// Scaling factor applied to numerators before integer division, to
/// preserve sub-unit precision.
pub static SCALE_30: Lazy<BigInt> = Lazy::new(|| BigInt::from(10).pow(30));
/// Scale of the fixed-point percentage display value (6 fractional digits).
pub static SCALE_6: Lazy<BigInt> = Lazy::new(|| BigInt::from(10).pow(6));
/// `SCALE_30 / SCALE_6`, the reduction factor from 1e30-scaled to 1e6-scaled.
static REDUCTION: Lazy<BigInt> = Lazy::new(|| &*SCALE_30 / &*SCALE_6);

/// `numerator * 10^30 / denominator`, truncating toward zero. Callers divide
/// by further scale factors afterward; the scaling preserves precision that
/// plain integer division would otherwise discard.
pub fn ratio_scaled_1e30(numerator: &BigInt, denominator: &BigInt) -> BigInt {
    (numerator * &*SCALE_30) / denominator
}

/// Divides `numerator` by `denominator`, rounding half-to-even, returning a
/// plain (unscaled) `BigInt` quotient.
pub fn round_half_even_div(numerator: &BigInt, denominator: &BigInt) -> BigInt {
    let denominator = denominator.abs();
    let (quotient, remainder) = {
        let q = numerator / &denominator;
        let r = numerator - &q * &denominator;
        (q, r)
    };
    let twice_remainder = remainder.abs() * BigInt::from(2);
    match twice_remainder.cmp(&denominator) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => bump_away_from_zero(quotient, numerator),
        std::cmp::Ordering::Equal => {
            // Exactly half: round to even.
            if quotient.is_even() {
                quotient
            } else {
                bump_away_from_zero(quotient, numerator)
            }
        }
    }
}

fn bump_away_from_zero(quotient: BigInt, numerator: &BigInt) -> BigInt {
    if numerator.sign() == Sign::Minus {
        quotient - 1
    } else {
        quotient + 1
    }
}

trait IsEven {
    fn is_even(&self) -> bool;
}

impl IsEven for BigInt {
    fn is_even(&self) -> bool {
        (self % BigInt::from(2)).is_zero()
    }
}

/// A percentage represented as an integer count of millionths (6 fractional
/// digits), e.g. `12_166_666` means `12.166666%`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPercentage(pub BigInt);

impl FixedPercentage {
    pub fn zero() -> Self {
        FixedPercentage(BigInt::zero())
    }

    /// Builds a `FixedPercentage` from a value already scaled by `10^30`,
    /// reducing it to 6 fractional digits.
    ///
    /// Truncates toward zero rather than rounding half-to-even: known
    /// recurring-decimal APR values (e.g. `73/6 %`) are expected at their
    /// truncated display value, and `ratio_scaled_1e30` already applies
    /// the only precision-preserving step division needs.
    pub fn from_scaled_1e30(value: &BigInt) -> Self {
        FixedPercentage(value / &*REDUCTION)
    }
}

impl fmt::Display for FixedPercentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0.sign() == Sign::Minus;
        let magnitude = self.0.abs();
        let int_part = &magnitude / &*SCALE_6;
        let frac_part = &magnitude % &*SCALE_6;
        if negative && !magnitude.is_zero() {
            write!(f, "-")?;
        }
        write!(f, "{int_part}.{frac_part:0>6}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even_basic_cases() {
        assert_eq!(round_half_even_div(&BigInt::from(5), &BigInt::from(2)), BigInt::from(2)); // 2.5 -> 2
        assert_eq!(round_half_even_div(&BigInt::from(7), &BigInt::from(2)), BigInt::from(4)); // 3.5 -> 4
        assert_eq!(round_half_even_div(&BigInt::from(-5), &BigInt::from(2)), BigInt::from(-2));
    }

    #[test]
    fn test_single_period_apr() {
        // costBasis=1_000_000, fees=10_000, duration=30 days -> 12.166666%
        let cost_basis = BigInt::from(1_000_000);
        let fees = BigInt::from(10_000);
        let duration_seconds = BigInt::from(30i64 * 86_400);
        let seconds_per_year = BigInt::from(365i64 * 86_400);

        let ratio = ratio_scaled_1e30(&fees, &cost_basis);
        let annualized = (ratio * &seconds_per_year) / &duration_seconds;
        let pct_scaled = annualized * BigInt::from(100);
        let pct = FixedPercentage::from_scaled_1e30(&pct_scaled);
        assert_eq!(pct.to_string(), "12.166666");
    }

    #[test]
    fn test_display_formats_six_fractional_digits() {
        let pct = FixedPercentage(BigInt::from(1_500_000)); // 1.5%
        assert_eq!(pct.to_string(), "1.500000");
    }

    #[test]
    fn test_zero_display() {
        assert_eq!(FixedPercentage::zero().to_string(), "0.000000");
    }
}
