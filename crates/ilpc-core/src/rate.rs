use std::fmt;

use serde::Serialize;

use crate::error::CoreError;

/// Largest decimal exponent accepted when scaling a rate.
const MAX_SCALE_EXPONENT: u32 = 36;

/// An exact, non-negative exchange rate kept as a reduced fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rate {
    pub numerator: u128,
    pub denominator: u128,
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Rate {
    pub const ONE: Rate = Rate {
        numerator: 1,
        denominator: 1,
    };

    /// Build a reduced rate. Fails on a zero denominator.
    pub fn new(numerator: u128, denominator: u128) -> Result<Self, CoreError> {
        if denominator == 0 {
            return Err(CoreError::InvalidRate("denominator must not be zero".into()));
        }
        let divisor = gcd(numerator, denominator).max(1);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    /// Parse a non-negative decimal such as `"0.005"` or `"2"`.
    pub fn from_decimal_str(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };
        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction)
        {
            return Err(CoreError::InvalidRate(format!("not a decimal: {:?}", input)));
        }
        if fraction.len() as u32 > MAX_SCALE_EXPONENT {
            return Err(CoreError::InvalidRate(format!("too many decimals: {}", input)));
        }
        let combined = format!("{}{}", whole, fraction);
        let numerator: u128 = if combined.is_empty() {
            0
        } else {
            combined
                .parse()
                .map_err(|_| CoreError::InvalidRate(format!("out of range: {}", input)))?
        };
        Self::new(numerator, 10u128.pow(fraction.len() as u32))
    }

    /// `1 - self`. Fails if the rate is above one.
    pub fn one_minus(&self) -> Result<Self, CoreError> {
        if self.numerator > self.denominator {
            return Err(CoreError::InvalidRate(format!("{} is greater than 1", self)));
        }
        Self::new(self.denominator - self.numerator, self.denominator)
    }

    /// Multiply by `10^exponent`; negative exponents divide.
    pub fn scaled(&self, exponent: i32) -> Result<Self, CoreError> {
        let magnitude = exponent.unsigned_abs();
        if magnitude > MAX_SCALE_EXPONENT {
            return Err(CoreError::Overflow("rate scale"));
        }
        let factor = 10u128.pow(magnitude);
        if exponent >= 0 {
            let numerator = self
                .numerator
                .checked_mul(factor)
                .ok_or(CoreError::Overflow("rate scale"))?;
            Self::new(numerator, self.denominator)
        } else {
            let denominator = self
                .denominator
                .checked_mul(factor)
                .ok_or(CoreError::Overflow("rate scale"))?;
            Self::new(self.numerator, denominator)
        }
    }

    /// Whether the rate lies within `[0, 1]`.
    pub fn is_unit_interval(&self) -> bool {
        self.numerator <= self.denominator
    }

    /// `floor(amount * self)`. Fails if the result does not fit a `u64`.
    pub fn apply(&self, amount: u64) -> Result<u64, CoreError> {
        let product = (amount as u128)
            .checked_mul(self.numerator)
            .ok_or(CoreError::Overflow("converted amount"))?;
        u64::try_from(product / self.denominator).map_err(|_| CoreError::Overflow("converted amount"))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_keeps_amount() {
        assert_eq!(Rate::ONE.apply(123_456).unwrap(), 123_456);
        assert_eq!(Rate::ONE.apply(u64::MAX).unwrap(), u64::MAX);
    }

    #[test]
    fn test_parse_decimal() {
        let r = Rate::from_decimal_str("0.005").unwrap();
        assert_eq!((r.numerator, r.denominator), (1, 200));
        assert_eq!(Rate::from_decimal_str("2").unwrap(), Rate::new(2, 1).unwrap());
        assert_eq!(Rate::from_decimal_str("0").unwrap().numerator, 0);
        assert!(Rate::from_decimal_str("-1").is_err());
        assert!(Rate::from_decimal_str("1.2.3").is_err());
        assert!(Rate::from_decimal_str(".").is_err());
    }

    #[test]
    fn test_spread_and_scale_floor() {
        let spread = Rate::from_decimal_str("0.01").unwrap();
        let rate = spread.one_minus().unwrap().scaled(-2).unwrap();
        // 1000 * 0.99 / 100 = 9.9, floored
        assert_eq!(rate.apply(1000).unwrap(), 9);
        assert_eq!(Rate::ONE.scaled(3).unwrap().apply(7).unwrap(), 7000);
    }

    #[test]
    fn test_apply_overflow_is_error() {
        let rate = Rate::new(2, 1).unwrap();
        assert!(matches!(rate.apply(u64::MAX), Err(CoreError::Overflow(_))));
    }

    #[test]
    fn test_one_minus_rejects_above_one() {
        assert!(Rate::new(3, 2).unwrap().one_minus().is_err());
        assert!(!Rate::new(3, 2).unwrap().is_unit_interval());
    }
}
