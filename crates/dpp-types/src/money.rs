//! USD_MICROS: the only money representation permitted in this system.
//!
//! A `Money` is an integer count of micros (1/1,000,000 of the base currency
//! unit). Floating point never touches a code path that moves money.

use std::fmt;

use thiserror::Error;

/// Micros per base currency unit (1 USD = 1,000,000 micros).
pub const MICROS_PER_UNIT: i64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyParseError {
    #[error("empty amount string")]
    Empty,
    #[error("amount has more than 4 fractional digits: {0:?}")]
    TooManyFractionalDigits(String),
    #[error("amount is not a valid fixed-point decimal: {0:?}")]
    NotDecimal(String),
    #[error("amount overflows micros representation: {0:?}")]
    Overflow(String),
}

/// An integer amount of USD micros. Copy, ordered, and arithmetic-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_micros(micros: i64) -> Self {
        Money(micros)
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Parses a fixed-point decimal string with at most 4 fractional digits
    /// (e.g. `"0.2000"`, `"12.5"`, `"3"`) into micros. This is the wire format
    /// used by `reservation.max_cost_usd`.
    pub fn parse_decimal(s: &str) -> Result<Self, MoneyParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MoneyParseError::Empty);
        }

        let (neg, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let mut parts = s.splitn(2, '.');
        let int_part = parts.next().unwrap_or("");
        let frac_part = parts.next().unwrap_or("");

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(MoneyParseError::NotDecimal(s.to_string()));
        }
        if !int_part.is_empty() && !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MoneyParseError::NotDecimal(s.to_string()));
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MoneyParseError::NotDecimal(s.to_string()));
        }
        if frac_part.len() > 4 {
            return Err(MoneyParseError::TooManyFractionalDigits(s.to_string()));
        }

        let int_value: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| MoneyParseError::Overflow(s.to_string()))?
        };

        // Pad the fractional part out to 6 digits (micros resolution).
        let mut padded = frac_part.to_string();
        while padded.len() < 6 {
            padded.push('0');
        }
        let frac_value: i64 = if padded.is_empty() {
            0
        } else {
            padded
                .parse()
                .map_err(|_| MoneyParseError::Overflow(s.to_string()))?
        };

        let whole = int_value
            .checked_mul(MICROS_PER_UNIT)
            .ok_or_else(|| MoneyParseError::Overflow(s.to_string()))?;
        let micros = whole
            .checked_add(frac_value)
            .ok_or_else(|| MoneyParseError::Overflow(s.to_string()))?;

        Ok(Money(if neg { -micros } else { micros }))
    }

    /// Formats back to a fixed-point decimal string with exactly 4 fractional
    /// digits. This is the identity inverse of `parse_decimal` on values that
    /// `parse_decimal` itself produced.
    pub fn format_4dp(self) -> String {
        let neg = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let whole = abs / (MICROS_PER_UNIT as u64);
        let rem_micros = abs % (MICROS_PER_UNIT as u64);
        // 4 fractional digits = hundredths-of-a-cent resolution = 100 micros.
        let frac_hundredths_of_cent = rem_micros / 100;
        format!(
            "{}{}.{:04}",
            if neg { "-" } else { "" },
            whole,
            frac_hundredths_of_cent
        )
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Clamps `self` into `[lo, hi]`.
    pub fn clamp(self, lo: Money, hi: Money) -> Money {
        if self < lo {
            lo
        } else if self > hi {
            hi
        } else {
            self
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_4dp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(Money::parse_decimal("0.2000").unwrap().micros(), 200_000);
        assert_eq!(Money::parse_decimal("12.5").unwrap().micros(), 12_500_000);
        assert_eq!(Money::parse_decimal("3").unwrap().micros(), 3_000_000);
        assert_eq!(Money::parse_decimal(".5").unwrap().micros(), 500_000);
    }

    #[test]
    fn rejects_too_many_fractional_digits() {
        assert_eq!(
            Money::parse_decimal("1.23456"),
            Err(MoneyParseError::TooManyFractionalDigits("1.23456".into()))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Money::parse_decimal("abc").is_err());
        assert!(Money::parse_decimal("").is_err());
        assert!(Money::parse_decimal("1.2.3").is_err());
    }

    #[test]
    fn format_round_trips_identity_on_representable_values() {
        for s in ["0.2000", "12.5000", "3.0000", "0.0001", "100.0000"] {
            let m = Money::parse_decimal(s).unwrap();
            assert_eq!(m.format_4dp(), s);
        }
    }

    #[test]
    fn clamp_bounds_correctly() {
        let lo = Money::from_micros(0);
        let hi = Money::from_micros(100);
        assert_eq!(Money::from_micros(-5).clamp(lo, hi), lo);
        assert_eq!(Money::from_micros(500).clamp(lo, hi), hi);
        assert_eq!(Money::from_micros(50).clamp(lo, hi), Money::from_micros(50));
    }
}
