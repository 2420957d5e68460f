//! Fixed-point decimal amounts
//!
//! The off-chain ledger stores amounts as decimal strings. They are carried
//! as integers scaled by 10^18; every conversion that loses digits truncates
//! toward zero.

use crate::{Error, Result};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Fractional digits carried internally
pub const SCALE: u32 = 18;

const MAX_EXPONENT: i64 = 256;

fn pow10(exp: u32) -> BigInt {
    BigInt::from(10u32).pow(exp)
}

/// Signed digits and power of ten of a decimal string, with no rounding
fn parse_exact(raw: &str) -> Result<(BigInt, i64)> {
    let invalid = || Error::InvalidAmount(raw.to_string());
    let text = raw.trim();

    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (mantissa, exponent) = match unsigned.find(|c: char| c == 'e' || c == 'E') {
        Some(pos) => {
            let exp: i64 = unsigned[pos + 1..].parse().map_err(|_| invalid())?;
            (&unsigned[..pos], exp)
        }
        None => (unsigned, 0),
    };
    if exponent.abs() > MAX_EXPONENT {
        return Err(invalid());
    }

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let digits: BigInt = format!("{}{}", int_part, frac_part)
        .parse()
        .map_err(|_| invalid())?;
    let digits = if negative { -digits } else { digits };
    Ok((digits, exponent - frac_part.len() as i64))
}

/// `digits * 10^exponent` scaled by 10^18, truncated toward zero
fn rescale(digits: BigInt, exponent: i64) -> BigInt {
    let shift = exponent + SCALE as i64;
    if shift >= 0 {
        digits * pow10(shift as u32)
    } else {
        digits / pow10((-shift) as u32)
    }
}

/// Decimal amount scaled by 10^[`SCALE`]
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedAmount(BigInt);

impl FixedAmount {
    /// Zero
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// Wrap an already-scaled integer
    pub fn from_scaled(raw: BigInt) -> Self {
        Self(raw)
    }

    /// Whole units
    pub fn from_units(units: i64) -> Self {
        Self(BigInt::from(units) * pow10(SCALE))
    }

    /// Parse a decimal string such as `-12.5`, `0.000001` or `1.5e3`.
    ///
    /// Digits beyond the 18th fractional place are truncated.
    pub fn parse(raw: &str) -> Result<Self> {
        let (digits, exponent) = parse_exact(raw)?;
        Ok(Self(rescale(digits, exponent)))
    }

    /// Product of two decimal strings, computed on the exact values and
    /// truncated once to 18 fractional digits
    pub fn product(lhs: &str, rhs: &str) -> Result<Self> {
        let (a, a_exp) = parse_exact(lhs)?;
        let (b, b_exp) = parse_exact(rhs)?;
        Ok(Self(rescale(a * b, a_exp + b_exp)))
    }

    /// Scaled integer
    pub fn scaled(&self) -> &BigInt {
        &self.0
    }

    /// Integer amount in a token's base units, truncating extra digits
    pub fn to_base_units(&self, decimals: u32) -> BigInt {
        if decimals >= SCALE {
            &self.0 * pow10(decimals - SCALE)
        } else {
            &self.0 / pow10(SCALE - decimals)
        }
    }

    /// Whether the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Whether the amount is below zero
    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }
}

impl fmt::Display for FixedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = pow10(SCALE);
        let magnitude = self.0.abs();
        let int_part = &magnitude / &unit;
        let frac_part = &magnitude % &unit;
        let sign = if self.0.is_negative() { "-" } else { "" };
        if frac_part.is_zero() {
            return write!(f, "{}{}", sign, int_part);
        }
        let frac = format!("{:0>width$}", frac_part.to_string(), width = SCALE as usize);
        write!(f, "{}{}.{}", sign, int_part, frac.trim_end_matches('0'))
    }
}

impl Add for FixedAmount {
    type Output = FixedAmount;

    fn add(self, rhs: FixedAmount) -> FixedAmount {
        Self(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a FixedAmount> for &'a FixedAmount {
    type Output = FixedAmount;

    fn add(self, rhs: &'a FixedAmount) -> FixedAmount {
        FixedAmount(&self.0 + &rhs.0)
    }
}

impl Sub for FixedAmount {
    type Output = FixedAmount;

    fn sub(self, rhs: FixedAmount) -> FixedAmount {
        Self(self.0 - rhs.0)
    }
}

impl<'a> Sub<&'a FixedAmount> for &'a FixedAmount {
    type Output = FixedAmount;

    fn sub(self, rhs: &'a FixedAmount) -> FixedAmount {
        FixedAmount(&self.0 - &rhs.0)
    }
}

impl Neg for FixedAmount {
    type Output = FixedAmount;

    fn neg(self) -> FixedAmount {
        Self(-self.0)
    }
}

impl Neg for &FixedAmount {
    type Output = FixedAmount;

    fn neg(self) -> FixedAmount {
        FixedAmount(-&self.0)
    }
}
