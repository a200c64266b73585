//! Fixed-point decimal used for `NUMERIC(p,5)` columns.
//!
//! Durations and coordinates are compared for exact equality when events are
//! matched against the song catalog, so they are never held as raw floats.

use std::fmt;
use std::str::FromStr;

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Double;
use diesel::sqlite::{Sqlite, SqliteValue};
use thiserror::Error;

/// Number of fractional digits kept by every decimal column in the warehouse.
pub const SCALE: u32 = 5;

const FACTOR: i128 = 10i128.pow(SCALE);

/// Errors produced while parsing or converting a decimal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecimalError {
    #[error("Invalid decimal literal: {0:?}")]
    Invalid(String),

    #[error("Decimal out of range: {0}")]
    OutOfRange(String),
}

/// An exact decimal with [`SCALE`] fractional digits, stored as scaled units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Double)]
pub struct Decimal(i64);

impl Decimal {
    /// Build a decimal from its scaled representation (`1.5` is `150000`).
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// The scaled representation.
    pub const fn units(self) -> i64 {
        self.0
    }

    /// Round a float to [`SCALE`] places, half away from zero.
    ///
    /// The float is first rendered as its shortest round-trip literal so that
    /// `218.93179_f64` becomes exactly `218.93179`.
    pub fn from_f64(value: f64) -> Result<Self, DecimalError> {
        if !value.is_finite() {
            return Err(DecimalError::Invalid(value.to_string()));
        }
        value.to_string().parse()
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / FACTOR as f64
    }

    /// Whether the value fits a `NUMERIC(precision, SCALE)` column.
    pub fn fits_precision(self, precision: u32) -> bool {
        (self.0 as i128).abs() < 10i128.pow(precision)
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecimalError::Invalid(s.to_string());
        let out_of_range = || DecimalError::OutOfRange(s.to_string());

        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (mantissa, exponent) = match body.find(['e', 'E']) {
            Some(idx) => (
                &body[..idx],
                body[idx + 1..].parse::<i32>().map_err(|_| invalid())?,
            ),
            None => (body, 0),
        };

        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        // value = digits * 10^(exponent - frac_len); units = value * 10^SCALE
        let digits = format!("{int_part}{frac_part}");
        let digits = digits.trim_start_matches('0');
        let shift = exponent as i64 - frac_part.len() as i64 + SCALE as i64;

        let units: i128 = if digits.is_empty() {
            0
        } else if shift >= 0 {
            if digits.len() as i64 + shift > 38 {
                return Err(out_of_range());
            }
            let base: i128 = digits.parse().map_err(|_| out_of_range())?;
            base.checked_mul(10i128.pow(shift as u32))
                .ok_or_else(out_of_range)?
        } else {
            let cut = (-shift) as usize;
            let (kept, next) = if cut > digits.len() {
                ("", b'0')
            } else {
                (&digits[..digits.len() - cut], digits.as_bytes()[digits.len() - cut])
            };
            if kept.len() > 38 {
                return Err(out_of_range());
            }
            let mut units: i128 = if kept.is_empty() {
                0
            } else {
                kept.parse().map_err(|_| out_of_range())?
            };
            if next >= b'5' {
                units += 1;
            }
            units
        };

        let units = if negative { -units } else { units };
        i64::try_from(units)
            .map(Decimal)
            .map_err(|_| out_of_range())
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 as i128;
        let sign = if units < 0 { "-" } else { "" };
        let abs = units.abs();
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            abs / FACTOR,
            abs % FACTOR,
            width = SCALE as usize
        )
    }
}

impl ToSql<Double, Sqlite> for Decimal {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.to_f64());
        Ok(IsNull::No)
    }
}

impl FromSql<Double, Sqlite> for Decimal {
    fn from_sql(value: SqliteValue<'_, '_, '_>) -> deserialize::Result<Self> {
        let raw = <f64 as FromSql<Double, Sqlite>>::from_sql(value)?;
        Ok(Decimal::from_f64(raw)?)
    }
}
