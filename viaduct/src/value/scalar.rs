use std::fmt;

use serde::{Serialize, Serializer};

/// A leaf value as the engine carries it.
///
/// The engine is dynamically typed, so a single representation covers every
/// scalar the schema can declare. Extended scalars with a string wire form
/// (`Date`, `DateTime`, `BigDecimal`, `BigInteger`) are carried as validated
/// [`ScalarValue::String`]s; their validation lives in [`coercion`].
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// An `Int` or `Short` value.
    Int(i32),
    /// A `Long` value (64-bit wire integer).
    Long(i64),
    /// A `Float` value.
    Float(f64),
    /// A `String`, `ID`, or string-carried extended scalar value.
    String(String),
    /// A `Boolean` value.
    Boolean(bool),
    /// A `JSON` value: any structure the tenant handed over.
    Json(serde_json::Value),
}

impl ScalarValue {
    /// Represents this value as an `i32`, if possible.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Long(i) => i32::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Represents this value as an `i64`, if possible.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some((*i).into()),
            Self::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// Represents this value as an `f64`, if possible.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some((*i).into()),
            Self::Long(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Represents this value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Represents this value as a `bool`, if it is a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<serde_json::Value> for ScalarValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Long(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "\"{s}\""),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Json(j) => write!(f, "{j}"),
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(i) => serializer.serialize_i32(*i),
            Self::Long(i) => serializer.serialize_i64(*i),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::String(s) => serializer.serialize_str(s),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Json(j) => j.serialize(serializer),
        }
    }
}

/// Wire-format validation of built-in scalar values.
///
/// Each function checks one scalar's lexical form the way the schema's
/// `try_parse` hook expects: `Ok(())` when the input inhabits the scalar,
/// an error message otherwise.
pub mod coercion {
    use std::str::FromStr as _;

    use bigdecimal::BigDecimal;
    use chrono::{DateTime, NaiveDate};
    use num_bigint::BigInt;

    use super::ScalarValue;

    /// `Int`: a 32-bit signed integer.
    pub fn int(v: &ScalarValue) -> Result<(), String> {
        match v {
            ScalarValue::Int(_) => Ok(()),
            ScalarValue::Long(i) if i32::try_from(*i).is_ok() => Ok(()),
            other => Err(format!("Expected `Int`, found {other}")),
        }
    }

    /// `Short`: a 16-bit signed integer carried in an `Int` slot.
    pub fn short(v: &ScalarValue) -> Result<(), String> {
        match v.as_long() {
            Some(i) if i16::try_from(i).is_ok() => Ok(()),
            _ => Err(format!("Expected `Short`, found {v}")),
        }
    }

    /// `Long`: a 64-bit signed integer.
    pub fn long(v: &ScalarValue) -> Result<(), String> {
        match v {
            ScalarValue::Int(_) | ScalarValue::Long(_) => Ok(()),
            other => Err(format!("Expected `Long`, found {other}")),
        }
    }

    /// `Float`: any numeric value.
    pub fn float(v: &ScalarValue) -> Result<(), String> {
        v.as_float()
            .map(drop)
            .ok_or_else(|| format!("Expected `Float`, found {v}"))
    }

    /// `String` and `ID`.
    pub fn string(v: &ScalarValue) -> Result<(), String> {
        v.as_str()
            .map(drop)
            .ok_or_else(|| format!("Expected `String`, found {v}"))
    }

    /// `Boolean`.
    pub fn boolean(v: &ScalarValue) -> Result<(), String> {
        v.as_boolean()
            .map(drop)
            .ok_or_else(|| format!("Expected `Boolean`, found {v}"))
    }

    /// `Date`: `"YYYY-MM-DD"`.
    pub fn date(v: &ScalarValue) -> Result<(), String> {
        let s = v
            .as_str()
            .ok_or_else(|| format!("Expected `Date` string, found {v}"))?;
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(drop)
            .map_err(|e| format!("Invalid `Date` value \"{s}\": {e}"))
    }

    /// `DateTime`: RFC 3339, normalized to UTC.
    pub fn datetime(v: &ScalarValue) -> Result<(), String> {
        let s = v
            .as_str()
            .ok_or_else(|| format!("Expected `DateTime` string, found {v}"))?;
        DateTime::parse_from_rfc3339(s)
            .map(drop)
            .map_err(|e| format!("Invalid `DateTime` value \"{s}\": {e}"))
    }

    /// `BigDecimal`: an arbitrary-precision decimal carried as a string.
    pub fn big_decimal(v: &ScalarValue) -> Result<(), String> {
        let s = v
            .as_str()
            .ok_or_else(|| format!("Expected `BigDecimal` string, found {v}"))?;
        BigDecimal::from_str(s)
            .map(drop)
            .map_err(|e| format!("Invalid `BigDecimal` value \"{s}\": {e}"))
    }

    /// `BigInteger`: an arbitrary-precision integer carried as a string.
    pub fn big_integer(v: &ScalarValue) -> Result<(), String> {
        let s = v
            .as_str()
            .ok_or_else(|| format!("Expected `BigInteger` string, found {v}"))?;
        BigInt::from_str(s)
            .map(drop)
            .map_err(|e| format!("Invalid `BigInteger` value \"{s}\": {e}"))
    }

    /// `JSON`: anything.
    pub fn json(_: &ScalarValue) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ScalarValue, coercion};

    #[test]
    fn numeric_widening() {
        assert_eq!(ScalarValue::Int(7).as_long(), Some(7));
        assert_eq!(ScalarValue::Long(7).as_int(), Some(7));
        assert_eq!(ScalarValue::Long(i64::MAX).as_int(), None);
        assert_eq!(ScalarValue::Int(2).as_float(), Some(2.0));
    }

    #[test]
    fn date_wire_format() {
        assert!(coercion::date(&ScalarValue::from("1815-12-10")).is_ok());
        assert!(coercion::date(&ScalarValue::from("1815-13-10")).is_err());
        assert!(coercion::date(&ScalarValue::Int(3)).is_err());
    }

    #[test]
    fn datetime_wire_format() {
        assert!(coercion::datetime(&ScalarValue::from("2015-06-29T12:00:00Z")).is_ok());
        assert!(coercion::datetime(&ScalarValue::from("2015-06-29T12:00:00+02:00")).is_ok());
        assert!(coercion::datetime(&ScalarValue::from("2015-06-29")).is_err());
    }

    #[test]
    fn big_number_wire_formats() {
        assert!(coercion::big_decimal(&ScalarValue::from("3.14159265358979323846")).is_ok());
        assert!(coercion::big_decimal(&ScalarValue::from("not-a-number")).is_err());
        assert!(coercion::big_integer(&ScalarValue::from("340282366920938463463374607431768211456")).is_ok());
        assert!(coercion::big_integer(&ScalarValue::from("12.5")).is_err());
    }

    #[test]
    fn short_bounds() {
        assert!(coercion::short(&ScalarValue::Int(32767)).is_ok());
        assert!(coercion::short(&ScalarValue::Int(32768)).is_err());
    }
}
