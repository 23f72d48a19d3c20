//! Exact coverage ratios
//!
//! Thresholds and measured coverage are compared as rationals so that
//! `80/100 >= 0.80` holds exactly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of fractional digits accepted when parsing a decimal
const MAX_FRACTION_DIGITS: u32 = 18;

/// Default minimum coverage ratio (0.80)
pub const DEFAULT_MINIMUM: Ratio = Ratio { numer: 4, denom: 5 };

/// Errors produced while parsing a ratio
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatioParseError {
    #[error("empty ratio")]
    Empty,

    #[error("invalid ratio '{0}': expected a decimal such as 0.80 or a percentage such as 80%")]
    Invalid(String),

    #[error("ratio '{0}' has too many fractional digits")]
    TooPrecise(String),

    #[error("ratio '{0}' is outside the range 0.0 - 1.0")]
    OutOfRange(String),
}

/// A non-negative rational number `numer / denom` kept in lowest terms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ratio {
    numer: u64,
    denom: u64,
}

impl Ratio {
    pub const ZERO: Ratio = Ratio { numer: 0, denom: 1 };
    pub const ONE: Ratio = Ratio { numer: 1, denom: 1 };

    /// Create a ratio, returning `None` for a zero denominator
    pub fn new(numer: u64, denom: u64) -> Option<Self> {
        if denom == 0 {
            return None;
        }
        let divisor = gcd(numer, denom);
        Some(Self {
            numer: numer / divisor,
            denom: denom / divisor,
        })
    }

    pub fn numer(&self) -> u64 {
        self.numer
    }

    pub fn denom(&self) -> u64 {
        self.denom
    }

    /// Lossy conversion for display and serialization
    pub fn as_f64(&self) -> f64 {
        self.numer as f64 / self.denom as f64
    }

    /// Percentage in the range 0-100 (lossy)
    pub fn percent(&self) -> f64 {
        self.as_f64() * 100.0
    }

    /// Fractional digits needed to write this ratio exactly, if it terminates
    pub fn decimal_scale(&self) -> Option<u32> {
        let numer = u128::from(self.numer);
        let denom = u128::from(self.denom);
        (0..=MAX_FRACTION_DIGITS).find(|&k| (numer * 10u128.pow(k)) % denom == 0)
    }

    /// Decimal form with `digits` fractional digits, rounded down
    ///
    /// A ratio below some minimum never prints as that minimum when both are
    /// shown at the minimum's scale.
    pub fn format_floor(&self, digits: u32) -> String {
        let digits = digits.min(MAX_FRACTION_DIGITS);
        let unit = 10u128.pow(digits);
        let scaled = u128::from(self.numer) * unit / u128::from(self.denom);
        if digits == 0 {
            return scaled.to_string();
        }
        format!(
            "{}.{:0width$}",
            scaled / unit,
            scaled % unit,
            width = digits as usize
        )
    }

    /// Whether this ratio is greater than or equal to `minimum`
    pub fn meets(&self, minimum: &Ratio) -> bool {
        self >= minimum
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = u128::from(self.numer) * u128::from(other.denom);
        let rhs = u128::from(other.numer) * u128::from(self.denom);
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.decimal_scale().map_or(2, |k| k.clamp(2, 4));
        f.write_str(&self.format_floor(digits))
    }
}

impl FromStr for Ratio {
    type Err = RatioParseError;

    /// Parse `0.80`, `.8`, `1`, or `80%`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RatioParseError::Empty);
        }

        let (digits, percent) = match trimmed.strip_suffix('%') {
            Some(rest) => (rest.trim_end(), true),
            None => (trimmed, false),
        };

        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction)
        {
            return Err(RatioParseError::Invalid(trimmed.to_string()));
        }

        let scale = u32::try_from(fraction.len())
            .ok()
            .filter(|n| *n <= MAX_FRACTION_DIGITS)
            .ok_or_else(|| RatioParseError::TooPrecise(trimmed.to_string()))?;

        let overflow = || RatioParseError::OutOfRange(trimmed.to_string());
        let mut denom = 10u64.checked_pow(scale).ok_or_else(overflow)?;
        let whole_value: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let fraction_value: u64 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| overflow())?
        };
        let numer = whole_value
            .checked_mul(denom)
            .and_then(|n| n.checked_add(fraction_value))
            .ok_or_else(overflow)?;

        if percent {
            denom = denom.checked_mul(100).ok_or_else(overflow)?;
        }

        let ratio = Ratio::new(numer, denom).ok_or_else(overflow)?;
        if ratio > Ratio::ONE {
            return Err(overflow());
        }
        Ok(ratio)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RatioRepr {
    Number(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = match RatioRepr::deserialize(deserializer)? {
            RatioRepr::Number(n) if n.is_finite() => n.to_string(),
            RatioRepr::Number(n) => {
                return Err(serde::de::Error::custom(format!("invalid ratio: {n}")))
            }
            RatioRepr::Text(s) => s,
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal() {
        assert_eq!("0.80".parse::<Ratio>().unwrap(), Ratio::new(4, 5).unwrap());
        assert_eq!(".5".parse::<Ratio>().unwrap(), Ratio::new(1, 2).unwrap());
        assert_eq!("1".parse::<Ratio>().unwrap(), Ratio::ONE);
        assert_eq!("0".parse::<Ratio>().unwrap(), Ratio::ZERO);
    }

    #[test]
    fn test_parse_percentage() {
        assert_eq!("80%".parse::<Ratio>().unwrap(), Ratio::new(4, 5).unwrap());
        assert_eq!("12.5 %".parse::<Ratio>().unwrap(), Ratio::new(1, 8).unwrap());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!("".parse::<Ratio>(), Err(RatioParseError::Empty));
        assert!(matches!(
            "-0.1".parse::<Ratio>(),
            Err(RatioParseError::Invalid(_))
        ));
        assert!(matches!(
            "abc".parse::<Ratio>(),
            Err(RatioParseError::Invalid(_))
        ));
        assert!(matches!(
            "1.01".parse::<Ratio>(),
            Err(RatioParseError::OutOfRange(_))
        ));
        assert!(matches!(
            "0.1234567890123456789".parse::<Ratio>(),
            Err(RatioParseError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_exact_comparison() {
        let threshold: Ratio = "0.80".parse().unwrap();
        assert!(Ratio::new(80, 100).unwrap().meets(&threshold));
        assert!(!Ratio::new(79, 100).unwrap().meets(&threshold));
        assert!(Ratio::new(4, 5).unwrap() == Ratio::new(800, 1000).unwrap());
        assert!(Ratio::new(1, 3).unwrap() < Ratio::new(334, 1000).unwrap());
    }

    #[test]
    fn test_default_minimum() {
        assert_eq!(DEFAULT_MINIMUM, "0.80".parse::<Ratio>().unwrap());
    }

    #[test]
    fn test_zero_denominator() {
        assert!(Ratio::new(0, 0).is_none());
        assert!(Ratio::new(5, 0).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Ratio::new(79, 100).unwrap().to_string(), "0.79");
        assert_eq!(Ratio::new(4, 5).unwrap().to_string(), "0.80");
        assert_eq!(Ratio::new(7999, 10000).unwrap().to_string(), "0.7999");
        assert_eq!(Ratio::new(2, 3).unwrap().to_string(), "0.66");
        assert_eq!(Ratio::ONE.to_string(), "1.00");
    }

    #[test]
    fn test_format_floor() {
        let ratio = Ratio::new(7999, 10000).unwrap();
        assert_eq!(ratio.format_floor(2), "0.79");
        assert_eq!(ratio.format_floor(0), "0");
        assert_eq!(Ratio::ONE.format_floor(3), "1.000");
        assert_eq!(Ratio::new(1, 3).unwrap().decimal_scale(), None);
        assert_eq!("0.805".parse::<Ratio>().unwrap().decimal_scale(), Some(3));
        assert_eq!(DEFAULT_MINIMUM.decimal_scale(), Some(1));
    }

    #[test]
    fn test_serde_accepts_number_and_text() {
        let from_number: Ratio = serde_json::from_str("0.8").unwrap();
        let from_text: Ratio = serde_json::from_str("\"80%\"").unwrap();
        assert_eq!(from_number, from_text);
        assert!(serde_json::from_str::<Ratio>("1.5").is_err());

        let json = serde_json::to_string(&from_number).unwrap();
        assert_eq!(json, "0.8");
    }
}
