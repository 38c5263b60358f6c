//! A single qualitative HI/virus-neutralization measurement.
//!
//! See the titer grammar in the external interfaces section of the
//! specification this crate implements: `"*" | digits | ("<"|">"|"~") digits`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::err::{ErrorKind, Result};

/// A tagged titer value.
///
/// `DontCare` is the "no measurement" placeholder (`"*"`). `Invalid` only
/// ever arises as the in-memory default before a value is known; parsing
/// a malformed string returns an [`ErrorKind::InvalidTiter`] rather than
/// constructing `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Titer {
    /// An exact measurement, e.g. `"40"`.
    Regular(u32),
    /// A threshold measurement of the form `"<40"`: true titer is lower.
    LessThan(u32),
    /// A threshold measurement of the form `">1280"`: true titer is higher.
    MoreThan(u32),
    /// A measurement flagged as unreliable, `"~40"`.
    Dodgy(u32),
    /// No measurement was made, `"*"`.
    DontCare,
    /// Sentinel for "no value has been assigned yet".
    Invalid,
}

impl Default for Titer {
    fn default() -> Self {
        Titer::DontCare
    }
}

impl Titer {
    /// True for `Regular`.
    pub fn is_regular(&self) -> bool {
        matches!(self, Titer::Regular(_))
    }

    /// True for `DontCare`.
    pub fn is_dont_care(&self) -> bool {
        matches!(self, Titer::DontCare)
    }

    /// True for `LessThan`.
    pub fn is_less_than(&self) -> bool {
        matches!(self, Titer::LessThan(_))
    }

    /// True for `MoreThan`.
    pub fn is_more_than(&self) -> bool {
        matches!(self, Titer::MoreThan(_))
    }

    /// True for `Dodgy`.
    pub fn is_dodgy(&self) -> bool {
        matches!(self, Titer::Dodgy(_))
    }

    /// True for `Invalid`.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Titer::Invalid)
    }

    /// The raw numeric value carried by non-`DontCare`/`Invalid` variants.
    pub fn value(&self) -> Option<u32> {
        match self {
            Titer::Regular(v) | Titer::LessThan(v) | Titer::MoreThan(v) | Titer::Dodgy(v) => {
                Some(*v)
            }
            Titer::DontCare | Titer::Invalid => None,
        }
    }

    /// `log2(value / 10)`, the plain log scale used for regular titers.
    ///
    /// Returns `None` for `DontCare`/`Invalid`.
    pub fn logged(&self) -> Option<f64> {
        self.value().map(|v| (v as f64 / 10.0).log2())
    }

    /// `logged`, but thresholded titers are biased by one log unit away
    /// from the regular value: `<` by `-1`, `>` by `+1`.
    ///
    /// Returns `None` for `DontCare`/`Invalid`.
    pub fn logged_with_thresholded(&self) -> Option<f64> {
        match self {
            Titer::Regular(v) | Titer::Dodgy(v) => Some((*v as f64 / 10.0).log2()),
            Titer::LessThan(v) => Some((*v as f64 / 10.0).log2() - 1.0),
            Titer::MoreThan(v) => Some((*v as f64 / 10.0).log2() + 1.0),
            Titer::DontCare | Titer::Invalid => None,
        }
    }

    /// The log value used when computing column bases: `<` is treated as
    /// if it were regular, `>` is treated as `value + 1`; dodgy and
    /// dont-care titers contribute `-1.0` (an impossibly low basis that
    /// never wins a `max`).
    pub fn logged_for_column_bases(&self) -> f64 {
        match self {
            Titer::Regular(v) | Titer::LessThan(v) => (*v as f64 / 10.0).log2(),
            Titer::MoreThan(v) => (*v as f64 / 10.0).log2() + 1.0,
            Titer::Dodgy(_) | Titer::DontCare | Titer::Invalid => -1.0,
        }
    }

    /// The integer value used for ordering: `v` for regular/dodgy, `v-1`
    /// for `<v`, `v+1` for `>v`. `DontCare`/`Invalid` have no sort value.
    pub fn value_for_sorting(&self) -> Option<i64> {
        match self {
            Titer::Regular(v) | Titer::Dodgy(v) => Some(*v as i64),
            Titer::LessThan(v) => Some(*v as i64 - 1),
            Titer::MoreThan(v) => Some(*v as i64 + 1),
            Titer::DontCare | Titer::Invalid => None,
        }
    }

    /// Build a titer from a `log2(value/10)` value and an optional
    /// threshold prefix (`""`, `"<"`, `">"`, `"~"`).
    ///
    /// The value is rounded to the nearest integer titer, as the source
    /// library does (`lround(exp2(logged) * 10)`).
    pub fn from_logged(logged: f64, prefix: &str) -> Titer {
        let value = (logged.exp2() * 10.0).round() as u32;
        match prefix {
            "<" => Titer::LessThan(value),
            ">" => Titer::MoreThan(value),
            "~" => Titer::Dodgy(value),
            _ => Titer::Regular(value),
        }
    }

    /// Scale the titer value by `factor`, rounding to the nearest integer.
    /// `DontCare` and `Invalid` are returned unchanged; the threshold
    /// prefix, if any, is preserved.
    pub fn multiply_by(&self, factor: f64) -> Titer {
        match self {
            Titer::Regular(v) => Titer::Regular((*v as f64 * factor).round() as u32),
            Titer::LessThan(v) => Titer::LessThan((*v as f64 * factor).round() as u32),
            Titer::MoreThan(v) => Titer::MoreThan((*v as f64 * factor).round() as u32),
            Titer::Dodgy(v) => Titer::Dodgy((*v as f64 * factor).round() as u32),
            Titer::DontCare => Titer::DontCare,
            Titer::Invalid => Titer::Invalid,
        }
    }
}

impl fmt::Display for Titer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Titer::Regular(v) => write!(f, "{v}"),
            Titer::LessThan(v) => write!(f, "<{v}"),
            Titer::MoreThan(v) => write!(f, ">{v}"),
            Titer::Dodgy(v) => write!(f, "~{v}"),
            Titer::DontCare => write!(f, "*"),
            Titer::Invalid => write!(f, "invalid"),
        }
    }
}

impl FromStr for Titer {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Titer> {
        if s == "*" {
            return Ok(Titer::DontCare);
        }
        let (prefix, digits) = match s.as_bytes().first() {
            Some(b'<') => ("<", &s[1..]),
            Some(b'>') => (">", &s[1..]),
            Some(b'~') => ("~", &s[1..]),
            _ => ("", s),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ErrorKind::InvalidTiter(s.to_owned()));
        }
        let value: u32 = digits
            .parse()
            .map_err(|_| ErrorKind::InvalidTiter(s.to_owned()))?;
        Ok(match prefix {
            "<" => Titer::LessThan(value),
            ">" => Titer::MoreThan(value),
            "~" => Titer::Dodgy(value),
            _ => Titer::Regular(value),
        })
    }
}

impl PartialOrd for Titer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.value_for_sorting(), other.value_for_sorting()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ if self == other => Some(Ordering::Equal),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("*", Titer::DontCare)]
    #[case("40", Titer::Regular(40))]
    #[case("<10", Titer::LessThan(10))]
    #[case(">1280", Titer::MoreThan(1280))]
    #[case("~40", Titer::Dodgy(40))]
    fn parse_valid(#[case] text: &str, #[case] expected: Titer) {
        assert_eq!(Titer::from_str(text).unwrap(), expected);
    }

    #[rstest::rstest]
    #[case("")]
    #[case("abc")]
    #[case("<")]
    #[case("-40")]
    #[case("40.5")]
    fn parse_invalid(#[case] text: &str) {
        assert!(Titer::from_str(text).is_err());
    }

    #[test]
    fn round_trip_format_parse() {
        for t in [
            Titer::Regular(40),
            Titer::LessThan(10),
            Titer::MoreThan(1280),
            Titer::Dodgy(20),
            Titer::DontCare,
        ] {
            assert_eq!(Titer::from_str(&t.to_string()).unwrap(), t);
        }
    }

    #[test]
    fn from_logged_round_trip_for_regular() {
        // integer powers of two round-trip exactly
        let t = Titer::Regular(160);
        let logged = t.logged().unwrap();
        assert_eq!(Titer::from_logged(logged, ""), t);
    }

    #[test]
    fn ordering_thresholds() {
        assert!(Titer::LessThan(40) < Titer::Regular(40));
        assert!(Titer::MoreThan(40) > Titer::Regular(40));
        assert_eq!(Titer::LessThan(40).value_for_sorting(), Some(39));
        assert_eq!(Titer::MoreThan(40).value_for_sorting(), Some(41));
    }

    #[test]
    fn dont_care_is_unordered_but_equal_to_itself() {
        assert_eq!(Titer::DontCare, Titer::DontCare);
        assert_eq!(Titer::DontCare.partial_cmp(&Titer::Regular(40)), None);
    }

    #[test]
    fn multiply_by_preserves_prefix() {
        assert_eq!(Titer::Regular(40).multiply_by(2.0), Titer::Regular(80));
        assert_eq!(Titer::LessThan(40).multiply_by(2.0), Titer::LessThan(80));
        assert_eq!(Titer::DontCare.multiply_by(2.0), Titer::DontCare);
    }

    #[test]
    fn logged_for_column_bases_variants() {
        assert_eq!(
            Titer::Regular(40).logged_for_column_bases(),
            Titer::LessThan(40).logged_for_column_bases()
        );
        assert!(Titer::MoreThan(40).logged_for_column_bases() > Titer::Regular(40).logged_for_column_bases());
        assert_eq!(Titer::Dodgy(40).logged_for_column_bases(), -1.0);
        assert_eq!(Titer::DontCare.logged_for_column_bases(), -1.0);
    }
}
