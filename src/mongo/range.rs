//! Structured comparison filters.
//!
//! The compact `<key><op><number>` strings of the query parameters are parsed here into
//! `RangeFilter` values; everything past this module only sees the structured form.

use std::sync::OnceLock;

use mongodb::bson::{doc, Bson, Document};
use regex::Regex;

/// Error type for parsing range filters.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid range filter: {0:?}")]
    InvalidFormat(String),
    #[error("invalid number {number:?} in range filter {filter:?}")]
    InvalidNumber { filter: String, number: String },
    #[error("missing key in range filter {0:?}")]
    MissingKey(String),
}

/// Comparison operator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString,
)]
pub enum Op {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(to_string = "=", serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
}

impl Op {
    /// The Mongo query operator.
    pub fn mongo_operator(&self) -> &'static str {
        match self {
            Op::Lt => "$lt",
            Op::Le => "$lte",
            Op::Gt => "$gt",
            Op::Ge => "$gte",
            Op::Eq => "$eq",
            Op::Ne => "$ne",
        }
    }

    /// Evaluate `lhs <op> rhs`.
    pub fn eval(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Op::Lt => lhs < rhs,
            Op::Le => lhs <= rhs,
            Op::Gt => lhs > rhs,
            Op::Ge => lhs >= rhs,
            Op::Eq => lhs == rhs,
            Op::Ne => lhs != rhs,
        }
    }
}

/// Filter on one value.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeFilter {
    /// Numeric comparison.
    Compare(Op, f64),
    /// Regular expression match (`~=`).
    Like(String),
}

impl RangeFilter {
    /// The condition to put below a field path.
    pub fn to_condition(&self) -> Document {
        match self {
            RangeFilter::Compare(op, value) => {
                let mut result = Document::new();
                result.insert(op.mongo_operator(), Bson::Double(*value));
                result
            }
            RangeFilter::Like(pattern) => doc! { "$regex": pattern.as_str() },
        }
    }
}

/// A range filter optionally qualified by a key, e.g., `sift<0.2` or `1kG:ALL<0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRange {
    pub key: Option<String>,
    pub filter: RangeFilter,
}

impl KeyedRange {
    /// Return the key or fail naming the filter.
    pub fn require_key(&self) -> Result<&str, Error> {
        self.key
            .as_deref()
            .ok_or_else(|| Error::MissingKey(self.to_string()))
    }
}

impl std::fmt::Display for KeyedRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(key) = &self.key {
            write!(f, "{}", key)?;
        }
        match &self.filter {
            RangeFilter::Compare(op, value) => write!(f, "{}{}", op, value),
            RangeFilter::Like(pattern) => write!(f, "~={}", pattern),
        }
    }
}

fn filter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The operator alternatives are ordered longest first.
    RE.get_or_init(|| {
        Regex::new(r"^([^<>=!~]*)(<=|>=|==|!=|~=|<|>|=)(.+)$").expect("valid regex")
    })
}

impl std::str::FromStr for KeyedRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = filter_re()
            .captures(s.trim())
            .ok_or_else(|| Error::InvalidFormat(s.to_owned()))?;
        let key = captures
            .get(1)
            .map(|m| m.as_str().trim())
            .filter(|k| !k.is_empty())
            .map(str::to_owned);
        let op = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let value = captures.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
        let filter = if op == "~=" {
            RangeFilter::Like(value.to_owned())
        } else {
            let number = value.parse::<f64>().map_err(|_| Error::InvalidNumber {
                filter: s.to_owned(),
                number: value.to_owned(),
            })?;
            let op = op
                .parse::<Op>()
                .map_err(|_| Error::InvalidFormat(s.to_owned()))?;
            RangeFilter::Compare(op, number)
        };
        Ok(KeyedRange { key, filter })
    }
}

/// Parse a filter without key; a bare number means equality.
pub fn parse_unkeyed(s: &str) -> Result<RangeFilter, Error> {
    if let Ok(number) = s.trim().parse::<f64>() {
        return Ok(RangeFilter::Compare(Op::Eq, number));
    }
    let keyed: KeyedRange = s.parse()?;
    match keyed.key {
        None => Ok(keyed.filter),
        Some(_) => Err(Error::InvalidFormat(s.to_owned())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest::rstest]
    #[case("<0.5", None, RangeFilter::Compare(Op::Lt, 0.5))]
    #[case("<=10", None, RangeFilter::Compare(Op::Le, 10.0))]
    #[case(">=-1.5", None, RangeFilter::Compare(Op::Ge, -1.5))]
    #[case("==3", None, RangeFilter::Compare(Op::Eq, 3.0))]
    #[case("=3", None, RangeFilter::Compare(Op::Eq, 3.0))]
    #[case("!=0", None, RangeFilter::Compare(Op::Ne, 0.0))]
    #[case("sift<0.2", Some("sift"), RangeFilter::Compare(Op::Lt, 0.2))]
    #[case("1kG_phase3:ALL<0.01", Some("1kG_phase3:ALL"), RangeFilter::Compare(Op::Lt, 0.01))]
    #[case("polyphen~=damaging", Some("polyphen"), RangeFilter::Like("damaging".into()))]
    // Multi-digit values are not mistaken for operators.
    #[case(">1000", None, RangeFilter::Compare(Op::Gt, 1000.0))]
    fn parse_keyed(
        #[case] s: &str,
        #[case] key: Option<&str>,
        #[case] filter: RangeFilter,
    ) -> Result<(), anyhow::Error> {
        let parsed: KeyedRange = s.parse()?;
        assert_eq!(parsed.key.as_deref(), key);
        assert_eq!(parsed.filter, filter);
        Ok(())
    }

    #[rstest::rstest]
    #[case("0.5")]
    #[case("sift")]
    #[case("<abc")]
    #[case("")]
    fn parse_keyed_invalid(#[case] s: &str) {
        assert!(s.parse::<KeyedRange>().is_err());
    }

    #[test]
    fn unkeyed_bare_number_is_equality() -> Result<(), anyhow::Error> {
        assert_eq!(parse_unkeyed("0.25")?, RangeFilter::Compare(Op::Eq, 0.25));
        assert_eq!(parse_unkeyed(">0.25")?, RangeFilter::Compare(Op::Gt, 0.25));
        assert!(parse_unkeyed("sift>0.25").is_err());
        Ok(())
    }

    #[test]
    fn conditions() {
        assert_eq!(
            RangeFilter::Compare(Op::Ge, 0.5).to_condition(),
            doc! { "$gte": 0.5 }
        );
        assert_eq!(
            RangeFilter::Like("^prob".into()).to_condition(),
            doc! { "$regex": "^prob" }
        );
    }

    #[test]
    fn display_roundtrips_text() -> Result<(), anyhow::Error> {
        let parsed: KeyedRange = "sift<0.2".parse()?;
        assert_eq!(parsed.to_string(), "sift<0.2");
        Ok(())
    }
}
