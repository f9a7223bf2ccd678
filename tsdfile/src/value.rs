//! Metric value model: the closed tagged union of storable measurements.
//!
//! A [`MetricValue`] is one of exactly six variants: empty, boolean, signed
//! integer, double, string, or histogram. The set is closed because the
//! codec matches exhaustively over it; adding a variant is a wire-format
//! change.
//!
//! # Double equality
//!
//! Equality, ordering, and hashing for [`MetricValue::Dbl`] operate on the
//! IEEE-754 bit pattern, not on numeric comparison. This makes NaN payloads
//! self-equal and preserves them bitwise across encode/decode, at the cost
//! of `+0.0` and `-0.0` comparing unequal. The codec's round-trip law is
//! defined over this equality.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::error::{ModelError, Result};

/// One histogram bucket: a closed range of doubles and an occurrence count.
///
/// Invariants, enforced by [`RangeWithCount::new`] and by
/// [`Histogram::new`]: `lower <= upper` (which also rejects NaN bounds) and
/// `count >= 0`. Buckets are not required to be contiguous or
/// non-overlapping.
#[derive(Debug, Clone, Copy)]
pub struct RangeWithCount {
    /// Inclusive lower bound of the bucket range.
    pub lower: f64,
    /// Inclusive upper bound of the bucket range.
    pub upper: f64,
    /// Number of observations in the bucket.
    pub count: i64,
}

impl RangeWithCount {
    /// Creates a bucket, validating its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidValue`] if `lower > upper`, either bound
    /// is NaN, or `count` is negative.
    pub fn new(lower: f64, upper: f64, count: i64) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(ModelError::InvalidValue {
                reason: format!("histogram bucket requires lower <= upper, got {lower}..{upper}"),
            }
            .into());
        }
        if count < 0 {
            return Err(ModelError::InvalidValue {
                reason: format!("histogram bucket count must be >= 0, got {count}"),
            }
            .into());
        }
        Ok(Self { lower, upper, count })
    }
}

impl PartialEq for RangeWithCount {
    fn eq(&self, other: &Self) -> bool {
        self.lower.to_bits() == other.lower.to_bits()
            && self.upper.to_bits() == other.upper.to_bits()
            && self.count == other.count
    }
}

impl Eq for RangeWithCount {}

impl Hash for RangeWithCount {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lower.to_bits().hash(state);
        self.upper.to_bits().hash(state);
        self.count.hash(state);
    }
}

impl PartialOrd for RangeWithCount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RangeWithCount {
    fn cmp(&self, other: &Self) -> Ordering {
        // Bit-pattern ordering: deterministic, not numeric. Used only for
        // canonical encode ordering, never surfaced to callers.
        self.lower
            .to_bits()
            .cmp(&other.lower.to_bits())
            .then_with(|| self.upper.to_bits().cmp(&other.upper.to_bits()))
            .then_with(|| self.count.cmp(&other.count))
    }
}

/// An ordered list of histogram buckets.
///
/// Bucket list order and exact values are preserved by the codec; no
/// implicit merging or normalization happens anywhere. A histogram with
/// zero buckets is valid and represents "no data".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Histogram {
    buckets: Vec<RangeWithCount>,
}

impl Histogram {
    /// Creates a histogram from an ordered bucket list.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidValue`] if any bucket violates the
    /// bucket invariants.
    pub fn new(buckets: Vec<RangeWithCount>) -> Result<Self> {
        for bucket in &buckets {
            // Re-validate: buckets may have been built with struct literals.
            RangeWithCount::new(bucket.lower, bucket.upper, bucket.count)?;
        }
        Ok(Self { buckets })
    }

    /// Creates the empty histogram (zero buckets).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the buckets in their original order.
    pub fn buckets(&self) -> &[RangeWithCount] {
        &self.buckets
    }

    /// Returns the number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true if the histogram has no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// A single metric measurement.
///
/// `Empty` is a legitimate, distinct, storable state meaning "no value
/// recorded", not an error and not the absence of a metric entry.
#[derive(Debug, Clone)]
pub enum MetricValue {
    /// No value recorded.
    Empty,
    /// Boolean flag.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// IEEE-754 double; NaN and infinities are storable and preserved
    /// bitwise.
    Dbl(f64),
    /// UTF-8 string.
    Str(String),
    /// Histogram of bucketed observations.
    Hist(Histogram),
}

impl MetricValue {
    /// Returns true for the scalar variants allowed as tag values
    /// (bool, int, double, string).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            MetricValue::Bool(_) | MetricValue::Int(_) | MetricValue::Dbl(_) | MetricValue::Str(_)
        )
    }

    /// Discriminant rank used for canonical ordering across variants.
    fn rank(&self) -> u8 {
        match self {
            MetricValue::Empty => 0,
            MetricValue::Bool(_) => 1,
            MetricValue::Int(_) => 2,
            MetricValue::Dbl(_) => 3,
            MetricValue::Str(_) => 4,
            MetricValue::Hist(_) => 5,
        }
    }
}

impl PartialEq for MetricValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MetricValue::Empty, MetricValue::Empty) => true,
            (MetricValue::Bool(a), MetricValue::Bool(b)) => a == b,
            (MetricValue::Int(a), MetricValue::Int(b)) => a == b,
            (MetricValue::Dbl(a), MetricValue::Dbl(b)) => a.to_bits() == b.to_bits(),
            (MetricValue::Str(a), MetricValue::Str(b)) => a == b,
            (MetricValue::Hist(a), MetricValue::Hist(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for MetricValue {}

impl Hash for MetricValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            MetricValue::Empty => {}
            MetricValue::Bool(b) => b.hash(state),
            MetricValue::Int(v) => v.hash(state),
            MetricValue::Dbl(v) => v.to_bits().hash(state),
            MetricValue::Str(s) => s.hash(state),
            MetricValue::Hist(h) => h.hash(state),
        }
    }
}

impl PartialOrd for MetricValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetricValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MetricValue::Empty, MetricValue::Empty) => Ordering::Equal,
            (MetricValue::Bool(a), MetricValue::Bool(b)) => a.cmp(b),
            (MetricValue::Int(a), MetricValue::Int(b)) => a.cmp(b),
            (MetricValue::Dbl(a), MetricValue::Dbl(b)) => a.to_bits().cmp(&b.to_bits()),
            (MetricValue::Str(a), MetricValue::Str(b)) => a.cmp(b),
            (MetricValue::Hist(a), MetricValue::Hist(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Empty => write!(f, "(none)"),
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Dbl(v) => write!(f, "{v}"),
            MetricValue::Str(s) => write!(f, "{s:?}"),
            MetricValue::Hist(h) => write!(f, "histogram[{}]", h.len()),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Dbl(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Str(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Str(v)
    }
}

impl From<Histogram> for MetricValue {
    fn from(v: Histogram) -> Self {
        MetricValue::Hist(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_validation() {
        assert!(RangeWithCount::new(0.0, 1.0, 2).is_ok());
        assert!(RangeWithCount::new(1.0, 1.0, 0).is_ok());
        assert!(RangeWithCount::new(2.0, 1.0, 0).is_err());
        assert!(RangeWithCount::new(0.0, 1.0, -1).is_err());
        assert!(RangeWithCount::new(f64::NAN, 1.0, 0).is_err());
        assert!(RangeWithCount::new(0.0, f64::NAN, 0).is_err());
    }

    #[test]
    fn test_histogram_preserves_bucket_order() {
        let buckets = vec![
            RangeWithCount::new(3.0, 4.0, 5).unwrap(),
            RangeWithCount::new(0.0, 1.0, 2).unwrap(),
        ];
        let hist = Histogram::new(buckets.clone()).unwrap();
        assert_eq!(hist.buckets(), buckets.as_slice());
    }

    #[test]
    fn test_histogram_rejects_invalid_bucket() {
        let buckets = vec![RangeWithCount {
            lower: 5.0,
            upper: 1.0,
            count: 0,
        }];
        assert!(Histogram::new(buckets).is_err());
    }

    #[test]
    fn test_empty_histogram_is_valid() {
        let hist = Histogram::empty();
        assert!(hist.is_empty());
        assert_eq!(hist.len(), 0);
        assert_eq!(hist, Histogram::new(vec![]).unwrap());
    }

    #[test]
    fn test_nan_equality_is_bitwise() {
        let nan = MetricValue::Dbl(f64::NAN);
        assert_eq!(nan, nan.clone());

        // Different NaN payloads are distinct values.
        let other_nan = MetricValue::Dbl(f64::from_bits(f64::NAN.to_bits() ^ 1));
        assert_ne!(nan, other_nan);

        // Signed zeros are distinct under bit equality.
        assert_ne!(MetricValue::Dbl(0.0), MetricValue::Dbl(-0.0));
    }

    #[test]
    fn test_cross_variant_inequality() {
        assert_ne!(MetricValue::Int(1), MetricValue::Dbl(1.0));
        assert_ne!(MetricValue::Empty, MetricValue::Bool(false));
        assert_ne!(MetricValue::Str("1".into()), MetricValue::Int(1));
    }

    #[test]
    fn test_scalar_classification() {
        assert!(MetricValue::Bool(true).is_scalar());
        assert!(MetricValue::Int(1).is_scalar());
        assert!(MetricValue::Dbl(1.0).is_scalar());
        assert!(MetricValue::Str("x".into()).is_scalar());
        assert!(!MetricValue::Empty.is_scalar());
        assert!(!MetricValue::Hist(Histogram::empty()).is_scalar());
    }

    #[test]
    fn test_ordering_is_total_and_stable() {
        let mut values = vec![
            MetricValue::Str("b".into()),
            MetricValue::Int(3),
            MetricValue::Empty,
            MetricValue::Dbl(2.5),
            MetricValue::Bool(true),
        ];
        values.sort();
        assert_eq!(values[0], MetricValue::Empty);
        assert_eq!(values[1], MetricValue::Bool(true));
        assert_eq!(values[2], MetricValue::Int(3));
        assert_eq!(values[3], MetricValue::Dbl(2.5));
        assert_eq!(values[4], MetricValue::Str("b".into()));
    }
}
