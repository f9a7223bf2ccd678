//! Hierarchical names and tag sets identifying time series groups.
//!
//! A [`GroupPath`] is an ordered sequence of non-empty string segments
//! naming a hierarchical namespace (`test.histogram`). A [`MetricName`] is
//! structurally identical but scoped to one metric within a group. A
//! [`GroupName`] pairs a path with a [`Tags`] set and is the unique
//! identity of one logical series group within a collection.
//!
//! All of these are immutable value objects with structural equality,
//! ordering, and hashing.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ModelError, Result};
use crate::value::MetricValue;

/// Byte reserved as a segment separator in flat renderings of paths.
///
/// The wire format is length-prefixed and never needs a separator, but NUL
/// is rejected in segments so every path has an unambiguous flat rendering.
pub const RESERVED_SEGMENT_BYTE: u8 = 0;

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(ModelError::InvalidName {
            segment: segment.to_string(),
            reason: "segment must be non-empty".to_string(),
        }
        .into());
    }
    if segment.bytes().any(|b| b == RESERVED_SEGMENT_BYTE) {
        return Err(ModelError::InvalidName {
            segment: segment.to_string(),
            reason: "segment contains reserved NUL byte".to_string(),
        }
        .into());
    }
    Ok(())
}

fn collect_segments<I, S>(segments: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
    for segment in &segments {
        validate_segment(segment)?;
    }
    Ok(segments)
}

/// Hierarchical group namespace: ordered, non-empty string segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupPath {
    segments: Vec<String>,
}

impl GroupPath {
    /// Creates a group path from segments.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidName`] if any segment is empty or
    /// contains the reserved NUL byte.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            segments: collect_segments(segments)?,
        })
    }

    /// Returns the path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Name of one metric within a group's value mapping.
///
/// Structurally identical to [`GroupPath`] but a distinct type: a metric
/// name never identifies a group and the two are not interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricName {
    segments: Vec<String>,
}

impl MetricName {
    /// Creates a metric name from segments.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidName`] if any segment is empty or
    /// contains the reserved NUL byte.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            segments: collect_segments(segments)?,
        })
    }

    /// Returns the name segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// A set of key/value attributes refining a group's identity.
///
/// Keys are unique; values are restricted to scalar metric values (boolean,
/// integer, double, string — never histogram or empty). Entries are kept in
/// key order, so iteration and encoding are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tags {
    entries: BTreeMap<String, MetricValue>,
}

impl Tags {
    /// The distinguished empty tag set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a tag set from key/value pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateTagKey`] if two pairs share a key and
    /// [`ModelError::InvalidValue`] if a value is not a scalar.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, MetricValue)>,
        S: Into<String>,
    {
        let mut entries = BTreeMap::new();
        for (key, value) in pairs {
            let key = key.into();
            if !value.is_scalar() {
                return Err(ModelError::InvalidValue {
                    reason: format!("tag {key:?} must hold a scalar value, got {value}"),
                }
                .into());
            }
            if entries.insert(key.clone(), value).is_some() {
                return Err(ModelError::DuplicateTagKey { key }.into());
            }
        }
        Ok(Self { entries })
    }

    /// Returns the value for a tag key, if present.
    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.entries.get(key)
    }

    /// Iterates over tag entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of tag entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the tag set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{key}={value}")?;
        }
        write!(f, "}}")
    }
}

/// The unique identity of one logical time series group: path plus tags.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupName {
    /// The hierarchical group path.
    path: GroupPath,
    /// The tag set refining the path.
    tags: Tags,
}

impl GroupName {
    /// Creates a group name from a path and tag set.
    pub fn new(path: GroupPath, tags: Tags) -> Self {
        Self { path, tags }
    }

    /// Creates a group name with the empty tag set.
    pub fn untagged(path: GroupPath) -> Self {
        Self::new(path, Tags::empty())
    }

    /// Returns the group path.
    pub fn path(&self) -> &GroupPath {
        &self.path
    }

    /// Returns the tag set.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.path, self.tags)
    }
}
