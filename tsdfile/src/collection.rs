//! Timestamped snapshots of named time series groups.
//!
//! A [`TimeSeriesCollection`] is one [`Timestamp`] plus the set of all
//! groups observed at that instant, each carrying a mapping from
//! [`MetricName`] to [`MetricValue`]. Collections are immutable once built;
//! the [`CollectionBuilder`] accumulates entries and enforces group-name
//! uniqueness at finalize time.
//!
//! Entries are stored sorted by [`GroupName`], so two collections built
//! from the same entries in different insertion orders are equal and
//! encode to identical bytes.

use std::collections::BTreeMap;

use crate::error::{ModelError, Result};
use crate::name::{GroupName, MetricName};
use crate::value::MetricValue;

/// An instant in time with millisecond resolution, normalized to UTC.
///
/// Stored as signed milliseconds since the Unix epoch; the sole ordering
/// key for collections within a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch (UTC).
    pub fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the milliseconds since the Unix epoch.
    pub fn as_unix_millis(self) -> i64 {
        self.0
    }
}

/// One group's observation: a group name plus its metric value mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesValue {
    group: GroupName,
    metrics: BTreeMap<MetricName, MetricValue>,
}

impl TimeSeriesValue {
    /// Creates a time series value from an already-unique metric map.
    pub fn new(group: GroupName, metrics: BTreeMap<MetricName, MetricValue>) -> Self {
        Self { group, metrics }
    }

    /// Creates a time series value from (name, value) pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateMetricName`] if two pairs share a
    /// metric name.
    pub fn from_metrics<I>(group: GroupName, metrics: I) -> Result<Self>
    where
        I: IntoIterator<Item = (MetricName, MetricValue)>,
    {
        let mut map = BTreeMap::new();
        for (name, value) in metrics {
            if map.contains_key(&name) {
                return Err(ModelError::DuplicateMetricName {
                    name: name.to_string(),
                }
                .into());
            }
            map.insert(name, value);
        }
        Ok(Self::new(group, map))
    }

    /// Returns the group identity.
    pub fn group(&self) -> &GroupName {
        &self.group
    }

    /// Returns the metric mapping, iterable in metric name order.
    pub fn metrics(&self) -> &BTreeMap<MetricName, MetricValue> {
        &self.metrics
    }

    /// Returns the value recorded for a metric, if present.
    pub fn get(&self, name: &MetricName) -> Option<&MetricValue> {
        self.metrics.get(name)
    }
}

/// An immutable snapshot of all groups observed at one timestamp.
///
/// Group names are unique across entries; entries are sorted by group name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesCollection {
    timestamp: Timestamp,
    entries: Vec<TimeSeriesValue>,
}

impl TimeSeriesCollection {
    /// Starts building a collection for the given timestamp.
    pub fn builder(timestamp: Timestamp) -> CollectionBuilder {
        CollectionBuilder {
            timestamp,
            entries: Vec::new(),
        }
    }

    /// Returns the snapshot timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the entries, sorted by group name.
    pub fn entries(&self) -> &[TimeSeriesValue] {
        &self.entries
    }

    /// Returns the entry for a group, if present.
    pub fn get(&self, group: &GroupName) -> Option<&TimeSeriesValue> {
        self.entries
            .binary_search_by(|entry| entry.group().cmp(group))
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Returns the number of group entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the collection has no group entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates [`TimeSeriesValue`] entries for one collection.
///
/// Uniqueness of group names is checked once, at [`CollectionBuilder::build`];
/// until then the builder accepts entries in any order.
#[derive(Debug)]
pub struct CollectionBuilder {
    timestamp: Timestamp,
    entries: Vec<TimeSeriesValue>,
}

impl CollectionBuilder {
    /// Adds one group entry.
    pub fn push(mut self, entry: TimeSeriesValue) -> Self {
        self.entries.push(entry);
        self
    }

    /// Adds one group entry through a mutable reference.
    pub fn add(&mut self, entry: TimeSeriesValue) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Finalizes the collection, sorting entries by group name.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateGroupName`] if two entries share a
    /// group name.
    pub fn build(self) -> Result<TimeSeriesCollection> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| a.group().cmp(b.group()));
        for pair in entries.windows(2) {
            if pair[0].group() == pair[1].group() {
                return Err(ModelError::DuplicateGroupName {
                    group: pair[0].group().to_string(),
                }
                .into());
            }
        }
        Ok(TimeSeriesCollection {
            timestamp: self.timestamp,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::{GroupPath, Tags};

    fn group(path: &[&str]) -> GroupName {
        GroupName::untagged(GroupPath::new(path.iter().copied()).unwrap())
    }

    fn entry(path: &[&str], value: MetricValue) -> TimeSeriesValue {
        TimeSeriesValue::from_metrics(
            group(path),
            [(MetricName::new(["value"]).unwrap(), value)],
        )
        .unwrap()
    }

    #[test]
    fn test_builder_produces_sorted_entries() {
        let collection = TimeSeriesCollection::builder(Timestamp::from_unix_millis(0))
            .push(entry(&["b"], MetricValue::Int(2)))
            .push(entry(&["a"], MetricValue::Int(1)))
            .build()
            .unwrap();

        let paths: Vec<_> = collection
            .entries()
            .iter()
            .map(|e| e.group().path().to_string())
            .collect();
        assert_eq!(paths, ["a", "b"]);
    }

    #[test]
    fn test_insertion_order_does_not_affect_equality() {
        let a = TimeSeriesCollection::builder(Timestamp::from_unix_millis(5))
            .push(entry(&["x"], MetricValue::Int(1)))
            .push(entry(&["y"], MetricValue::Int(2)))
            .build()
            .unwrap();
        let b = TimeSeriesCollection::builder(Timestamp::from_unix_millis(5))
            .push(entry(&["y"], MetricValue::Int(2)))
            .push(entry(&["x"], MetricValue::Int(1)))
            .build()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_duplicate_group_name_rejected_at_build() {
        let result = TimeSeriesCollection::builder(Timestamp::from_unix_millis(0))
            .push(entry(&["dup"], MetricValue::Int(1)))
            .push(entry(&["dup"], MetricValue::Int(2)))
            .build();
        match result {
            Err(crate::error::TsdError::Model(ModelError::DuplicateGroupName { group })) => {
                assert_eq!(group, "dup{}");
            }
            other => panic!("expected DuplicateGroupName, got {other:?}"),
        }
    }

    #[test]
    fn test_same_path_different_tags_are_distinct_groups() {
        let path = GroupPath::new(["test"]).unwrap();
        let tagged = GroupName::new(
            path.clone(),
            Tags::from_pairs([("t", MetricValue::Bool(true))]).unwrap(),
        );
        let collection = TimeSeriesCollection::builder(Timestamp::from_unix_millis(0))
            .push(TimeSeriesValue::new(tagged.clone(), BTreeMap::new()))
            .push(TimeSeriesValue::new(
                GroupName::untagged(path),
                BTreeMap::new(),
            ))
            .build()
            .unwrap();
        assert_eq!(collection.len(), 2);
        assert!(collection.get(&tagged).is_some());
    }

    #[test]
    fn test_duplicate_metric_name_rejected() {
        let name = MetricName::new(["m"]).unwrap();
        let result = TimeSeriesValue::from_metrics(
            group(&["g"]),
            [
                (name.clone(), MetricValue::Int(1)),
                (name, MetricValue::Int(2)),
            ],
        );
        assert!(matches!(
            result,
            Err(crate::error::TsdError::Model(
                ModelError::DuplicateMetricName { .. }
            ))
        ));
    }

    #[test]
    fn test_empty_collection_is_valid() {
        let collection = TimeSeriesCollection::builder(Timestamp::from_unix_millis(7))
            .build()
            .unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.timestamp().as_unix_millis(), 7);
    }
}
