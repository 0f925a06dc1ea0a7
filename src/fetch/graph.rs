//! Time-bucketed series aggregation shared by both backends.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::model::row::Row;
use crate::query::record_path;

/// Upper bound on bucket count for one graph.
pub const MAX_GRAPH_POINTS: i64 = 150;

/// Windows at or below this many seconds keep native per-record timestamps.
pub const NATIVE_BUCKETING_MAX_SECONDS: f64 = 15.0;

/// Series name for records whose group value is null or absent.
pub const NULL_GROUP: &str = "__none__";

/// Series name when no grouping was requested.
pub const IMPLICIT_SERIES: &str = "Rows";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphData {
    /// Sorted unique bucket timestamps (epoch ms). Always contains the
    /// requested window bounds, so the series spans the full window even
    /// when its edges are empty.
    pub timestamps: Vec<i64>,
    /// Group name -> per-bucket counts aligned with `timestamps`.
    pub data: BTreeMap<String, Vec<u64>>,
    pub total: u64,
}

/// Bucket width for the window, or None when the window is short enough for
/// native per-record timestamps.
pub fn bucket_interval_seconds(time_from: i64, time_to: i64) -> Option<i64> {
    let range_seconds = (time_to - time_from) as f64 / 1000.0;
    if range_seconds > NATIVE_BUCKETING_MAX_SECONDS {
        let interval = (range_seconds / MAX_GRAPH_POINTS as f64).round() as i64;
        Some(interval.max(1))
    } else {
        None
    }
}

/// Collects (bucket timestamp, group, count) triples and assembles the
/// aligned, zero-filled series. Both backends feed it: the database backend
/// with pre-aggregated counts, the log backend with one count per record.
pub struct GraphAccumulator {
    interval_seconds: Option<i64>,
    timestamps: BTreeSet<i64>,
    counts: BTreeMap<String, BTreeMap<i64, u64>>,
    total: u64,
}

impl GraphAccumulator {
    pub fn new(time_from: i64, time_to: i64) -> GraphAccumulator {
        let mut timestamps = BTreeSet::new();
        timestamps.insert(time_from);
        timestamps.insert(time_to);
        GraphAccumulator {
            interval_seconds: bucket_interval_seconds(time_from, time_to),
            timestamps,
            counts: BTreeMap::new(),
            total: 0,
        }
    }

    /// Add an already-bucketed count (database backend path).
    pub fn add_bucket(&mut self, bucket_ts: i64, group: String, count: u64) {
        self.timestamps.insert(bucket_ts);
        *self
            .counts
            .entry(group)
            .or_default()
            .entry(bucket_ts)
            .or_insert(0) += count;
        self.total += count;
    }

    /// Add one record, bucketing its timestamp by the window's interval.
    pub fn add_record(&mut self, ts_ms: i64, group: Option<String>) {
        let bucket = match self.interval_seconds {
            Some(interval) => {
                let interval_ms = interval * 1000;
                ts_ms.div_euclid(interval_ms) * interval_ms
            }
            None => ts_ms,
        };
        self.add_bucket(bucket, group.unwrap_or_else(|| IMPLICIT_SERIES.to_string()), 1);
    }

    pub fn finish(self) -> GraphData {
        let timestamps: Vec<i64> = self.timestamps.into_iter().collect();
        let data = self
            .counts
            .into_iter()
            .map(|(group, buckets)| {
                let series = timestamps
                    .iter()
                    .map(|ts| buckets.get(ts).copied().unwrap_or(0))
                    .collect();
                (group, series)
            })
            .collect();
        GraphData {
            timestamps,
            data,
            total: self.total,
        }
    }
}

/// Aggregate already-filtered rows into a graph, optionally grouped by a
/// (possibly dotted) column of the row record.
pub fn graph_from_rows(
    rows: &[Row],
    time_from: i64,
    time_to: i64,
    group_by: Option<&str>,
) -> GraphData {
    let mut acc = GraphAccumulator::new(time_from, time_to);
    for row in rows {
        let group = group_by.map(|path| group_value(&row.record(), path));
        acc.add_record(row.time().unixtime, group);
    }
    acc.finish()
}

/// Derive the series name for one record. Null and absent values land in
/// the explicit sentinel group instead of being dropped.
pub fn group_value(record: &Value, path: &str) -> String {
    match record_path(record, path) {
        None | Some(Value::Null) => NULL_GROUP.to_string(),
        Some(Value::String(s)) if s.is_empty() => NULL_GROUP.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn row_at(ts_ms: i64, team: Option<&str>) -> Row {
        let columns = Arc::new(vec!["labels".to_string(), "message".to_string()]);
        let labels = match team {
            Some(team) => json!({ "team": team }),
            None => json!({ "team": null }),
        };
        Row::new(
            format!("row-{}", ts_ms),
            columns,
            vec![labels, json!("msg")],
            Some(Utc.timestamp_millis_opt(ts_ms).unwrap()),
            chrono::FixedOffset::east_opt(0).unwrap(),
        )
    }

    #[test]
    fn window_bounds_are_always_present_and_sorted() {
        let time_from = 1_700_000_000_000;
        let time_to = time_from + 3_600_000;
        let rows = vec![row_at(time_from + 60_000, Some("core"))];
        let graph = graph_from_rows(&rows, time_from, time_to, None);

        assert!(graph.timestamps.contains(&time_from));
        assert!(graph.timestamps.contains(&time_to));
        assert!(graph.timestamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn bucket_count_stays_within_the_cap() {
        let time_from = 1_700_000_000_000;
        let time_to = time_from + 24 * 3_600_000;
        let interval = bucket_interval_seconds(time_from, time_to).unwrap();
        assert_eq!(interval, (24.0 * 3600_f64 / 150.0).round() as i64);

        let mut acc = GraphAccumulator::new(time_from, time_to);
        for i in 0..10_000i64 {
            acc.add_record(time_from + i * 8_640, None);
        }
        let graph = acc.finish();
        // Window bounds may add two extra points beyond the bucket cap.
        assert!(graph.timestamps.len() as i64 <= MAX_GRAPH_POINTS + 2);
        assert_eq!(graph.total, 10_000);
    }

    #[test]
    fn short_windows_keep_native_timestamps() {
        let time_from = 1_700_000_000_000;
        let time_to = time_from + 10_000;
        assert_eq!(bucket_interval_seconds(time_from, time_to), None);

        let mut acc = GraphAccumulator::new(time_from, time_to);
        acc.add_record(time_from + 1_234, None);
        acc.add_record(time_from + 1_234, None);
        let graph = acc.finish();
        assert!(graph.timestamps.contains(&(time_from + 1_234)));
        assert_eq!(graph.data[IMPLICIT_SERIES].iter().sum::<u64>(), 2);
    }

    #[test]
    fn per_group_sums_match_totals() {
        let time_from = 1_700_000_000_000;
        let time_to = time_from + 3_600_000;
        let rows = vec![
            row_at(time_from + 10_000, Some("core")),
            row_at(time_from + 20_000, Some("core")),
            row_at(time_from + 30_000, Some("infra")),
        ];
        let graph = graph_from_rows(&rows, time_from, time_to, Some("labels.team"));

        let core_sum: u64 = graph.data["core"].iter().sum();
        let infra_sum: u64 = graph.data["infra"].iter().sum();
        assert_eq!(core_sum, 2);
        assert_eq!(infra_sum, 1);
        let all: u64 = graph.data.values().flat_map(|s| s.iter()).sum();
        assert_eq!(all, graph.total);
        assert_eq!(graph.total, 3);
    }

    #[test]
    fn null_group_lands_in_the_sentinel_series() {
        let time_from = 1_700_000_000_000;
        let time_to = time_from + 3_600_000;
        let rows = vec![
            row_at(time_from + 10_000, Some("core")),
            row_at(time_from + 20_000, None),
        ];
        let graph = graph_from_rows(&rows, time_from, time_to, Some("labels.team"));

        assert_eq!(graph.data[NULL_GROUP].iter().sum::<u64>(), 1);
        assert_eq!(graph.data["core"].iter().sum::<u64>(), 1);
        assert_eq!(graph.total, 2);
    }

    #[test]
    fn all_series_are_aligned_with_timestamps() {
        let time_from = 1_700_000_000_000;
        let time_to = time_from + 3_600_000;
        let mut acc = GraphAccumulator::new(time_from, time_to);
        acc.add_bucket(time_from + 60_000, "a".to_string(), 5);
        acc.add_bucket(time_from + 120_000, "b".to_string(), 7);
        let graph = acc.finish();

        for series in graph.data.values() {
            assert_eq!(series.len(), graph.timestamps.len());
        }
        assert_eq!(graph.total, 12);
    }
}
