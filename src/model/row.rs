use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::OnceCell;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// The lazily materialized view of a row's primary timestamp: the UTC epoch
/// milliseconds used for sorting/bucketing and the human form rendered in
/// the requested timezone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowTime {
    pub unixtime: i64,
    pub formatted: String,
}

/// A positional projection of one source record into the source's fixed
/// column set, plus a synthetic identity. Read-only after construction; the
/// timezone-dependent time view is computed on first access.
#[derive(Debug, Clone)]
pub struct Row {
    id: String,
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
    time_utc: Option<DateTime<Utc>>,
    tz: FixedOffset,
    time: OnceCell<RowTime>,
}

impl Row {
    pub fn new(
        id: String,
        columns: Arc<Vec<String>>,
        values: Vec<Value>,
        time_utc: Option<DateTime<Utc>>,
        tz: FixedOffset,
    ) -> Row {
        Row {
            id,
            columns,
            values,
            time_utc,
            tz,
            time: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn time_utc(&self) -> Option<DateTime<Utc>> {
        self.time_utc
    }

    /// Materialize the time view once per row.
    pub fn time(&self) -> &RowTime {
        self.time.get_or_init(|| match self.time_utc {
            Some(ts) => RowTime {
                unixtime: ts.timestamp_millis(),
                formatted: ts
                    .with_timezone(&self.tz)
                    .format("%Y-%m-%d %H:%M:%S%.3f")
                    .to_string(),
            },
            None => RowTime {
                unixtime: 0,
                formatted: String::new(),
            },
        })
    }

    /// The row as a structured record for filter evaluation and group-key
    /// derivation. The time column is rendered as an RFC3339 UTC string.
    pub fn record(&self) -> Value {
        let mut map = serde_json::Map::with_capacity(self.columns.len());
        for (name, value) in self.columns.iter().zip(self.values.iter()) {
            map.insert(name.clone(), value.clone());
        }
        if let Some(ts) = self.time_utc {
            map.insert(
                "time".to_string(),
                Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
            );
        }
        Value::Object(map)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("time", self.time())?;
        let values: serde_json::Map<String, Value> = self
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        map.serialize_entry("values", &values)?;
        map.end()
    }
}
