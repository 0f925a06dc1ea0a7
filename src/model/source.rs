use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::EngineError;

/// Backend kind of a data source. Dispatch is always an explicit match on
/// this enum, one fetcher implementation per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Clickhouse,
    Kubernetes,
}

/// Normalized base kind of a column, derived from the backend's raw type
/// string. Wrappers like `Nullable(...)` and `LowCardinality(...)` and type
/// parameters like `DateTime64(3)` are stripped before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    DateTime,
    DateTime64,
    Timestamp,
    UInt64,
    Int64,
    Float64,
    String,
    Json,
    Map,
    Array,
    Other,
}

impl ColumnKind {
    pub fn parse(raw: &str) -> ColumnKind {
        let mut base = raw.trim().to_ascii_lowercase();
        for wrapper in ["nullable(", "lowcardinality("] {
            if let Some(inner) = base.strip_prefix(wrapper) {
                base = inner.trim_end_matches(')').to_string();
            }
        }
        let head = base.split('(').next().unwrap_or("").to_string();
        match head.as_str() {
            "datetime" => ColumnKind::DateTime,
            "datetime64" => ColumnKind::DateTime64,
            "timestamp" => ColumnKind::Timestamp,
            "uint64" => ColumnKind::UInt64,
            "int64" => ColumnKind::Int64,
            "float64" => ColumnKind::Float64,
            "string" | "fixedstring" => ColumnKind::String,
            "json" | "object" => ColumnKind::Json,
            "map" => ColumnKind::Map,
            "array" => ColumnKind::Array,
            _ => ColumnKind::Other,
        }
    }

    /// Kinds the time clause and projection treat as the primary timestamp.
    pub fn is_timestamp_like(self) -> bool {
        matches!(
            self,
            ColumnKind::DateTime
                | ColumnKind::DateTime64
                | ColumnKind::Timestamp
                | ColumnKind::UInt64
                | ColumnKind::Int64
        )
    }

    /// Integer-backed time columns need an explicit toDateTime cast before
    /// timezone normalization.
    pub fn needs_datetime_cast(self) -> bool {
        matches!(
            self,
            ColumnKind::Timestamp | ColumnKind::UInt64 | ColumnKind::Int64
        )
    }
}

/// One declared column of a source, fixed at schema-fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceColumn {
    pub name: String,
    pub kind: ColumnKind,
    /// The backend's raw type string as reported by the schema probe.
    pub raw_type: String,
    /// Whether the column stores serialized JSON that dotted paths index into.
    pub jsonstring: bool,
    pub autocomplete: bool,
    /// Declared enumeration of known values, when the source provides one.
    pub values: Vec<String>,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, raw_type: impl Into<String>) -> SourceColumn {
        let raw_type = raw_type.into();
        SourceColumn {
            name: name.into(),
            kind: ColumnKind::parse(&raw_type),
            raw_type,
            jsonstring: false,
            autocomplete: true,
            values: Vec::new(),
        }
    }

    pub fn without_autocomplete(mut self) -> SourceColumn {
        self.autocomplete = false;
        self
    }

    pub fn as_jsonstring(mut self) -> SourceColumn {
        self.jsonstring = true;
        self
    }

    /// For dotted names (`labels.team`) the part the backend actually stores.
    pub fn root_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// ClickHouse credential bundle. TLS material is carried as PEM text and
/// loaded into the HTTP client from memory.
#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct ClickhouseConnection {
    #[validate(length(min = 1, message = "host must not be empty"))]
    pub host: String,
    #[validate(range(min = 1, message = "port must be non-zero"))]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    pub verify: bool,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_cert_key: Option<String>,
}

/// Kubernetes credential bundle: a kubeconfig carried inline or referenced
/// by a local path. The resolved content's hash partitions every cache.
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct KubernetesConnection {
    #[validate(length(min = 1, message = "kubeconfig must not be empty"))]
    pub kubeconfig: String,
    pub kubeconfig_is_local: bool,
    /// Optional query-language expression limiting the usable contexts.
    pub context_filter: String,
    /// Fan-out cap for namespace/pod/log calls issued for this connection.
    pub max_concurrent_requests: usize,
}

impl Default for KubernetesConnection {
    fn default() -> Self {
        KubernetesConnection {
            kubeconfig: String::new(),
            kubeconfig_is_local: false,
            context_filter: String::new(),
            max_concurrent_requests: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Connection {
    Clickhouse(ClickhouseConnection),
    Kubernetes(KubernetesConnection),
}

impl Connection {
    pub fn validate(&self) -> Result<(), EngineError> {
        let outcome = match self {
            Connection::Clickhouse(conn) => conn.validate(),
            Connection::Kubernetes(conn) => conn.validate(),
        };
        outcome.map_err(|err| EngineError::configuration(err.to_string()))
    }
}

/// Kubernetes-specific source options: namespace narrowing applied during
/// discovery. Pod-level selection arrives per request instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KubernetesSourceOptions {
    pub namespace_label_selector: String,
    pub namespace_field_selector: String,
    /// Query-language expression evaluated against each namespace record.
    pub namespace_filter: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClickhouseSourceOptions {
    pub database: String,
    pub table: String,
    /// Raw `SETTINGS` clause appended verbatim to generated queries.
    pub settings: String,
}

/// A named, typed data origin. Immutable for the duration of a request;
/// fetch operations never mutate it.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub kind: SourceKind,
    pub connection_id: i64,
    pub connection: Connection,
    /// Declared column set, ordered by name. Fixed at schema-fetch time and
    /// shared by every fetch operation within one request.
    pub columns: BTreeMap<String, SourceColumn>,
    pub time_column: String,
    pub date_column: Option<String>,
    pub kubernetes: KubernetesSourceOptions,
    pub clickhouse: ClickhouseSourceOptions,
}

impl Source {
    pub fn column(&self, name: &str) -> Option<&SourceColumn> {
        self.columns.get(name)
    }

    pub fn clickhouse_connection(&self) -> Result<&ClickhouseConnection, EngineError> {
        match &self.connection {
            Connection::Clickhouse(conn) => Ok(conn),
            _ => Err(EngineError::configuration(format!(
                "source {} does not carry a clickhouse connection",
                self.name
            ))),
        }
    }

    pub fn kubernetes_connection(&self) -> Result<&KubernetesConnection, EngineError> {
        match &self.connection {
            Connection::Kubernetes(conn) => Ok(conn),
            _ => Err(EngineError::configuration(format!(
                "source {} does not carry a kubernetes connection",
                self.name
            ))),
        }
    }

    /// Fully qualified, backquoted `database`.`table` target.
    pub fn target(&self) -> String {
        format!(
            "`{}`.`{}`",
            self.clickhouse.database, self.clickhouse.table
        )
    }
}
