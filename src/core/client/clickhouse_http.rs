use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use validator::Validate;

use crate::model::source::ClickhouseConnection;

/// Column descriptor as reported by the server alongside a result set.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

/// The database client surface the engine consumes. Parameters bind literal
/// scalar values only — generated clause structure is never parameterized.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        params: &[(String, String)],
    ) -> anyhow::Result<QueryOutput>;
}

/// Builds a client for a connection. Injected so tests can substitute a
/// scripted client.
pub trait DatabaseClientFactory: Send + Sync {
    fn build(&self, conn: &ClickhouseConnection) -> anyhow::Result<Arc<dyn DatabaseClient>>;
}

pub struct ClickhouseHttpFactory;

impl DatabaseClientFactory for ClickhouseHttpFactory {
    fn build(&self, conn: &ClickhouseConnection) -> anyhow::Result<Arc<dyn DatabaseClient>> {
        Ok(Arc::new(ClickhouseHttpClient::new(conn)?))
    }
}

/// ClickHouse client over the HTTP interface. TLS material is taken from
/// the connection's PEM blobs in memory.
pub struct ClickhouseHttpClient {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl ClickhouseHttpClient {
    pub fn new(conn: &ClickhouseConnection) -> anyhow::Result<ClickhouseHttpClient> {
        conn.validate()
            .context("invalid clickhouse connection settings")?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60));

        if let Some(ca) = conn.ca_cert.as_deref().filter(|pem| !pem.is_empty()) {
            let cert = reqwest::Certificate::from_pem(ca.as_bytes())
                .context("invalid ca certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (
            conn.client_cert.as_deref().filter(|pem| !pem.is_empty()),
            conn.client_cert_key
                .as_deref()
                .filter(|pem| !pem.is_empty()),
        ) {
            let identity = reqwest::Identity::from_pem(format!("{}\n{}", cert, key).as_bytes())
                .context("invalid client certificate")?;
            builder = builder.identity(identity);
        }
        if conn.ssl && !conn.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let scheme = if conn.ssl { "https" } else { "http" };
        Ok(ClickhouseHttpClient {
            http: builder.build()?,
            endpoint: format!("{}://{}:{}/", scheme, conn.host, conn.port),
            user: conn.user.clone(),
            password: conn.password.clone(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct JsonCompactBody {
    #[serde(default)]
    meta: Vec<ColumnMeta>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[async_trait]
impl DatabaseClient for ClickhouseHttpClient {
    async fn execute(
        &self,
        query: &str,
        params: &[(String, String)],
    ) -> anyhow::Result<QueryOutput> {
        let mut url = format!(
            "{}?default_format=JSONCompact&output_format_json_quote_64bit_integers=0",
            self.endpoint
        );
        for (name, value) in params {
            url.push_str(&format!(
                "&param_{}={}",
                name,
                urlencoding::encode(value)
            ));
        }

        debug!("executing clickhouse query ({} bytes)", query.len());
        let response = self
            .http
            .post(&url)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(query.to_string())
            .send()
            .await
            .context("clickhouse request failed")?;

        let status = response.status();
        let body = response.text().await.context("clickhouse response read")?;
        if !status.is_success() {
            bail!(
                "clickhouse http {}: {}",
                status.as_u16(),
                body.chars().take(500).collect::<String>()
            );
        }
        if body.trim().is_empty() {
            return Ok(QueryOutput::default());
        }

        let parsed: JsonCompactBody =
            serde_json::from_str(&body).context("unexpected clickhouse response body")?;
        Ok(QueryOutput {
            columns: parsed.meta,
            rows: parsed.data,
        })
    }
}

/// Result-set numbers arrive as JSON numbers or, for 64-bit types on older
/// servers, quoted strings. Accept both.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Render a result value the way a user expects to read it (strings bare,
/// everything else as JSON).
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
