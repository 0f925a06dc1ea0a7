pub mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::client::clickhouse_http::{
    value_as_i64, value_as_string, value_as_u64, DatabaseClient, QueryOutput,
};
use crate::engine::FetchEngine;
use crate::errors::EngineError;
use crate::fetch::graph::{bucket_interval_seconds, GraphAccumulator, IMPLICIT_SERIES, NULL_GROUP};
use crate::fetch::clickhouse::sql::{
    autocomplete_query, group_by_expr, schema_query, select_query, stats_query,
};
use crate::fetch::Fetcher;
use crate::model::request::{AutocompleteRequest, DataRequest, GraphDataRequest};
use crate::model::response::{
    AutocompleteResponse, ConnectionTestNgResponse, ConnectionTestResponse, DataAndGraphResponse,
    DataResponse, GraphDataResponse,
};
use crate::model::row::Row;
use crate::model::source::{Source, SourceColumn};
use crate::query::parse_optional;

pub struct ClickhouseFetcher {
    engine: Arc<FetchEngine>,
}

impl ClickhouseFetcher {
    pub fn new(engine: Arc<FetchEngine>) -> ClickhouseFetcher {
        ClickhouseFetcher { engine }
    }

    fn client(&self, source: &Source) -> Result<Arc<dyn DatabaseClient>, EngineError> {
        let conn = source.clickhouse_connection()?;
        self.engine
            .database_factory
            .build(conn)
            .map_err(|err| EngineError::configuration(err.to_string()))
    }

    /// Compile the optional query-language filter into a predicate. Parse
    /// and compile failures both reject the request before any network call.
    fn filter_clause(&self, source: &Source, query: &str) -> Result<Option<String>, EngineError> {
        let parsed = parse_optional(self.engine.query_language.as_ref(), query)
            .map_err(|err| EngineError::parse(err.message))?;
        match parsed {
            Some(parsed) => parsed
                .to_sql(&source.columns)
                .map(Some)
                .map_err(|err| EngineError::parse(err.message)),
            None => Ok(None),
        }
    }

    fn raw_clause(raw_query: &str) -> Option<String> {
        let trimmed = raw_query.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Positional materialization: the synthetic identity leads, the sorted
    /// column values follow.
    fn rows_from_output(source: &Source, output: &QueryOutput, tz: FixedOffset) -> Vec<Row> {
        let names: Vec<String> = source.columns.keys().cloned().collect();
        let time_index = names.iter().position(|name| name == &source.time_column);
        let columns = Arc::new(names);

        output
            .rows
            .iter()
            .map(|row| {
                let id = row
                    .first()
                    .map(value_as_string)
                    .unwrap_or_default();
                let values: Vec<Value> = row.iter().skip(1).cloned().collect();
                let time_utc = time_index
                    .and_then(|index| values.get(index))
                    .and_then(|value| parse_result_timestamp(value));
                Row::new(id, columns.clone(), values, time_utc, tz)
            })
            .collect()
    }

    fn graph_from_stats(
        output: &QueryOutput,
        time_from: i64,
        time_to: i64,
        grouped: bool,
    ) -> GraphDataResponse {
        let mut acc = GraphAccumulator::new(time_from, time_to);
        for row in &output.rows {
            let Some(ts) = row.first().and_then(value_as_i64) else {
                continue;
            };
            let count = row.get(1).and_then(value_as_u64).unwrap_or(0);
            let group = if grouped {
                match row.get(2) {
                    Some(Value::Null) | None => NULL_GROUP.to_string(),
                    Some(value) => {
                        let name = value_as_string(value);
                        if name.is_empty() {
                            NULL_GROUP.to_string()
                        } else {
                            name
                        }
                    }
                }
            } else {
                IMPLICIT_SERIES.to_string()
            };
            acc.add_bucket(ts, group, count);
        }
        acc.finish().into()
    }

    async fn run_stats(
        &self,
        client: &dyn DatabaseClient,
        request: &GraphDataRequest,
        filter_clause: Option<String>,
    ) -> Result<GraphDataResponse, EngineError> {
        let source = &request.source;
        let group = match request.group_by_column() {
            Some(name) => Some((name, group_by_expr(source, name)?)),
            None => None,
        };
        let sql = stats_query(
            source,
            filter_clause,
            Self::raw_clause(&request.raw_query),
            request.time_from,
            request.time_to,
            bucket_interval_seconds(request.time_from, request.time_to),
            group.as_ref().map(|(name, expr)| (*name, expr.as_str())),
        )?;

        match client.execute(&sql, &[]).await {
            Ok(output) => Ok(Self::graph_from_stats(
                &output,
                request.time_from,
                request.time_to,
                group.is_some(),
            )),
            Err(err) => {
                warn!("graph query failed: {:#}", err);
                Ok(GraphDataResponse::with_error(format!(
                    "Failed to fetch graph data: {}",
                    err
                )))
            }
        }
    }
}

/// toTimeZone renders timestamps as `YYYY-MM-DD HH:MM:SS[.fff]` in UTC.
fn parse_result_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

#[async_trait]
impl Fetcher for ClickhouseFetcher {
    async fn validate_query(&self, source: &Source, query: &str) -> (bool, Option<String>) {
        match self.filter_clause(source, query) {
            Ok(_) => (true, None),
            Err(err) => match err {
                EngineError::Parse(message) | EngineError::Configuration(message) => {
                    (false, Some(message))
                }
            },
        }
    }

    async fn test_connection(&self, source: &Source) -> ConnectionTestResponse {
        let mut response = ConnectionTestResponse::default();
        let client = match self.client(source) {
            Ok(client) => client,
            Err(err) => {
                response.reachability.error = Some(err.to_string());
                response.schema.error = Some("Skipped due to reachability test failed".to_string());
                return response;
            }
        };

        let probe = format!("SELECT 1 FROM {} LIMIT 1", source.target());
        if let Err(err) = client.execute(&probe, &[]).await {
            response.reachability.error = Some(err.to_string());
            response.schema.error = Some("Skipped due to reachability test failed".to_string());
            return response;
        }
        response.reachability.result = true;

        let params = vec![
            ("database".to_string(), source.clickhouse.database.clone()),
            ("table".to_string(), source.clickhouse.table.clone()),
        ];
        match client.execute(schema_query(), &params).await {
            Ok(output) => {
                response.schema.result = true;
                response.schema.data = columns_from_schema(&output);
            }
            Err(err) => {
                response.schema.error = Some(err.to_string());
            }
        }

        // The raw table DDL is informational; losing it is not a failure.
        match client
            .execute(&format!("SHOW CREATE TABLE {}", source.target()), &[])
            .await
        {
            Ok(output) => {
                response.schema.raw = output
                    .rows
                    .first()
                    .and_then(|row| row.first())
                    .map(value_as_string);
            }
            Err(err) => {
                debug!("failed to fetch raw table schema (ignoring): {:#}", err);
            }
        }

        response
    }

    async fn test_connection_ng(&self, source: &Source) -> ConnectionTestNgResponse {
        let mut response = ConnectionTestNgResponse::default();
        let client = match self.client(source) {
            Ok(client) => client,
            Err(err) => {
                response.error = Some(err.to_string());
                return response;
            }
        };
        match client.execute("SELECT now()", &[]).await {
            Ok(_) => response.result = true,
            Err(err) => response.error = Some(err.to_string()),
        }
        response
    }

    async fn get_schema(&self, source: &Source) -> anyhow::Result<Vec<SourceColumn>> {
        let client = self.client(source)?;
        // Validates the table exists before asking for its columns.
        client
            .execute(&format!("SELECT 1 FROM {} LIMIT 1", source.target()), &[])
            .await?;

        let params = vec![
            ("database".to_string(), source.clickhouse.database.clone()),
            ("table".to_string(), source.clickhouse.table.clone()),
        ];
        let output = client.execute(schema_query(), &params).await?;
        Ok(columns_from_schema(&output))
    }

    async fn autocomplete(
        &self,
        request: &AutocompleteRequest,
    ) -> anyhow::Result<AutocompleteResponse> {
        let source = &request.source;
        let limit = self.engine.settings.autocomplete_limit;
        let sql = autocomplete_query(
            source,
            &request.column,
            request.time_from,
            request.time_to,
            limit,
        );
        let params = vec![("value".to_string(), format!("%{}%", request.value))];

        let client = self.client(source)?;
        let output = client.execute(&sql, &params).await?;
        let items: Vec<String> = output
            .rows
            .iter()
            .filter_map(|row| row.first().map(value_as_string))
            .collect();
        let incomplete = items.len() >= limit;
        Ok(AutocompleteResponse { items, incomplete })
    }

    async fn fetch_data(
        &self,
        request: &DataRequest,
        tz: FixedOffset,
    ) -> Result<DataResponse, EngineError> {
        let source = &request.source;
        let filter_clause = self.filter_clause(source, &request.query)?;
        let sql = select_query(
            source,
            filter_clause,
            Self::raw_clause(&request.raw_query),
            request.time_from,
            request.time_to,
            request.limit,
        );

        let client = self.client(source)?;
        match client.execute(&sql, &[]).await {
            Ok(output) => Ok(DataResponse {
                rows: Self::rows_from_output(source, &output, tz),
                error: None,
                message: None,
            }),
            Err(err) => {
                warn!("data query failed: {:#}", err);
                Ok(DataResponse::with_error(format!(
                    "Failed to fetch data: {}",
                    err
                )))
            }
        }
    }

    async fn fetch_graph_data(
        &self,
        request: &GraphDataRequest,
    ) -> Result<GraphDataResponse, EngineError> {
        let filter_clause = self.filter_clause(&request.source, &request.query)?;
        let client = self.client(&request.source)?;
        self.run_stats(client.as_ref(), request, filter_clause).await
    }

    async fn fetch_data_and_graph(
        &self,
        request: &GraphDataRequest,
        tz: FixedOffset,
    ) -> Result<DataAndGraphResponse, EngineError> {
        let source = &request.source;
        let filter_clause = self.filter_clause(source, &request.query)?;

        // One client session serves both the row view and the series.
        let client = self.client(source)?;

        let data_sql = select_query(
            source,
            filter_clause.clone(),
            Self::raw_clause(&request.raw_query),
            request.time_from,
            request.time_to,
            request.limit,
        );
        let rows = match client.execute(&data_sql, &[]).await {
            Ok(output) => Self::rows_from_output(source, &output, tz),
            Err(err) => {
                warn!("data query failed: {:#}", err);
                return Ok(DataAndGraphResponse::with_error(format!(
                    "Failed to fetch data: {}",
                    err
                )));
            }
        };

        let graph = self
            .run_stats(client.as_ref(), request, filter_clause)
            .await?;
        Ok(DataAndGraphResponse {
            rows,
            graph,
            error: None,
            message: None,
        })
    }
}

fn columns_from_schema(output: &QueryOutput) -> Vec<SourceColumn> {
    output
        .rows
        .iter()
        .filter_map(|row| {
            let name = row.first().map(value_as_string)?;
            let type_name = row.get(1).map(value_as_string)?;
            Some(SourceColumn::new(name, type_name))
        })
        .collect()
}
