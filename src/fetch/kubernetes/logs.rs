use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::core::client::{ClusterApi, ClusterError, LogQuery, PodDetail, PodTopology};
use crate::core::fanout;
use crate::fetch::kubernetes::LogEntry;

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());

/// Terminal pod phases whose empty log reads are retried against the
/// previous container.
const TERMINAL_PHASES: [&str; 3] = ["Succeeded", "Failed", "Error"];

/// The inclusive time window plus the API-side bounds for one log pass.
#[derive(Debug, Clone, Copy)]
pub struct LogWindow {
    pub time_from: DateTime<Utc>,
    pub time_to: DateTime<Utc>,
    /// Derived from time_from vs. now, floored at zero; 0 disables.
    pub since_seconds: i64,
    /// 0 disables the tail cap.
    pub tail_lines: i64,
}

/// Parse the timestamp token the API server prefixes to each line. Both
/// `2026-02-11T06:18:07.123456789Z` and `2026-02-11T14:18:07.123456789+08:00`
/// forms are accepted; the result is always UTC.
pub fn parse_log_timestamp(token: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn strip_ansi(message: &str) -> String {
    ANSI_ESCAPE.replace_all(message, "").into_owned()
}

/// Split raw log text into entries: leading timestamp token, remainder as
/// message. Lines without a parseable timestamp are dropped silently, as are
/// lines outside the inclusive window.
fn parse_log_lines(
    raw: &str,
    window: &LogWindow,
    context: &str,
    namespace: &str,
    pod: &str,
    container: &str,
    detail: &PodDetail,
) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let mut filtered = 0usize;
    for line in raw.lines() {
        if line.is_empty() {
            continue;
        }
        let (token, message) = match line.split_once(' ') {
            Some((token, rest)) => (token, rest),
            None => (line, ""),
        };
        let Some(timestamp) = parse_log_timestamp(token) else {
            continue;
        };
        if timestamp < window.time_from || timestamp > window.time_to {
            filtered += 1;
            continue;
        }
        entries.push(LogEntry {
            context: context.to_string(),
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
            node: detail.node.clone(),
            labels: detail.labels.clone(),
            annotations: detail.annotations.clone(),
            status: detail.status.clone(),
            timestamp,
            message: strip_ansi(message),
        });
    }
    if filtered > 0 {
        debug!(
            "{}/{}/{}/{}: {} line(s) outside the requested window",
            context, namespace, pod, container, filtered
        );
    }
    entries
}

/// Fetch one container's logs with the fallback ladder:
/// 1. primary read with timestamps;
/// 2. "container terminated" API error -> retry previous logs, a failed
///    retry means "no logs" rather than an error;
/// 3. empty text with a terminal pod phase -> same previous-logs retry.
async fn fetch_container_logs(
    client: &dyn ClusterApi,
    window: &LogWindow,
    context: &str,
    namespace: &str,
    pod: &str,
    container: &str,
    detail: &PodDetail,
) -> Result<Vec<LogEntry>, ClusterError> {
    let query = LogQuery {
        namespace: namespace.to_string(),
        pod: pod.to_string(),
        container: container.to_string(),
        since_seconds: window.since_seconds,
        tail_lines: window.tail_lines,
        previous: false,
        timestamps: true,
    };

    let raw = match client.read_container_logs(&query).await {
        Ok(raw) => raw,
        Err(err) if err.is_terminated_container() => {
            debug!(
                "{}/{}/{}/{}: terminated, retrying previous container logs",
                context, namespace, pod, container
            );
            let previous = LogQuery {
                previous: true,
                ..query.clone()
            };
            match client.read_container_logs(&previous).await {
                Ok(raw) => raw,
                Err(_) => return Ok(Vec::new()),
            }
        }
        Err(err) => return Err(err),
    };

    let raw = if raw.is_empty() && TERMINAL_PHASES.contains(&detail.status.as_str()) {
        let previous = LogQuery {
            previous: true,
            ..query
        };
        match client.read_container_logs(&previous).await {
            Ok(raw) => raw,
            Err(_) => return Ok(Vec::new()),
        }
    } else {
        raw
    };

    Ok(parse_log_lines(
        &raw, window, context, namespace, pod, container, detail,
    ))
}

/// Fan out over every (context, namespace, pod, container) of the resolved
/// topology and collect entries plus per-partition errors keyed by
/// `context/namespace/pod/container`.
pub async fn collect_logs<F, Fut>(
    topology: &PodTopology,
    window: LogWindow,
    context_fanout: usize,
    max_concurrent: usize,
    client_for: F,
) -> (Vec<LogEntry>, BTreeMap<String, String>)
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Arc<dyn ClusterApi>>>,
{
    let items: Vec<(String, String)> = topology
        .keys()
        .map(|context| (context.clone(), context.clone()))
        .collect();

    let outcome = fanout::bounded(items, context_fanout, |context: String| {
        let client_fut = client_for(context.clone());
        async move {
            let client = client_fut.await?;
            let pods_by_namespace = topology.get(&context).cloned().unwrap_or_default();

            let mut tasks: Vec<(String, (String, String, String, PodDetail))> = Vec::new();
            for (namespace, pods) in pods_by_namespace {
                for (pod, detail) in pods {
                    for container in &detail.containers {
                        tasks.push((
                            format!("{}/{}/{}", namespace, pod, container),
                            (
                                namespace.clone(),
                                pod.clone(),
                                container.clone(),
                                detail.clone(),
                            ),
                        ));
                    }
                }
            }

            let context_name = context.clone();
            let client_ref = client.clone();
            let inner = fanout::bounded(
                tasks,
                max_concurrent,
                move |(namespace, pod, container, detail): (String, String, String, PodDetail)| {
                    let client = client_ref.clone();
                    let context = context_name.clone();
                    async move {
                        let entries = fetch_container_logs(
                            client.as_ref(),
                            &window,
                            &context,
                            &namespace,
                            &pod,
                            &container,
                            &detail,
                        )
                        .await?;
                        Ok(entries)
                    }
                },
            )
            .await;

            let entries: Vec<LogEntry> = inner.ok.into_values().flatten().collect();
            Ok((entries, inner.errors))
        }
    })
    .await;

    let mut entries = Vec::new();
    let mut errors = BTreeMap::new();
    for (context, (context_entries, inner_errors)) in outcome.ok {
        entries.extend(context_entries);
        for (key, message) in inner_errors {
            errors.insert(format!("{}/{}", context, key), message);
        }
    }
    for (context, message) in outcome.errors {
        errors.insert(context, message);
    }
    (entries, errors)
}
