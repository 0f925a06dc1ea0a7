//! periscope-core — federated fetch engine over heterogeneous backends:
//! a ClickHouse analytical store and live pod logs across many Kubernetes
//! clusters, behind one query and time-series API.
//!
//! The owning process constructs a [`engine::FetchEngine`] with its query
//! language implementation and [`config::Settings`], then obtains a
//! per-kind fetcher via [`engine::FetchEngine::fetcher`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use periscope_core::config::Settings;
//! use periscope_core::engine::FetchEngine;
//! use periscope_core::model::source::SourceKind;
//! # fn language() -> Arc<dyn periscope_core::query::QueryLanguage> { unimplemented!() }
//!
//! let engine = FetchEngine::new(language(), Settings::from_env());
//! let fetcher = engine.clone().fetcher(SourceKind::Kubernetes);
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod fetch;
pub mod model;
pub mod query;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::FetchEngine;
pub use fetch::{Fetcher, SourceFetcher};
