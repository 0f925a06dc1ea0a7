use std::env;
use std::time::Duration;

use tracing::warn;

/// Tunables for the fetch engine. Every cache/pool/fan-out policy knob lives
/// here so the owning process constructs the engine with explicit lifetimes
/// and limits instead of ambient globals.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long discovered cluster topology (contexts, namespaces, pods)
    /// stays valid in the shared cache.
    pub topology_ttl: Duration,
    /// Upper bound on live cluster client handles, evicted by recency.
    pub client_pool_capacity: usize,
    /// Parallelism across cluster contexts in one request.
    pub context_fanout: usize,
    /// Per-source default for namespace/pod/log fan-out when the connection
    /// does not specify its own cap.
    pub default_max_concurrent_requests: usize,
    /// Result cap for autocomplete queries; hitting it sets the incomplete
    /// flag instead of failing.
    pub autocomplete_limit: usize,
    /// Connect timeout applied to every cluster API client.
    pub connect_timeout: Duration,
    /// Read timeout applied to every cluster API client.
    pub read_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            topology_ttl: Duration::from_secs(30),
            client_pool_capacity: 100,
            context_fanout: 10,
            default_max_concurrent_requests: 20,
            autocomplete_limit: 500,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults.
    /// Reads a `.env` file when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Settings::default();
        Settings {
            topology_ttl: Duration::from_secs(env_u64(
                "PERISCOPE_TOPOLOGY_TTL_SECS",
                defaults.topology_ttl.as_secs(),
            )),
            client_pool_capacity: env_usize(
                "PERISCOPE_CLIENT_POOL_CAPACITY",
                defaults.client_pool_capacity,
            ),
            context_fanout: env_usize("PERISCOPE_CONTEXT_FANOUT", defaults.context_fanout),
            default_max_concurrent_requests: env_usize(
                "PERISCOPE_MAX_CONCURRENT_REQUESTS",
                defaults.default_max_concurrent_requests,
            ),
            autocomplete_limit: env_usize(
                "PERISCOPE_AUTOCOMPLETE_LIMIT",
                defaults.autocomplete_limit,
            ),
            connect_timeout: Duration::from_secs(env_u64(
                "PERISCOPE_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )),
            read_timeout: Duration::from_secs(env_u64(
                "PERISCOPE_READ_TIMEOUT_SECS",
                defaults.read_timeout.as_secs(),
            )),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("ignoring unparseable {}={}", name, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("ignoring unparseable {}={}", name, raw);
            default
        }),
        Err(_) => default,
    }
}
