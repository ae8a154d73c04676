use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read once from `APPOINTD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON catalog seed. `None` starts with an empty catalog.
    pub catalog: Option<PathBuf>,
    /// Bearer token that identifies the business. `None` = development mode.
    pub business_token: Option<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub rate_limit: u64,
    pub rate_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            catalog: None,
            business_token: None,
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            rate_limit: 120,
            rate_window: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset, empty or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let d = Self::default();

        Self {
            bind: get("APPOINTD_BIND").unwrap_or(d.bind),
            port: parsed(&get, "APPOINTD_PORT").unwrap_or(d.port),
            data_dir: get("APPOINTD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            catalog: get("APPOINTD_CATALOG").map(PathBuf::from),
            business_token: get("APPOINTD_BUSINESS_TOKEN"),
            max_connections: parsed(&get, "APPOINTD_MAX_CONNECTIONS").unwrap_or(d.max_connections),
            compact_threshold: parsed(&get, "APPOINTD_COMPACT_THRESHOLD").unwrap_or(d.compact_threshold),
            metrics_port: parsed(&get, "APPOINTD_METRICS_PORT"),
            rate_limit: parsed(&get, "APPOINTD_RATE_LIMIT").unwrap_or(d.rate_limit),
            rate_window: parsed(&get, "APPOINTD_RATE_WINDOW_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.rate_window),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| parse_or_warn(key, &v))
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value, "ignoring unparsable setting");
    }
    parsed
}
