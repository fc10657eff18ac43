use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::model::ProjectDeletePolicy;

/// Runtime settings, read once at startup from `SHOPFLOOR_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub reconcile_interval: Duration,
    pub request_timeout: Duration,
    pub project_delete_policy: ProjectDeletePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            reconcile_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
            project_delete_policy: ProjectDeletePolicy::Cascade,
        }
    }
}

impl FromStr for ProjectDeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cascade" => Ok(ProjectDeletePolicy::Cascade),
            "block" => Ok(ProjectDeletePolicy::Block),
            other => Err(format!("unknown project delete policy: {other}")),
        }
    }
}

/// Parse `raw` if present; warn and keep `default` when it doesn't parse.
fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else { return default };
    match raw.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(var = name, value = %raw, "invalid value, using default");
            default
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. `from_env` uses the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let metrics_port = var("SHOPFLOOR_METRICS_PORT").and_then(|raw| match raw.parse() {
            Ok(p) => Some(p),
            Err(_) => {
                warn!(var = "SHOPFLOOR_METRICS_PORT", value = %raw, "invalid value, metrics disabled");
                None
            }
        });
        let secs = |name: &str, default: Duration| {
            match parse_or::<u64>(name, var(name), default.as_secs()) {
                0 => {
                    warn!(var = name, "zero interval, using default");
                    default
                }
                s => Duration::from_secs(s),
            }
        };

        Self {
            bind: var("SHOPFLOOR_BIND").unwrap_or(d.bind),
            port: parse_or("SHOPFLOOR_PORT", var("SHOPFLOOR_PORT"), d.port),
            data_dir: var("SHOPFLOOR_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            metrics_port,
            compact_threshold: parse_or(
                "SHOPFLOOR_COMPACT_THRESHOLD",
                var("SHOPFLOOR_COMPACT_THRESHOLD"),
                d.compact_threshold,
            ),
            reconcile_interval: secs("SHOPFLOOR_RECONCILE_INTERVAL_SECS", d.reconcile_interval),
            request_timeout: secs("SHOPFLOOR_REQUEST_TIMEOUT_SECS", d.request_timeout),
            project_delete_policy: parse_or(
                "SHOPFLOOR_PROJECT_DELETE_POLICY",
                var("SHOPFLOOR_PROJECT_DELETE_POLICY"),
                d.project_delete_policy,
            ),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("shopfloor.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
