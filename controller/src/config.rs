use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::error::ConfigErr;

pub const DEFAULT_DATA_DIR: &str = "/starfish-controller/local";

/// Runtime settings of a site controller, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub site_uid: String,
    pub router_url: String,
    pub router_username: Option<String>,
    pub router_password: Option<String>,
    pub data_dir: PathBuf,
    pub fetch_interval: Duration,
    pub monitor_interval: Duration,
    pub heartbeat_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub http_timeout: Duration,
    pub http_retries: u32,
}

impl ControllerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    /// `ConfigErr` if a required variable is missing or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigErr> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `var`, which maps a variable name to its value.
    ///
    /// # Errors
    /// `ConfigErr` if a required variable is missing or a value does not parse.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigErr>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigErr::Missing(key));

        Ok(Self {
            site_uid: required("SITE_UID")?,
            router_url: required("ROUTER_URL")?,
            router_username: get("ROUTER_USERNAME"),
            router_password: get("ROUTER_PASSWORD"),
            data_dir: get("CONTROLLER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            fetch_interval: secs(parse_or(&get, "FETCH_INTERVAL_SECS", 5, 1)?),
            monitor_interval: secs(parse_or(&get, "MONITOR_INTERVAL_SECS", 30, 1)?),
            heartbeat_interval: secs(parse_or(&get, "HEARTBEAT_INTERVAL_SECS", 60, 1)?),
            max_concurrent_jobs: parse_or(&get, "MAX_CONCURRENT_JOBS", 4, 1)?,
            http_timeout: secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 30, 1)?),
            http_retries: parse_or(&get, "HTTP_RETRIES", 2, 0)?,
        })
    }
}

/// Parses `var` if set, rejecting values below `min`.
fn parse_or<T, G>(get: &G, var: &'static str, default: T, min: T) -> Result<T, ConfigErr>
where
    T: FromStr + PartialOrd,
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(var) else {
        return Ok(default);
    };

    match value.parse::<T>() {
        Ok(parsed) if parsed >= min => Ok(parsed),
        _ => Err(ConfigErr::Invalid { var, value }),
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}
