use crate::duration::{parse_duration, DurationError};
use std::time::Duration;
use thiserror::Error;

pub const ENV_INFLUX_URL: &str = "INFLUXDB_URL";
pub const ENV_INFLUX_TOKEN: &str = "INFLUXDB_TOKEN";
pub const ENV_DOCKER_TOKEN: &str = "DOCKER_INFLUXDB_INIT_ADMIN_TOKEN";
pub const ENV_INFLUX_ORG: &str = "INFLUXDB_ORG";
pub const ENV_INFLUX_BUCKET: &str = "INFLUXDB_BUCKET";
pub const ENV_RUNNING_IN_DOCKER: &str = "RUNNING_IN_DOCKER";
pub const ENV_INTERVAL: &str = "SPEEDTEST_INTERVAL";
pub const ENV_TIMEOUT: &str = "SPEEDTEST_TIMEOUT";
pub const ENV_SPEEDTEST_BIN: &str = "SPEEDTEST_BIN";

pub const DEFAULT_INFLUX_URL: &str = "http://localhost:8086";
// Service name of InfluxDB in the compose setup.
pub const DOCKER_INFLUX_URL: &str = "http://influx:8086";

#[derive(Debug, Default)]
pub struct Config {
    pub influx: InfluxConfig,
    pub runner: RunnerConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    // Sent as `Authorization: Token <token>` when present.
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_INFLUX_URL.to_string(),
            org: "my-org".to_string(),
            bucket: "speedtest-bucket".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct RunnerConfig {
    pub program: String,
    pub args: Vec<String>,
    // Upper bound for a single speedtest run.
    pub timeout: Duration,
    // Time allowed between SIGTERM and SIGKILL when stopping the child.
    pub terminate_grace: Duration,
    // Treat any stderr output as a failed run, even on a zero exit status.
    pub fail_on_stderr: bool,
    // Reject results missing any of ping/download/upload/server.
    pub require_all_sections: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "speedtest".to_string(),
            args: ["--accept-license", "--accept-gdpr", "-f", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout: Duration::from_secs(2 * 60),
            terminate_grace: Duration::from_secs(5),
            fail_on_stderr: false,
            require_all_sections: true,
        }
    }
}

#[derive(Debug)]
pub struct ScheduleConfig {
    pub interval: Duration,
    // Backoff between failed measurement attempts, doubling up to retry_max.
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("influx org must not be empty")]
    EmptyOrg,
    #[error("influx bucket must not be empty")]
    EmptyBucket,
    #[error("influx url must not be empty")]
    EmptyUrl,
    #[error("speedtest program must not be empty")]
    EmptyProgram,
    #[error("interval must be greater than zero")]
    ZeroInterval,
    #[error("speedtest timeout must be greater than zero")]
    ZeroTimeout,
    #[error("retry_initial must be greater than zero and not exceed retry_max")]
    RetryBounds,
    #[error("invalid duration in {name}")]
    InvalidDuration {
        name: String,
        #[source]
        source: DurationError,
    },
}

impl Config {
    /// Builds a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, which maps variable names to values.
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        config.influx.url = match get(ENV_INFLUX_URL) {
            Some(url) => url,
            None if get(ENV_RUNNING_IN_DOCKER).is_some() => DOCKER_INFLUX_URL.to_string(),
            None => DEFAULT_INFLUX_URL.to_string(),
        };
        config.influx.token = get(ENV_INFLUX_TOKEN).or_else(|| get(ENV_DOCKER_TOKEN));
        if let Some(org) = get(ENV_INFLUX_ORG) {
            config.influx.org = org;
        }
        if let Some(bucket) = get(ENV_INFLUX_BUCKET) {
            config.influx.bucket = bucket;
        }
        if let Some(program) = get(ENV_SPEEDTEST_BIN) {
            config.runner.program = program;
        }
        if let Some(interval) = get(ENV_INTERVAL) {
            config.schedule.interval = parse_named_duration(ENV_INTERVAL, &interval)?;
        }
        if let Some(timeout) = get(ENV_TIMEOUT) {
            config.runner.timeout = parse_named_duration(ENV_TIMEOUT, &timeout)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.influx.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if self.influx.org.is_empty() {
            return Err(ConfigError::EmptyOrg);
        }
        if self.influx.bucket.is_empty() {
            return Err(ConfigError::EmptyBucket);
        }
        if self.runner.program.is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if self.runner.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.schedule.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.schedule.retry_initial.is_zero()
            || self.schedule.retry_initial > self.schedule.retry_max
        {
            return Err(ConfigError::RetryBounds);
        }
        Ok(())
    }
}

pub fn parse_named_duration(name: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).map_err(|source| ConfigError::InvalidDuration {
        name: name.to_string(),
        source,
    })
}
