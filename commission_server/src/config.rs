use std::{env, time::Duration};

use commission_engine::PipelineConfig;
use log::*;

const DEFAULT_CCE_HOST: &str = "127.0.0.1";
const DEFAULT_CCE_PORT: u16 = 8660;
const DEFAULT_CCE_DATABASE_URL: &str = "sqlite://data/commissions.db";
const DEFAULT_JOB_BUFFER_SIZE: usize = 512;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Capacity of the in-process job channel. Producers back-pressure once it fills up.
    pub job_buffer_size: usize,
    /// Tunables for monthly builds hosted by this instance.
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CCE_HOST.to_string(),
            port: DEFAULT_CCE_PORT,
            database_url: DEFAULT_CCE_DATABASE_URL.to_string(),
            job_buffer_size: DEFAULT_JOB_BUFFER_SIZE,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("CCE_HOST").ok().unwrap_or_else(|| DEFAULT_CCE_HOST.into());
        let port = env::var("CCE_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for CCE_PORT. {e} Using the default, {DEFAULT_CCE_PORT}, instead."
                    );
                    DEFAULT_CCE_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_CCE_PORT);
        let database_url = env::var("CCE_DATABASE_URL").ok().unwrap_or_else(|| {
            warn!("🪛️ CCE_DATABASE_URL is not set. Using the default, {DEFAULT_CCE_DATABASE_URL}, instead.");
            DEFAULT_CCE_DATABASE_URL.to_string()
        });
        let job_buffer_size = parse_env_number("CCE_JOB_BUFFER_SIZE", DEFAULT_JOB_BUFFER_SIZE);
        let pipeline = pipeline_from_env();
        Self { host, port, database_url, job_buffer_size, pipeline }
    }
}

fn pipeline_from_env() -> PipelineConfig {
    let defaults = PipelineConfig::default();
    PipelineConfig {
        batch_size: parse_env_number("CCE_BATCH_SIZE", defaults.batch_size),
        aggregation_delay_floor: Duration::from_secs(parse_env_number(
            "CCE_AGGREGATION_DELAY",
            defaults.aggregation_delay_floor.as_secs(),
        )),
        retry_delay: Duration::from_secs(parse_env_number("CCE_RETRY_DELAY", defaults.retry_delay.as_secs())),
        max_attempts: parse_env_number("CCE_MAX_ATTEMPTS", defaults.max_attempts),
    }
}

fn parse_env_number<T>(name: &str, default: T) -> T
where T: std::str::FromStr + std::fmt::Display + Copy {
    match env::var(name) {
        Ok(s) => s.parse::<T>().unwrap_or_else(|_| {
            warn!("🪛️ {s} is not a valid value for {name}. Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8660);
        assert_eq!(config.database_url, "sqlite://data/commissions.db");
        assert_eq!(config.pipeline, PipelineConfig::default());
    }
}
