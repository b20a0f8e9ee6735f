use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// The full config surface a PBS node reads at startup. Every field can be
/// supplied as an environment variable prefixed `PBS_` (e.g.
/// `PBS_PBS_HOST_PORT`) or a `pbs.toml`/`pbs.yaml` file next to the binary;
/// environment values win.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PbsConfig {
    pub async_executor_queue_size: usize,
    pub async_executor_threads_count: usize,
    pub io_async_executor_queue_size: usize,
    pub io_async_executor_threads_count: usize,

    pub transaction_manager_capacity: usize,

    pub journal_service_bucket_name: String,
    pub journal_service_partition_name: String,

    pub pbs_host_address: String,
    pub pbs_host_port: u16,
    pub pbs_health_port: u16,

    pub auth_service_endpoint: String,
    pub cloud_service_region: String,

    pub http2_server_threads_count: usize,

    pub partition_lock_table_name: String,

    pub remote_pbs_host_address: String,
    pub remote_pbs_auth_endpoint: String,

    pub http_server_request_routing_enabled: bool,
    pub http_server_dns_routing_enabled: bool,
}

impl Default for PbsConfig {
    fn default() -> Self {
        PbsConfig {
            async_executor_queue_size: 10_000,
            async_executor_threads_count: 4,
            io_async_executor_queue_size: 10_000,
            io_async_executor_threads_count: 2,
            transaction_manager_capacity: 10_000,
            journal_service_bucket_name: String::new(),
            journal_service_partition_name: "default".to_string(),
            pbs_host_address: "0.0.0.0".to_string(),
            pbs_host_port: 8080,
            pbs_health_port: 8081,
            auth_service_endpoint: String::new(),
            cloud_service_region: String::new(),
            http2_server_threads_count: 4,
            partition_lock_table_name: String::new(),
            remote_pbs_host_address: String::new(),
            remote_pbs_auth_endpoint: String::new(),
            http_server_request_routing_enabled: false,
            http_server_dns_routing_enabled: false,
        }
    }
}

impl PbsConfig {
    /// Loads defaults, then an optional `path` config file, then
    /// `PBS_`-prefixed environment variables, in that order of precedence.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = PbsConfig::default();
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&defaults).expect("PbsConfig defaults must serialize"),
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("PBS").separator("_"));
        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file_or_env() {
        let cfg = PbsConfig::load(None).unwrap();
        assert_eq!(cfg.pbs_host_port, 8080);
        assert_eq!(cfg.async_executor_threads_count, 4);
    }

    #[test]
    fn environment_overrides_defaults() {
        std::env::set_var("PBS_PBS_HOST_PORT", "9999");
        let cfg = PbsConfig::load(None).unwrap();
        std::env::remove_var("PBS_PBS_HOST_PORT");
        assert_eq!(cfg.pbs_host_port, 9999);
    }
}
