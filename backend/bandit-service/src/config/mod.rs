use crate::models::{PolicyParams, DEFAULT_EXPLORATION};
use crate::services::generator::GeneratorConfig;
use crate::services::manager::{ManagerConfig, DEFAULT_MAX_CAS_RETRIES, DEFAULT_MIN_ARM_POOL};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Unknown store backend: {0}")]
    UnknownBackend(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub bandit: BanditConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub json_logs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    File,
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub dir: PathBuf,
    pub redis_url: String,
    pub key_prefix: String,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BanditConfig {
    pub max_cas_retries: u32,
    pub min_arm_pool: usize,
    pub ucb_exploration: f64,
    pub pucb_exploration: f64,
    pub pucb_bias_weight: f64,
    pub pucb_temperature: f64,
    pub pucb_top_n: usize,
    pub warm_start: bool,
    pub bias_from_rank: bool,
}

impl BanditConfig {
    /// Policy for item-level bandits.
    pub fn item_policy(&self) -> PolicyParams {
        PolicyParams::Ucb1 {
            exploration: self.ucb_exploration,
        }
    }

    /// Policy for category-level bandits.
    pub fn category_policy(&self) -> PolicyParams {
        PolicyParams::Pucb {
            exploration: self.pucb_exploration,
            bias_weight: self.pucb_bias_weight,
            temperature: self.pucb_temperature,
            top_n: self.pucb_top_n,
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_cas_retries: self.max_cas_retries,
            min_arm_pool: self.min_arm_pool,
        }
    }

    /// Shares `min_arm_pool` with [`Self::manager_config`] so generation and
    /// serving apply the same threshold.
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            min_arm_pool: self.min_arm_pool,
            category_policy: self.category_policy(),
            item_policy: self.item_policy(),
            warm_start: self.warm_start,
            bias_from_rank: self.bias_from_rank,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = var_or(name, default);
    value.parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let command_timeout_ms: u64 = parse_var("REDIS_COMMAND_TIMEOUT_MS", "3000", "u64")?;

        Ok(Config {
            service: ServiceConfig {
                service_name: var_or("SERVICE_NAME", "bandit-service"),
                json_logs: var_or("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
            },
            store: StoreConfig {
                backend: var_or("BANDIT_STORE_BACKEND", "file").parse()?,
                dir: PathBuf::from(var_or("BANDIT_STORE_DIR", "data/bandits")),
                redis_url: var_or("REDIS_URL", "redis://localhost:6379"),
                key_prefix: var_or("BANDIT_KEY_PREFIX", "bandit"),
                command_timeout: Duration::from_millis(command_timeout_ms.max(500)),
            },
            bandit: BanditConfig {
                max_cas_retries: parse_var(
                    "BANDIT_MAX_CAS_RETRIES",
                    &DEFAULT_MAX_CAS_RETRIES.to_string(),
                    "u32",
                )?,
                min_arm_pool: parse_var(
                    "BANDIT_MIN_ARM_POOL",
                    &DEFAULT_MIN_ARM_POOL.to_string(),
                    "usize",
                )?,
                ucb_exploration: parse_var(
                    "BANDIT_UCB_EXPLORATION",
                    &DEFAULT_EXPLORATION.to_string(),
                    "f64",
                )?,
                pucb_exploration: parse_var(
                    "BANDIT_PUCB_EXPLORATION",
                    &DEFAULT_EXPLORATION.to_string(),
                    "f64",
                )?,
                pucb_bias_weight: parse_var("BANDIT_PUCB_BIAS_WEIGHT", "0.5", "f64")?,
                pucb_temperature: parse_var("BANDIT_PUCB_TEMPERATURE", "0.1", "f64")?,
                pucb_top_n: parse_var("BANDIT_PUCB_TOP_N", "3", "usize")?,
                warm_start: parse_var("BANDIT_WARM_START", "false", "bool")?,
                bias_from_rank: parse_var("BANDIT_BIAS_FROM_RANK", "false", "bool")?,
            },
        })
    }
}
