//! Configuration management with validation and defaults
//!
//! `MeltyConfig` is loaded from TOML, overridden from `MELTYFI_*` environment
//! variables and validated before an engine is built from it.

use crate::common::traits::Clock;
use crate::common::types::{Address, Amount};
use crate::errors::{ConfigurationError, MeltyResult};
use crate::lottery::EngineBuilder;
use crate::params::ProtocolParameters;
use crate::randomness::{PseudoRandomProvider, RandomnessProvider, VrfRandomnessProvider};
use crate::rewards::{ConversionRate, FixedRate, OracleRate, RateSource, CHOCO_DECIMALS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeltyConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub randomness: RandomnessConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Governance and lottery bounds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub governor: Address,
    pub treasury: Address,
    pub fee_bps: u32,
    pub min_supply: u64,
    pub max_supply: u64,
    pub max_holder_percent: u32,
    pub max_duration_days: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let params = ProtocolParameters::default();
        Self {
            governor: Address::repeat_byte(0x01),
            treasury: Address::repeat_byte(0x02),
            fee_bps: params.fee_bps,
            min_supply: params.min_supply,
            max_supply: params.max_supply,
            max_holder_percent: params.max_holder_percent,
            max_duration_days: params.max_duration_days,
        }
    }
}

impl ProtocolConfig {
    pub fn parameters(&self) -> ProtocolParameters {
        ProtocolParameters {
            fee_bps: self.fee_bps,
            min_supply: self.min_supply,
            max_supply: self.max_supply,
            max_holder_percent: self.max_holder_percent,
            max_duration_days: self.max_duration_days,
            treasury: self.treasury,
        }
    }
}

/// ChocoChip minting
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardsConfig {
    /// Share of the converted value minted, in basis points
    pub reward_bps: u32,
    /// Supply ceiling in whole tokens
    pub max_supply_tokens: u64,
    pub rate: RateConfig,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            reward_bps: 10_000,
            max_supply_tokens: 1_000_000_000,
            rate: RateConfig::Fixed {
                price: 1_000,
                decimals: 0,
            },
        }
    }
}

impl RewardsConfig {
    pub fn max_supply(&self) -> Amount {
        self.max_supply_tokens as Amount * 10u128.pow(CHOCO_DECIMALS)
    }

    /// Build the configured rate source; oracle sources are also returned
    /// concretely so a feeder can publish prices
    pub fn rate_source(&self, clock: Arc<dyn Clock>) -> (Arc<dyn RateSource>, Option<Arc<OracleRate>>) {
        match self.rate {
            RateConfig::Fixed { price, decimals } => {
                let source: Arc<dyn RateSource> =
                    Arc::new(FixedRate::new(ConversionRate::new(price as u128, decimals)));
                (source, None)
            }
            RateConfig::Oracle {
                initial_price,
                decimals,
                max_age_secs,
            } => {
                let oracle = Arc::new(OracleRate::new(decimals, max_age_secs, clock));
                if let Some(price) = initial_price {
                    oracle.publish(price as u128);
                }
                let source: Arc<dyn RateSource> = oracle.clone();
                (source, Some(oracle))
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateConfig {
    Fixed {
        price: u64,
        decimals: u32,
    },
    Oracle {
        initial_price: Option<u64>,
        decimals: u32,
        max_age_secs: u64,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Vrf,
    Pseudo,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RandomnessConfig {
    pub provider: ProviderKind,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
    /// Hex-encoded 64-byte schnorrkel secret; a fresh key is generated when absent
    pub vrf_secret_key: Option<String>,
    /// Pending draws older than this are reported as stalled
    pub stall_alert_secs: u64,
}

impl Default for RandomnessConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Vrf,
            queue_capacity: 1_024,
            poll_interval_ms: 100,
            vrf_secret_key: None,
            stall_alert_secs: 3_600,
        }
    }
}

impl RandomnessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_alert(&self) -> Duration {
        Duration::from_secs(self.stall_alert_secs)
    }

    pub fn build_provider(&self) -> MeltyResult<Arc<dyn RandomnessProvider>> {
        let provider: Arc<dyn RandomnessProvider> = match (self.provider, &self.vrf_secret_key) {
            (ProviderKind::Vrf, Some(secret)) => Arc::new(
                VrfRandomnessProvider::from_secret_hex(secret, self.queue_capacity).map_err(|e| {
                    ConfigurationError::InvalidValue {
                        field: "randomness.vrf_secret_key".to_string(),
                        value: "<redacted>".to_string(),
                        reason: e.to_string(),
                    }
                })?,
            ),
            (ProviderKind::Vrf, None) => Arc::new(VrfRandomnessProvider::new_random(self.queue_capacity)),
            (ProviderKind::Pseudo, _) => Arc::new(PseudoRandomProvider::new(self.queue_capacity)),
        };
        Ok(provider)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitoringConfig {
    pub log_level: LogLevel,
    pub json_logs: bool,
    pub event_channel_capacity: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            event_channel_capacity: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl MeltyConfig {
    /// Configuration for local simulations: pseudo randomness, debug logs
    pub fn simulation() -> Self {
        Self {
            randomness: RandomnessConfig {
                provider: ProviderKind::Pseudo,
                poll_interval_ms: 10,
                ..RandomnessConfig::default()
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..MonitoringConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.protocol
            .parameters()
            .validate()
            .map_err(|e| ConfigurationError::ValidationFailed(e.to_string()))?;

        if self.protocol.governor.is_zero() {
            return Err(ConfigurationError::MissingRequired("protocol.governor".to_string()));
        }
        if self.protocol.treasury.is_zero() {
            return Err(ConfigurationError::MissingRequired("protocol.treasury".to_string()));
        }

        if self.rewards.reward_bps > 10_000 {
            return Err(ConfigurationError::InvalidValue {
                field: "rewards.reward_bps".to_string(),
                value: self.rewards.reward_bps.to_string(),
                reason: "Reward share cannot exceed 10000 bps".to_string(),
            });
        }
        if let RateConfig::Oracle { max_age_secs: 0, .. } = self.rewards.rate {
            return Err(ConfigurationError::InvalidValue {
                field: "rewards.rate.max_age_secs".to_string(),
                value: "0".to_string(),
                reason: "Oracle prices need a non-zero staleness limit".to_string(),
            });
        }

        if self.randomness.queue_capacity == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "randomness.queue_capacity".to_string(),
                value: "0".to_string(),
                reason: "Queue capacity cannot be zero".to_string(),
            });
        }
        if self.randomness.poll_interval_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "randomness.poll_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "Poll interval cannot be zero".to_string(),
            });
        }

        if self.monitoring.event_channel_capacity == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "monitoring.event_channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "Event channel capacity cannot be zero".to_string(),
            });
        }

        Ok(())
    }

    /// Engine builder carrying everything but custody and clock
    ///
    /// Returns the oracle handle when the rate source is an oracle.
    pub fn engine_builder(&self, clock: Arc<dyn Clock>) -> MeltyResult<(EngineBuilder, Option<Arc<OracleRate>>)> {
        self.validate()?;
        let (rate_source, oracle) = self.rewards.rate_source(clock.clone());
        let builder = EngineBuilder::default()
            .governor(self.protocol.governor)
            .parameters(self.protocol.parameters())
            .rewards(self.rewards.reward_bps, self.rewards.max_supply())
            .rate_source(rate_source)
            .randomness(self.randomness.build_provider()?)
            .clock(clock)
            .event_capacity(self.monitoring.event_channel_capacity);
        Ok((builder, oracle))
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> MeltyResult<MeltyConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => MeltyConfig::default(),
        };

        Self::apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> MeltyResult<MeltyConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    /// Apply `MELTYFI_*` overrides read through `lookup`
    pub fn apply_overrides<F>(config: &mut MeltyConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(field: &str, value: String, reason: &str) -> Result<T, ConfigurationError> {
            value.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: field.to_string(),
                value,
                reason: reason.to_string(),
            })
        }

        if let Some(value) = lookup("MELTYFI_GOVERNOR") {
            config.protocol.governor = parsed("MELTYFI_GOVERNOR", value, "Invalid address")?;
        }
        if let Some(value) = lookup("MELTYFI_TREASURY") {
            config.protocol.treasury = parsed("MELTYFI_TREASURY", value, "Invalid address")?;
        }
        if let Some(value) = lookup("MELTYFI_FEE_BPS") {
            config.protocol.fee_bps = parsed("MELTYFI_FEE_BPS", value, "Invalid basis points")?;
        }
        if let Some(value) = lookup("MELTYFI_MAX_DURATION_DAYS") {
            config.protocol.max_duration_days = parsed("MELTYFI_MAX_DURATION_DAYS", value, "Invalid day count")?;
        }
        if let Some(value) = lookup("MELTYFI_RANDOMNESS_PROVIDER") {
            config.randomness.provider = match value.to_ascii_lowercase().as_str() {
                "vrf" => ProviderKind::Vrf,
                "pseudo" => ProviderKind::Pseudo,
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        field: "MELTYFI_RANDOMNESS_PROVIDER".to_string(),
                        value,
                        reason: "Expected 'vrf' or 'pseudo'".to_string(),
                    })
                }
            };
        }
        if let Some(value) = lookup("MELTYFI_VRF_SECRET_KEY") {
            config.randomness.vrf_secret_key = Some(value);
        }
        if let Some(value) = lookup("MELTYFI_POLL_INTERVAL_MS") {
            config.randomness.poll_interval_ms = parsed("MELTYFI_POLL_INTERVAL_MS", value, "Invalid interval")?;
        }
        if let Some(value) = lookup("MELTYFI_LOG_LEVEL") {
            config.monitoring.log_level = parsed("MELTYFI_LOG_LEVEL", value, "Invalid log level")?;
        }
        if let Some(value) = lookup("MELTYFI_JSON_LOGS") {
            config.monitoring.json_logs = parsed("MELTYFI_JSON_LOGS", value, "Invalid boolean value")?;
        }

        Ok(())
    }

    pub fn save(&self, config: &MeltyConfig, path: &str) -> MeltyResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder pattern for creating configurations
pub struct ConfigBuilder {
    config: MeltyConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MeltyConfig::default(),
        }
    }

    pub fn protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.config.protocol = protocol;
        self
    }

    pub fn rewards(mut self, rewards: RewardsConfig) -> Self {
        self.config.rewards = rewards;
        self
    }

    pub fn randomness(mut self, randomness: RandomnessConfig) -> Self {
        self.config.randomness = randomness;
        self
    }

    pub fn monitoring(mut self, monitoring: MonitoringConfig) -> Self {
        self.config.monitoring = monitoring;
        self
    }

    pub fn build(self) -> MeltyConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the default configuration to `path`
pub fn generate_sample_config(path: &str) -> MeltyResult<()> {
    ConfigLoader::new().save(&MeltyConfig::default(), path)
}
