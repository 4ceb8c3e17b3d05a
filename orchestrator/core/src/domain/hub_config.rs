// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Hub Configuration Types
//
// Defines the configuration schema for a QNMS hub, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Safety constraints (thermal limit, collision radius, no-go zones)
// - Coordinator timing (tick, heartbeat, retry limits)
// - Command queue retention
// - Twin and planner session settings (breakers, backoff, ack timeouts)
// - Network and observability settings

use crate::domain::safety::{
    NoGoZone, SafetyConstraints, DEFAULT_COLLISION_RADIUS_NM, DEFAULT_THERMAL_LIMIT_C,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "qnms.io/v1";
pub const KIND: &str = "HubConfig";
pub const DEFAULT_API_PORT: u16 = 8088;

/// Top-level Kubernetes-style hub configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfigManifest {
    /// API version (must be "qnms.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "HubConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: HubConfigSpec,
}

pub type HubConfig = HubConfigManifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable hub name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Hub configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfigSpec {
    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub twin: TwinConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Maximum thermal budget of a single command (°C)
    #[serde(default = "default_thermal_limit")]
    pub thermal_limit_c: f64,

    /// Minimum separation between simultaneously targeted positions (nm)
    #[serde(default = "default_collision_radius")]
    pub collision_radius_nm: f64,

    /// Static protected regions
    #[serde(default)]
    pub no_go_zones: Vec<NoGoZone>,
}

impl SafetyConfig {
    pub fn constraints(&self) -> SafetyConstraints {
        SafetyConstraints {
            thermal_limit_c: self.thermal_limit_c,
            collision_radius_nm: self.collision_radius_nm,
            no_go_zones: self.no_go_zones.clone(),
            ..SafetyConstraints::default()
        }
    }

    /// Reject limits the validation engine cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.thermal_limit_c > 0.0 && self.thermal_limit_c <= DEFAULT_THERMAL_LIMIT_C) {
            anyhow::bail!(
                "spec.safety.thermal_limit_c must be in (0, {}], got {}",
                DEFAULT_THERMAL_LIMIT_C,
                self.thermal_limit_c
            );
        }
        if self.collision_radius_nm < DEFAULT_COLLISION_RADIUS_NM {
            anyhow::bail!(
                "spec.safety.collision_radius_nm cannot be below {} nm",
                DEFAULT_COLLISION_RADIUS_NM
            );
        }
        for (i, zone) in self.no_go_zones.iter().enumerate() {
            if !zone.is_well_formed() {
                anyhow::bail!("spec.safety.no_go_zones[{}] has min above max", i);
            }
        }
        Ok(())
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            thermal_limit_c: default_thermal_limit(),
            collision_radius_nm: default_collision_radius(),
            no_go_zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Assignment pass period (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Expected agent heartbeat period (seconds)
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Consecutive missed heartbeats before an agent is marked `error`
    #[serde(default = "default_agent_missed_heartbeats")]
    pub missed_heartbeat_limit: u32,

    /// Execution attempts per command before its defect is abandoned
    #[serde(default = "default_max_command_attempts")]
    pub max_command_attempts: u32,
}

impl CoordinatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            missed_heartbeat_limit: default_agent_missed_heartbeats(),
            max_command_attempts: default_max_command_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Finished commands kept for lookup before the oldest are evicted
    #[serde(default = "default_queue_retention")]
    pub retention: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retention: default_queue_retention(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Time spent open before a half-open probe (seconds)
    pub open_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_secs")]
    pub initial_secs: u64,

    #[serde(default = "default_backoff_max_secs")]
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial_secs(),
            max_secs: default_backoff_max_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinConfig {
    /// WebSocket endpoint of the twin
    #[serde(default = "default_twin_url")]
    pub url: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Missed link heartbeats counted as a transport failure
    #[serde(default = "default_link_missed_heartbeats")]
    pub missed_heartbeat_limit: u32,

    /// Time allowed for an `ack` before a message is retried (milliseconds)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Re-sends of an un-acknowledged message before it is surfaced as failed
    #[serde(default = "default_ack_retries")]
    pub ack_retries: u32,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_twin_breaker")]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Buffered outbound messages above which a warning is logged
    #[serde(default = "default_buffer_high_water")]
    pub buffer_high_water: usize,
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            url: default_twin_url(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            missed_heartbeat_limit: default_link_missed_heartbeats(),
            ack_timeout_ms: default_ack_timeout_ms(),
            ack_retries: default_ack_retries(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            breaker: default_twin_breaker(),
            backoff: BackoffConfig::default(),
            buffer_high_water: default_buffer_high_water(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Base URL of the planner service (`/plan-repair` is appended)
    #[serde(default = "default_planner_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_planner_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_planner_breaker")]
    pub breaker: BreakerConfig,

    /// Re-plans allowed after a failed or unsafe plan before the defect is
    /// marked unrepairable
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_planner_endpoint(),
            timeout_ms: default_planner_timeout_ms(),
            breaker: default_planner_breaker(),
            max_replans: default_max_replans(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve a Prometheus scrape endpoint
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_thermal_limit() -> f64 {
    DEFAULT_THERMAL_LIMIT_C
}

fn default_collision_radius() -> f64 {
    DEFAULT_COLLISION_RADIUS_NM
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_agent_missed_heartbeats() -> u32 {
    2
}

fn default_link_missed_heartbeats() -> u32 {
    3
}

fn default_max_command_attempts() -> u32 {
    3
}

fn default_queue_retention() -> usize {
    10_000
}

fn default_twin_url() -> String {
    "ws://127.0.0.1:8765/ws".to_string()
}

fn default_ack_timeout_ms() -> u64 {
    250
}

fn default_ack_retries() -> u32 {
    3
}

fn default_handshake_timeout_ms() -> u64 {
    2000
}

fn default_twin_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 3,
        open_secs: 10,
    }
}

fn default_planner_breaker() -> BreakerConfig {
    BreakerConfig {
        failure_threshold: 5,
        open_secs: 30,
    }
}

fn default_backoff_initial_secs() -> u64 {
    1
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_buffer_high_water() -> usize {
    1000
}

fn default_planner_endpoint() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_planner_timeout_ms() -> u64 {
    5000
}

fn default_max_replans() -> u32 {
    1
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for HubConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "qnms-hub".to_string(),
                version: None,
                labels: None,
            },
            spec: HubConfigSpec::default(),
        }
    }
}

impl HubConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. QNMS_CONFIG_PATH environment variable
    /// 2. ./qnms-config.yaml (working directory)
    /// 3. ~/.qnms/config.yaml (user home)
    /// 4. /etc/qnms/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("QNMS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./qnms-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".qnms").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/qnms/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("QNMS_TWIN_URL") {
            tracing::info!("Environment override: QNMS_TWIN_URL={}", url);
            self.spec.twin.url = url;
        }

        if let Ok(endpoint) = std::env::var("QNMS_PLANNER_URL") {
            tracing::info!("Environment override: QNMS_PLANNER_URL={}", endpoint);
            self.spec.planner.endpoint = endpoint;
        }

        if let Ok(val) = std::env::var("QNMS_ACK_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Environment override: QNMS_ACK_TIMEOUT_MS={}", ms);
                    self.spec.twin.ack_timeout_ms = ms;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for QNMS_ACK_TIMEOUT_MS: '{}'. Expected milliseconds. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        self.spec.safety.validate()?;

        let coordinator = &self.spec.coordinator;
        if coordinator.tick_interval_ms == 0 || coordinator.heartbeat_interval_secs == 0 {
            anyhow::bail!("spec.coordinator intervals must be greater than zero");
        }
        if coordinator.missed_heartbeat_limit == 0 || coordinator.max_command_attempts == 0 {
            anyhow::bail!("spec.coordinator limits must be greater than zero");
        }

        if self.spec.queue.retention == 0 {
            anyhow::bail!("spec.queue.retention must be greater than zero");
        }

        let twin = &self.spec.twin;
        if twin.url.is_empty() {
            anyhow::bail!("spec.twin.url cannot be empty");
        }
        if twin.ack_timeout_ms == 0 || twin.heartbeat_interval_secs == 0 {
            anyhow::bail!("spec.twin timeouts must be greater than zero");
        }
        if twin.breaker.failure_threshold == 0 || twin.backoff.initial_secs == 0 {
            anyhow::bail!("spec.twin breaker threshold and backoff must be greater than zero");
        }
        if twin.backoff.max_secs < twin.backoff.initial_secs {
            anyhow::bail!("spec.twin.backoff.max_secs cannot be below initial_secs");
        }

        let planner = &self.spec.planner;
        if planner.endpoint.is_empty() {
            anyhow::bail!("spec.planner.endpoint cannot be empty");
        }
        if planner.timeout_ms == 0 || planner.breaker.failure_threshold == 0 {
            anyhow::bail!("spec.planner timeout and breaker threshold must be greater than zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coordinate::Position;

    #[test]
    fn test_default_manifest() {
        let manifest = HubConfigManifest::default();
        assert_eq!(manifest.api_version, "qnms.io/v1");
        assert_eq!(manifest.kind, "HubConfig");
        assert_eq!(manifest.spec.twin.breaker.failure_threshold, 3);
        assert_eq!(manifest.spec.planner.breaker.open_secs, 30);
        assert_eq!(manifest.spec.planner.max_replans, 1);
        assert_eq!(manifest.spec.queue.retention, 10_000);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: qnms.io/v1
kind: HubConfig
metadata:
  name: fab-7
spec:
  safety:
    no_go_zones:
      - name: gate-stack
        min: { x: 4.0, y: 4.0, z: 0.0 }
        max: { x: 5.0, y: 5.0, z: 2.0 }
  twin:
    url: ws://twin.local:9000/ws
    ack_timeout_ms: 300
"#;
        let config = HubConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "fab-7");
        assert_eq!(config.spec.twin.ack_timeout_ms, 300);
        assert_eq!(config.spec.twin.ack_retries, 3);
        assert_eq!(config.spec.coordinator.heartbeat_interval_secs, 10);

        let constraints = config.spec.safety.constraints();
        assert_eq!(constraints.thermal_limit_c, 120.0);
        assert!(constraints.no_go_zones[0].contains(&Position::new(4.5, 4.5, 1.0)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qnms-config.yaml");

        let mut manifest = HubConfigManifest::default();
        manifest.spec.planner.endpoint = "http://planner:8000".to_string();
        manifest.to_yaml_file(&path).unwrap();

        let parsed = HubConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(parsed.spec.planner.endpoint, "http://planner:8000");
        assert_eq!(parsed.spec.network.port, 8088);
    }

    #[test]
    fn test_validation() {
        let mut manifest = HubConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.safety.thermal_limit_c = 150.0;
        assert!(manifest.validate().is_err());
        manifest.spec.safety.thermal_limit_c = 100.0;
        assert!(manifest.validate().is_ok());

        manifest.spec.safety.no_go_zones.push(NoGoZone::new(
            Position::new(5.0, 0.0, 0.0),
            Position::new(4.0, 1.0, 1.0),
        ));
        assert!(manifest.validate().is_err());
        manifest.spec.safety.no_go_zones.clear();

        manifest.spec.twin.url = String::new();
        assert!(manifest.validate().is_err());
    }
}
