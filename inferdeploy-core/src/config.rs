//! Configuration for inferdeploy.
//!
//! Uses `figment` for layered configuration:
//! defaults -> user config -> workspace config -> legacy flat env -> `INFERDEPLOY_` env.
//! The resolved [`DeployConfig`] is passed explicitly to the controller, the
//! autoscaler and the dispatcher; nothing reads the environment after loading.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::types::{Capacity, EndpointSpec, ScalingPolicy, ServerlessProfile};

/// Workspace-level configuration file name.
pub const CONFIG_FILE_NAME: &str = "inferdeploy.toml";

/// Flat environment variables understood for compatibility with `.env` files
/// written for the earlier deployment scripts, and the config keys they set.
const LEGACY_ENV_KEYS: [(&str, &str); 10] = [
    ("AWS_ROLE", "role_arn"),
    ("AWS_DEFAULT_REGION", "region"),
    ("AWS_REGION", "region"),
    ("FRAMEWORK_VERSION", "framework_version"),
    ("PY_VERSION", "py_version"),
    ("INSTANCE_TYPE", "instance_type"),
    ("ENDPOINT_NAME", "legacy.name"),
    ("MODEL_S3_PATH", "legacy.model_data"),
    ("TEXT_ENDPOINT_NAME", "inference.text_endpoint"),
    ("AUDIO_ENDPOINT_NAME", "inference.audio_endpoint"),
];

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Execution role the platform assumes to pull artifacts and images.
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Inference framework version used to pick the serving container.
    #[serde(default = "default_framework_version")]
    pub framework_version: String,
    #[serde(default = "default_py_version")]
    pub py_version: String,
    /// Default instance type for provisioned endpoints.
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_serverless_memory_mb")]
    pub serverless_memory_mb: u32,
    #[serde(default = "default_serverless_max_concurrency")]
    pub serverless_max_concurrency: u32,
    /// Explicit serving container image; derived from the framework and
    /// python versions when unset.
    #[serde(default)]
    pub image_uri: Option<String>,
    /// Upper bound for a single platform HTTP call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Endpoints managed by the CLI verbs.
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
    /// Single endpoint described by flat settings; used when `endpoints` is empty.
    #[serde(default)]
    pub legacy: LegacyEndpoint,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub autoscaling: AutoscalingDefaults,
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            role_arn: None,
            region: default_region(),
            framework_version: default_framework_version(),
            py_version: default_py_version(),
            instance_type: default_instance_type(),
            serverless_memory_mb: default_serverless_memory_mb(),
            serverless_max_concurrency: default_serverless_max_concurrency(),
            image_uri: None,
            request_timeout_secs: default_request_timeout_secs(),
            endpoints: Vec::new(),
            legacy: LegacyEndpoint::default(),
            retry: RetryConfig::default(),
            wait: WaitConfig::default(),
            autoscaling: AutoscalingDefaults::default(),
            inference: InferenceConfig::default(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_framework_version() -> String {
    "2.2".to_string()
}

fn default_py_version() -> String {
    "py310".to_string()
}

fn default_instance_type() -> String {
    "ml.g4dn.xlarge".to_string()
}

fn default_serverless_memory_mb() -> u32 {
    2048
}

fn default_serverless_max_concurrency() -> u32 {
    5
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// One configured endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub name: String,
    pub model_data: String,
    pub entry_point: String,
    /// Overrides the top-level `instance_type`. Not allowed with `serverless`.
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub serverless: bool,
    #[serde(default)]
    pub serverless_memory_mb: Option<u32>,
    #[serde(default)]
    pub serverless_max_concurrency: Option<u32>,
}

/// Flat single-endpoint settings (`ENDPOINT_NAME`, `MODEL_S3_PATH`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEndpoint {
    #[serde(default = "default_legacy_name")]
    pub name: String,
    #[serde(default)]
    pub model_data: Option<String>,
    #[serde(default = "default_legacy_entry_point")]
    pub entry_point: String,
}

impl Default for LegacyEndpoint {
    fn default() -> Self {
        Self {
            name: default_legacy_name(),
            model_data: None,
            entry_point: default_legacy_entry_point(),
        }
    }
}

fn default_legacy_name() -> String {
    "multi-model-endpoint".to_string()
}

fn default_legacy_entry_point() -> String {
    "embed_combined.py".to_string()
}

/// Polling bounds for waiting on an endpoint to reach `InService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_max_wait_secs() -> u64 {
    1800
}

/// Scaling policy applied by the `autoscale` verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoscalingDefaults {
    #[serde(default = "default_min_capacity")]
    pub min_capacity: u32,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,
    #[serde(default = "default_target_invocations")]
    pub target_invocations_per_instance: f64,
    #[serde(default = "default_cooldown_secs")]
    pub scale_out_cooldown_secs: u32,
    #[serde(default = "default_cooldown_secs")]
    pub scale_in_cooldown_secs: u32,
}

impl Default for AutoscalingDefaults {
    fn default() -> Self {
        Self {
            min_capacity: default_min_capacity(),
            max_capacity: default_max_capacity(),
            target_invocations_per_instance: default_target_invocations(),
            scale_out_cooldown_secs: default_cooldown_secs(),
            scale_in_cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_min_capacity() -> u32 {
    1
}

fn default_max_capacity() -> u32 {
    5
}

fn default_target_invocations() -> f64 {
    50.0
}

fn default_cooldown_secs() -> u32 {
    60
}

/// Data-plane settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_text_endpoint")]
    pub text_endpoint: String,
    #[serde(default = "default_audio_endpoint")]
    pub audio_endpoint: String,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            text_endpoint: default_text_endpoint(),
            audio_endpoint: default_audio_endpoint(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

fn default_text_endpoint() -> String {
    "embedd-text".to_string()
}

fn default_audio_endpoint() -> String {
    "embedd-audio".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    60
}

impl DeployConfig {
    /// Resolve configured entries into endpoint specs.
    ///
    /// Falls back to the flat legacy endpoint when no `[[endpoints]]` are
    /// configured and a model path is set.
    pub fn endpoint_specs(&self) -> Result<Vec<EndpointSpec>, ConfigError> {
        if self.endpoints.is_empty() {
            return Ok(match &self.legacy.model_data {
                Some(model_data) => vec![EndpointSpec::provisioned(
                    self.legacy.name.clone(),
                    model_data.clone(),
                    self.legacy.entry_point.clone(),
                    self.instance_type.clone(),
                )],
                None => Vec::new(),
            });
        }
        self.endpoints
            .iter()
            .map(|entry| self.resolve_entry(entry))
            .collect()
    }

    /// Names of the configured endpoints, including the legacy endpoint when
    /// no `[[endpoints]]` are set. Unlike [`endpoint_specs`](Self::endpoint_specs)
    /// this needs no model path, so delete and status work without one.
    pub fn endpoint_names(&self) -> Vec<String> {
        if self.endpoints.is_empty() {
            vec![self.legacy.name.clone()]
        } else {
            self.endpoints.iter().map(|e| e.name.clone()).collect()
        }
    }

    /// Whether `name` is configured as a serverless endpoint.
    pub fn is_serverless(&self, name: &str) -> bool {
        self.endpoints.iter().any(|e| e.name == name && e.serverless)
    }

    fn resolve_entry(&self, entry: &EndpointEntry) -> Result<EndpointSpec, ConfigError> {
        if entry.serverless && entry.instance_type.is_some() {
            return Err(ConfigError::Invalid {
                message: format!(
                    "endpoint '{}' sets both serverless and instance_type",
                    entry.name
                ),
            });
        }
        let capacity = if entry.serverless {
            Capacity::Serverless(ServerlessProfile {
                memory_mb: entry
                    .serverless_memory_mb
                    .unwrap_or(self.serverless_memory_mb),
                max_concurrency: entry
                    .serverless_max_concurrency
                    .unwrap_or(self.serverless_max_concurrency),
            })
        } else {
            Capacity::Provisioned {
                instance_type: entry
                    .instance_type
                    .clone()
                    .unwrap_or_else(|| self.instance_type.clone()),
                initial_instance_count: 1,
            }
        };
        Ok(EndpointSpec {
            name: entry.name.clone(),
            model_data: entry.model_data.clone(),
            entry_point: entry.entry_point.clone(),
            capacity,
        })
    }

    /// Serving container for a capacity mode: the explicit `image_uri`, or the
    /// PyTorch inference image matching the configured versions and region.
    pub fn image_uri_for(&self, capacity: &Capacity) -> String {
        if let Some(uri) = &self.image_uri {
            return uri.clone();
        }
        let device = match capacity {
            Capacity::Provisioned { instance_type, .. } if is_accelerated(instance_type) => "gpu",
            _ => "cpu",
        };
        format!(
            "763104351884.dkr.ecr.{}.amazonaws.com/pytorch-inference:{}-{}-{}",
            self.region, self.framework_version, device, self.py_version
        )
    }

    /// The configured scaling policy for one endpoint.
    pub fn scaling_policy(&self, endpoint_name: &str) -> ScalingPolicy {
        let d = &self.autoscaling;
        ScalingPolicy {
            endpoint_name: endpoint_name.to_string(),
            min_capacity: d.min_capacity,
            max_capacity: d.max_capacity,
            target_invocations_per_instance: d.target_invocations_per_instance,
            scale_out_cooldown_secs: d.scale_out_cooldown_secs,
            scale_in_cooldown_secs: d.scale_in_cooldown_secs,
        }
    }
}

/// GPU-backed instance families.
fn is_accelerated(instance_type: &str) -> bool {
    let family = instance_type.trim_start_matches("ml.");
    family.starts_with('g') || family.starts_with('p') || family.starts_with("inf")
}

/// Path of the user-level config file, if a config directory exists.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "inferdeploy", "inferdeploy")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables prefixed with `INFERDEPLOY_` (`__` separates nesting)
/// 2. Legacy flat environment variables (`AWS_ROLE`, `MODEL_S3_PATH`, ...)
/// 3. `explicit` config file, or `<workspace>/inferdeploy.toml`
/// 4. User config (`~/.config/inferdeploy/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<DeployConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DeployConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::Invalid {
                    message: format!("config file {} does not exist", path.display()),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(CONFIG_FILE_NAME);
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    figment = figment.merge(legacy_env());
    figment = figment.merge(Env::prefixed("INFERDEPLOY_").split("__"));

    let config: DeployConfig = figment.extract().map_err(Box::new)?;
    tracing::debug!(
        region = %config.region,
        endpoints = config.endpoints.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn legacy_env() -> Env {
    let names: Vec<&'static str> = LEGACY_ENV_KEYS.iter().map(|(env, _)| *env).collect();
    Env::raw().only(&names).map(|key| {
        let upper = key.as_str().to_ascii_uppercase();
        LEGACY_ENV_KEYS
            .iter()
            .find(|(env, _)| *env == upper)
            .map(|(_, field)| (*field).into())
            .unwrap_or_else(|| key.as_str().to_owned().into())
    })
}
