//! Core domain types: endpoint specs, capacity modes, derived endpoint state
//! and scaling policies.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::controller::GENERATION_MARKER;
use crate::error::LifecycleError;

/// Longest endpoint name accepted. Leaves room for the generational config
/// suffix within the platform's 63-character resource name limit.
pub const MAX_ENDPOINT_NAME_LEN: usize = 45;

/// Serverless memory sizes accepted by the platform, in MB.
pub const SERVERLESS_MEMORY_SIZES_MB: [u32; 6] = [1024, 2048, 3072, 4096, 5120, 6144];

/// Upper bound on serverless max concurrency.
pub const SERVERLESS_MAX_CONCURRENCY: u32 = 200;

/// Serverless capacity envelope. The platform manages instances transparently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerlessProfile {
    pub memory_mb: u32,
    pub max_concurrency: u32,
}

impl ServerlessProfile {
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if !SERVERLESS_MEMORY_SIZES_MB.contains(&self.memory_mb) {
            return Err(LifecycleError::invalid_spec(format!(
                "serverless memory must be one of {:?} MB, got {}",
                SERVERLESS_MEMORY_SIZES_MB, self.memory_mb
            )));
        }
        if self.max_concurrency == 0 || self.max_concurrency > SERVERLESS_MAX_CONCURRENCY {
            return Err(LifecycleError::invalid_spec(format!(
                "serverless max concurrency must be in 1..={SERVERLESS_MAX_CONCURRENCY}, got {}",
                self.max_concurrency
            )));
        }
        Ok(())
    }
}

/// How an endpoint's capacity is provided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Capacity {
    Provisioned {
        instance_type: String,
        initial_instance_count: u32,
    },
    Serverless(ServerlessProfile),
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioned {
                instance_type,
                initial_instance_count,
            } => write!(f, "{initial_instance_count}x {instance_type}"),
            Self::Serverless(profile) => write!(
                f,
                "serverless {}MB/{} concurrent",
                profile.memory_mb, profile.max_concurrency
            ),
        }
    }
}

/// One deployable unit: an endpoint name bound to a model artifact and the
/// handler script that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub name: String,
    /// Object-storage URI of the packaged model (e.g. `s3://bucket/model.tar.gz`).
    pub model_data: String,
    /// Handler script inside the artifact (e.g. `embed_text.py`).
    pub entry_point: String,
    pub capacity: Capacity,
}

impl EndpointSpec {
    /// A spec served by a single provisioned instance.
    pub fn provisioned(
        name: impl Into<String>,
        model_data: impl Into<String>,
        entry_point: impl Into<String>,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model_data: model_data.into(),
            entry_point: entry_point.into(),
            capacity: Capacity::Provisioned {
                instance_type: instance_type.into(),
                initial_instance_count: 1,
            },
        }
    }

    pub fn serverless(
        name: impl Into<String>,
        model_data: impl Into<String>,
        entry_point: impl Into<String>,
        profile: ServerlessProfile,
    ) -> Self {
        Self {
            name: name.into(),
            model_data: model_data.into(),
            entry_point: entry_point.into(),
            capacity: Capacity::Serverless(profile),
        }
    }

    /// Local validation, run before any platform call.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        validate_endpoint_name(&self.name)?;
        if self.model_data.trim().is_empty() {
            return Err(LifecycleError::invalid_spec(format!(
                "endpoint '{}' has no model artifact URI",
                self.name
            )));
        }
        if !self.model_data.contains("://") {
            return Err(LifecycleError::invalid_spec(format!(
                "model artifact '{}' is not a URI",
                self.model_data
            )));
        }
        if self.entry_point.trim().is_empty() {
            return Err(LifecycleError::invalid_spec(format!(
                "endpoint '{}' has no entry point",
                self.name
            )));
        }
        match &self.capacity {
            Capacity::Provisioned {
                instance_type,
                initial_instance_count,
            } => {
                if !instance_type.starts_with("ml.") {
                    return Err(LifecycleError::invalid_spec(format!(
                        "instance type '{instance_type}' is not an ml.* instance type"
                    )));
                }
                if *initial_instance_count == 0 {
                    return Err(LifecycleError::invalid_spec(
                        "initial instance count must be at least 1",
                    ));
                }
                Ok(())
            }
            Capacity::Serverless(profile) => profile.validate(),
        }
    }
}

/// Check a name against the platform's resource naming rules:
/// alphanumerics separated by hyphens, no leading or trailing hyphen.
pub fn validate_endpoint_name(name: &str) -> Result<(), LifecycleError> {
    if name.is_empty() {
        return Err(LifecycleError::invalid_spec("endpoint name is empty"));
    }
    if name.len() > MAX_ENDPOINT_NAME_LEN {
        return Err(LifecycleError::invalid_spec(format!(
            "endpoint name '{name}' exceeds {MAX_ENDPOINT_NAME_LEN} characters"
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(LifecycleError::invalid_spec(format!(
            "endpoint name '{name}' must start and end with an alphanumeric character"
        )));
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(LifecycleError::invalid_spec(format!(
            "endpoint name '{name}' contains invalid character '{bad}'"
        )));
    }
    if name.contains(GENERATION_MARKER) {
        return Err(LifecycleError::invalid_spec(format!(
            "endpoint name '{name}' must not contain '{GENERATION_MARKER}', \
             which is reserved for configuration names"
        )));
    }
    Ok(())
}

/// Endpoint state as derived from the platform. Never persisted locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Absent,
    Configuring,
    InService,
    Failed,
    Deleting,
}

impl EndpointState {
    /// Map a platform status string. `None` means the status is not one the
    /// platform documents.
    pub fn from_platform_status(status: &str) -> Option<Self> {
        match status {
            "Creating" | "Updating" | "SystemUpdating" | "RollingBack" => Some(Self::Configuring),
            "InService" => Some(Self::InService),
            "Deleting" => Some(Self::Deleting),
            "Failed" | "UpdateRollbackFailed" | "OutOfService" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Absent => "Absent",
            Self::Configuring => "Configuring",
            Self::InService => "InService",
            Self::Failed => "Failed",
            Self::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// What the platform reports for an existing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescription {
    pub name: String,
    /// Raw platform status string.
    pub status: String,
    /// The configuration the endpoint currently serves from.
    pub config_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Target-tracking scaling policy on per-instance invocation rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub endpoint_name: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub target_invocations_per_instance: f64,
    pub scale_out_cooldown_secs: u32,
    pub scale_in_cooldown_secs: u32,
}

impl ScalingPolicy {
    /// A policy with the default 60 second cooldowns.
    pub fn new(
        endpoint_name: impl Into<String>,
        min_capacity: u32,
        max_capacity: u32,
        target_invocations_per_instance: f64,
    ) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            min_capacity,
            max_capacity,
            target_invocations_per_instance,
            scale_out_cooldown_secs: 60,
            scale_in_cooldown_secs: 60,
        }
    }

    pub fn validate(&self) -> Result<(), LifecycleError> {
        validate_endpoint_name(&self.endpoint_name)?;
        if self.min_capacity == 0 {
            return Err(LifecycleError::invalid_spec("min capacity must be at least 1"));
        }
        if self.min_capacity > self.max_capacity {
            return Err(LifecycleError::invalid_spec(format!(
                "min capacity {} exceeds max capacity {}",
                self.min_capacity, self.max_capacity
            )));
        }
        if !(self.target_invocations_per_instance.is_finite()
            && self.target_invocations_per_instance > 0.0)
        {
            return Err(LifecycleError::invalid_spec(format!(
                "target invocations per instance must be positive, got {}",
                self.target_invocations_per_instance
            )));
        }
        Ok(())
    }
}

/// Result of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeployOutcome {
    /// A new endpoint was created.
    Created { config_name: String },
    /// An in-service endpoint was switched to a new configuration in place.
    /// `previous_config` keeps serving until the swap completes.
    Swapped {
        config_name: String,
        previous_config: String,
    },
    /// A failed endpoint was removed and created again.
    Recreated { config_name: String },
}

impl DeployOutcome {
    pub fn config_name(&self) -> &str {
        match self {
            Self::Created { config_name }
            | Self::Swapped { config_name, .. }
            | Self::Recreated { config_name } => config_name,
        }
    }
}

/// Outcome of one best-effort deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    Deleted,
    AlreadyAbsent,
    Failed(String),
}

/// Per-resource report of a delete operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub endpoint_name: String,
    pub endpoint: CleanupOutcome,
    pub configs: Vec<(String, CleanupOutcome)>,
}

impl DeleteReport {
    /// True when nothing was left to delete.
    pub fn was_absent(&self) -> bool {
        self.endpoint == CleanupOutcome::AlreadyAbsent
            && self
                .configs
                .iter()
                .all(|(_, outcome)| *outcome == CleanupOutcome::AlreadyAbsent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_spec() -> EndpointSpec {
        EndpointSpec::provisioned(
            "embed-text",
            "s3://bucket/model.tar.gz",
            "embed_text.py",
            "ml.g4dn.xlarge",
        )
    }

    #[test]
    fn test_valid_spec() {
        assert!(text_spec().validate().is_ok());
    }

    #[test]
    fn test_missing_artifact_is_invalid() {
        let mut spec = text_spec();
        spec.model_data = String::new();
        assert!(matches!(
            spec.validate(),
            Err(LifecycleError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_endpoint_name_rules() {
        assert!(validate_endpoint_name("embedd-audio").is_ok());
        assert!(validate_endpoint_name("").is_err());
        assert!(validate_endpoint_name("-leading").is_err());
        assert!(validate_endpoint_name("trailing-").is_err());
        assert!(validate_endpoint_name("under_score").is_err());
        assert!(validate_endpoint_name(&"a".repeat(MAX_ENDPOINT_NAME_LEN + 1)).is_err());
        assert!(validate_endpoint_name("embed-cfg-7").is_err());
        assert!(validate_endpoint_name("embed-cfgs").is_ok());
    }

    #[test]
    fn test_serverless_profile_bounds() {
        let ok = ServerlessProfile {
            memory_mb: 2048,
            max_concurrency: 5,
        };
        assert!(ok.validate().is_ok());
        assert!(
            ServerlessProfile {
                memory_mb: 1500,
                max_concurrency: 5
            }
            .validate()
            .is_err()
        );
        assert!(
            ServerlessProfile {
                memory_mb: 2048,
                max_concurrency: 0
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_platform_status_mapping() {
        assert_eq!(
            EndpointState::from_platform_status("Creating"),
            Some(EndpointState::Configuring)
        );
        assert_eq!(
            EndpointState::from_platform_status("Updating"),
            Some(EndpointState::Configuring)
        );
        assert_eq!(
            EndpointState::from_platform_status("InService"),
            Some(EndpointState::InService)
        );
        assert_eq!(
            EndpointState::from_platform_status("UpdateRollbackFailed"),
            Some(EndpointState::Failed)
        );
        assert_eq!(
            EndpointState::from_platform_status("Deleting"),
            Some(EndpointState::Deleting)
        );
        assert_eq!(EndpointState::from_platform_status("Sleeping"), None);
    }

    #[test]
    fn test_scaling_policy_validation() {
        assert!(ScalingPolicy::new("embed-text", 1, 5, 50.0).validate().is_ok());
        assert!(ScalingPolicy::new("embed-text", 0, 5, 50.0).validate().is_err());
        assert!(ScalingPolicy::new("embed-text", 6, 5, 50.0).validate().is_err());
        assert!(ScalingPolicy::new("embed-text", 1, 5, 0.0).validate().is_err());
        assert!(ScalingPolicy::new("embed-text", 1, 5, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_capacity_display() {
        assert_eq!(text_spec().capacity.to_string(), "1x ml.g4dn.xlarge");
    }
}
