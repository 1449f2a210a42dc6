//! Platform client adapter.
//!
//! [`PlatformClient`] is the only seam between inferdeploy and the managed
//! inference platform. Implementations translate domain calls into platform
//! calls and classify every failure into a [`PlatformError`] before returning.
//!
//! - [`SageMakerClient`]: signed HTTP calls against the SageMaker control
//!   plane, Application Auto Scaling and the SageMaker runtime.
//! - [`InMemoryPlatform`]: deterministic in-process platform for tests.

pub mod memory;
pub mod sagemaker;
pub mod sigv4;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PlatformError;
use crate::types::{Capacity, EndpointDescription, ScalingPolicy};

pub use memory::{InMemoryPlatform, PlatformCall};
pub use sagemaker::SageMakerClient;
pub use sigv4::Credentials;

/// Production variant every endpoint serves from.
pub const VARIANT_NAME: &str = "AllTraffic";

/// Name of the target-tracking policy attached to each endpoint.
pub const SCALING_POLICY_NAME: &str = "ScaleOnInvocations";

/// Scalable dimension for provisioned endpoint variants.
pub const SCALABLE_DIMENSION: &str = "sagemaker:variant:DesiredInstanceCount";

/// Autoscaling resource id of an endpoint's production variant.
pub fn scaling_resource_id(endpoint_name: &str) -> String {
    format!("endpoint/{endpoint_name}/variant/{VARIANT_NAME}")
}

/// Everything needed to register one endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRequest {
    pub config_name: String,
    pub image_uri: String,
    pub model_data: String,
    pub entry_point: String,
    pub role_arn: String,
    pub capacity: Capacity,
    /// Extra container environment.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// A data-plane prediction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictRequest {
    pub endpoint_name: String,
    pub content_type: String,
    pub accept: String,
    pub body: Vec<u8>,
}

/// Control- and data-plane operations of the inference platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Register a configuration (and the model it serves) under `config_name`.
    async fn create_config(&self, request: &ConfigRequest) -> Result<(), PlatformError>;

    /// Delete a configuration. Missing configurations yield `NotFound`.
    async fn delete_config(&self, config_name: &str) -> Result<(), PlatformError>;

    /// Names of configurations starting with `prefix`.
    async fn list_configs(&self, prefix: &str) -> Result<Vec<String>, PlatformError>;

    /// Create an endpoint serving `config_name`.
    async fn create_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), PlatformError>;

    /// Switch an existing endpoint to `config_name` in place.
    async fn update_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), PlatformError>;

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), PlatformError>;

    /// Describe an endpoint. Missing endpoints yield `NotFound`.
    async fn describe_endpoint(
        &self,
        endpoint_name: &str,
    ) -> Result<EndpointDescription, PlatformError>;

    async fn register_scalable_target(&self, policy: &ScalingPolicy) -> Result<(), PlatformError>;

    async fn put_scaling_policy(&self, policy: &ScalingPolicy) -> Result<(), PlatformError>;

    async fn delete_scaling_policy(&self, endpoint_name: &str) -> Result<(), PlatformError>;

    async fn deregister_scalable_target(&self, endpoint_name: &str)
    -> Result<(), PlatformError>;

    /// One synchronous prediction call. Returns the raw response body.
    async fn predict(&self, request: &PredictRequest) -> Result<Vec<u8>, PlatformError>;
}
