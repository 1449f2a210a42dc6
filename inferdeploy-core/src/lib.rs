//! # inferdeploy-core
//!
//! Lifecycle management for managed ML inference endpoints.
//!
//! - [`EndpointController`] deploys, swaps, recreates and deletes endpoints
//!   idempotently, reading state from the platform on every call.
//! - [`Autoscaler`] attaches target-tracking scaling to in-service endpoints.
//! - [`InferenceDispatcher`] sends text and audio batches for prediction.
//!
//! All of them talk to the platform through [`PlatformClient`], implemented
//! for SageMaker by [`SageMakerClient`] and in memory by [`InMemoryPlatform`].

pub mod autoscale;
pub mod config;
pub mod controller;
pub mod error;
pub mod inference;
pub mod platform;
pub mod retry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use autoscale::Autoscaler;
pub use config::{DeployConfig, load_config};
pub use controller::EndpointController;
pub use error::{
    ConfigError, InferDeployError, InferenceError, LifecycleError, PlatformError, Result,
};
pub use inference::{InferenceDispatcher, InferenceResponse, Payload};
pub use platform::{Credentials, InMemoryPlatform, PlatformClient, SageMakerClient};
pub use retry::RetryConfig;
pub use types::{
    Capacity, CleanupOutcome, DeleteReport, DeployOutcome, EndpointSpec, EndpointState,
    ScalingPolicy, ServerlessProfile,
};
