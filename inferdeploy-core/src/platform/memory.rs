//! In-process platform used by tests and dry runs.
//!
//! Mirrors the platform behaviours the controller depends on: endpoints move
//! through transitional statuses, configurations can be deleted while in use,
//! creating an existing resource yields `AlreadyExists`, and missing resources
//! surface as `NotFound`. Every call is recorded, and failures can be
//! scripted per operation.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{ConfigRequest, PlatformClient, PredictRequest};
use crate::error::{PlatformError, ResourceKind};
use crate::types::{EndpointDescription, ScalingPolicy};

/// Operation kinds, used to script failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformOp {
    CreateConfig,
    DeleteConfig,
    ListConfigs,
    CreateEndpoint,
    UpdateEndpoint,
    DeleteEndpoint,
    DescribeEndpoint,
    RegisterScalableTarget,
    PutScalingPolicy,
    DeleteScalingPolicy,
    DeregisterScalableTarget,
    Predict,
}

/// A recorded call with its primary argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CreateConfig(String),
    DeleteConfig(String),
    ListConfigs(String),
    CreateEndpoint { endpoint: String, config: String },
    UpdateEndpoint { endpoint: String, config: String },
    DeleteEndpoint(String),
    DescribeEndpoint(String),
    RegisterScalableTarget(String),
    PutScalingPolicy(String),
    DeleteScalingPolicy(String),
    DeregisterScalableTarget(String),
    Predict(String),
}

impl PlatformCall {
    pub fn op(&self) -> PlatformOp {
        match self {
            Self::CreateConfig(_) => PlatformOp::CreateConfig,
            Self::DeleteConfig(_) => PlatformOp::DeleteConfig,
            Self::ListConfigs(_) => PlatformOp::ListConfigs,
            Self::CreateEndpoint { .. } => PlatformOp::CreateEndpoint,
            Self::UpdateEndpoint { .. } => PlatformOp::UpdateEndpoint,
            Self::DeleteEndpoint(_) => PlatformOp::DeleteEndpoint,
            Self::DescribeEndpoint(_) => PlatformOp::DescribeEndpoint,
            Self::RegisterScalableTarget(_) => PlatformOp::RegisterScalableTarget,
            Self::PutScalingPolicy(_) => PlatformOp::PutScalingPolicy,
            Self::DeleteScalingPolicy(_) => PlatformOp::DeleteScalingPolicy,
            Self::DeregisterScalableTarget(_) => PlatformOp::DeregisterScalableTarget,
            Self::Predict(_) => PlatformOp::Predict,
        }
    }

    /// Whether the call changes platform state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self.op(),
            PlatformOp::ListConfigs | PlatformOp::DescribeEndpoint | PlatformOp::Predict
        )
    }
}

#[derive(Debug, Clone)]
struct EndpointRecord {
    config_name: String,
    status: String,
    failure_reason: Option<String>,
    /// Describe calls left before a transitional status settles.
    describes_until_settled: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    configs: BTreeMap<String, ConfigRequest>,
    endpoints: BTreeMap<String, EndpointRecord>,
    scalable_targets: BTreeMap<String, (u32, u32)>,
    policies: BTreeMap<String, ScalingPolicy>,
    predict_responses: BTreeMap<String, Vec<u8>>,
    calls: Vec<PlatformCall>,
    failures: VecDeque<(PlatformOp, PlatformError)>,
    auto_settle_after: Option<u32>,
}

impl State {
    fn record(&mut self, call: PlatformCall) -> Result<(), PlatformError> {
        let op = call.op();
        self.calls.push(call);
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(idx) => match self.failures.remove(idx) {
                Some((_, err)) => Err(err),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn enter_transition(&mut self, endpoint: &str, status: &str) {
        let countdown = self.auto_settle_after;
        if let Some(record) = self.endpoints.get_mut(endpoint) {
            record.status = status.to_string();
            record.failure_reason = None;
            record.describes_until_settled = countdown;
        }
    }

    fn settle(&mut self, endpoint: &str) {
        let status = match self.endpoints.get_mut(endpoint) {
            Some(record) => {
                record.describes_until_settled = None;
                record.status.clone()
            }
            None => return,
        };
        match status.as_str() {
            "Creating" | "Updating" => {
                if let Some(record) = self.endpoints.get_mut(endpoint) {
                    record.status = "InService".to_string();
                }
            }
            "Deleting" => {
                self.endpoints.remove(endpoint);
                self.scalable_targets.remove(endpoint);
                self.policies.remove(endpoint);
            }
            _ => {}
        }
    }
}

/// A deterministic, in-memory [`PlatformClient`].
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transitional statuses settle by themselves after `describes` describe
    /// calls on the endpoint, emulating provisioning time for pollers.
    pub fn with_auto_settle(self, describes: u32) -> Self {
        self.lock().auto_settle_after = Some(describes);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a configuration, as if left by an earlier run.
    pub fn seed_config(&self, config_name: &str) {
        let request = ConfigRequest {
            config_name: config_name.to_string(),
            image_uri: "seeded".to_string(),
            model_data: "s3://seeded/model.tar.gz".to_string(),
            entry_point: "seeded.py".to_string(),
            role_arn: "arn:aws:iam::000000000000:role/seeded".to_string(),
            capacity: crate::types::Capacity::Provisioned {
                instance_type: "ml.m5.large".to_string(),
                initial_instance_count: 1,
            },
            environment: BTreeMap::new(),
        };
        self.lock()
            .configs
            .insert(config_name.to_string(), request);
    }

    /// Seed an endpoint with a raw platform status.
    pub fn seed_endpoint(&self, endpoint: &str, config_name: &str, status: &str) {
        self.lock().endpoints.insert(
            endpoint.to_string(),
            EndpointRecord {
                config_name: config_name.to_string(),
                status: status.to_string(),
                failure_reason: None,
                describes_until_settled: None,
            },
        );
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: PlatformOp, err: PlatformError) {
        self.lock().failures.push_back((op, err));
    }

    /// Fixed response body for predictions against `endpoint`.
    pub fn set_predict_response(&self, endpoint: &str, body: impl Into<Vec<u8>>) {
        self.lock()
            .predict_responses
            .insert(endpoint.to_string(), body.into());
    }

    /// Complete every in-flight transition.
    pub fn settle_all(&self) {
        let mut state = self.lock();
        let names: Vec<String> = state.endpoints.keys().cloned().collect();
        for name in names {
            state.settle(&name);
        }
    }

    pub fn settle(&self, endpoint: &str) {
        self.lock().settle(endpoint);
    }

    /// Mark an endpoint as failed provisioning.
    pub fn mark_failed(&self, endpoint: &str, reason: &str) {
        if let Some(record) = self.lock().endpoints.get_mut(endpoint) {
            record.status = "Failed".to_string();
            record.failure_reason = Some(reason.to_string());
            record.describes_until_settled = None;
        }
    }

    pub fn config_names(&self) -> Vec<String> {
        self.lock().configs.keys().cloned().collect()
    }

    pub fn config(&self, config_name: &str) -> Option<ConfigRequest> {
        self.lock().configs.get(config_name).cloned()
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        self.lock().endpoints.keys().cloned().collect()
    }

    /// Raw platform status and live config of an endpoint.
    pub fn endpoint(&self, endpoint: &str) -> Option<(String, String)> {
        self.lock()
            .endpoints
            .get(endpoint)
            .map(|r| (r.status.clone(), r.config_name.clone()))
    }

    pub fn scalable_target(&self, endpoint: &str) -> Option<(u32, u32)> {
        self.lock().scalable_targets.get(endpoint).copied()
    }

    pub fn scaling_policy(&self, endpoint: &str) -> Option<ScalingPolicy> {
        self.lock().policies.get(endpoint).cloned()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

fn validation(message: impl Into<String>) -> PlatformError {
    PlatformError::invalid_argument("ValidationException", message)
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn create_config(&self, request: &ConfigRequest) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::CreateConfig(request.config_name.clone()))?;
        if state.configs.contains_key(&request.config_name) {
            return Err(PlatformError::AlreadyExists {
                resource: ResourceKind::EndpointConfig,
                message: format!(
                    "Cannot create already existing endpoint configuration \"{}\"",
                    request.config_name
                ),
            });
        }
        state
            .configs
            .insert(request.config_name.clone(), request.clone());
        Ok(())
    }

    async fn delete_config(&self, config_name: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::DeleteConfig(config_name.to_string()))?;
        match state.configs.remove(config_name) {
            Some(_) => Ok(()),
            None => Err(PlatformError::not_found(
                ResourceKind::EndpointConfig,
                format!("Could not find endpoint configuration \"{config_name}\""),
            )),
        }
    }

    async fn list_configs(&self, prefix: &str) -> Result<Vec<String>, PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::ListConfigs(prefix.to_string()))?;
        Ok(state
            .configs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::CreateEndpoint {
            endpoint: endpoint_name.to_string(),
            config: config_name.to_string(),
        })?;
        if state.endpoints.contains_key(endpoint_name) {
            return Err(PlatformError::AlreadyExists {
                resource: ResourceKind::Endpoint,
                message: format!("Cannot create already existing endpoint \"{endpoint_name}\""),
            });
        }
        if !state.configs.contains_key(config_name) {
            return Err(validation(format!(
                "Could not find endpoint configuration \"{config_name}\""
            )));
        }
        state.endpoints.insert(
            endpoint_name.to_string(),
            EndpointRecord {
                config_name: config_name.to_string(),
                status: String::new(),
                failure_reason: None,
                describes_until_settled: None,
            },
        );
        state.enter_transition(endpoint_name, "Creating");
        Ok(())
    }

    async fn update_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::UpdateEndpoint {
            endpoint: endpoint_name.to_string(),
            config: config_name.to_string(),
        })?;
        if !state.configs.contains_key(config_name) {
            return Err(validation(format!(
                "Could not find endpoint configuration \"{config_name}\""
            )));
        }
        let Some(record) = state.endpoints.get_mut(endpoint_name) else {
            return Err(PlatformError::not_found(
                ResourceKind::Endpoint,
                format!("Could not find endpoint \"{endpoint_name}\""),
            ));
        };
        if record.status != "InService" {
            return Err(validation(format!(
                "Cannot update in-progress endpoint \"{endpoint_name}\" (status {})",
                record.status
            )));
        }
        record.config_name = config_name.to_string();
        state.enter_transition(endpoint_name, "Updating");
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::DeleteEndpoint(endpoint_name.to_string()))?;
        if !state.endpoints.contains_key(endpoint_name) {
            return Err(PlatformError::not_found(
                ResourceKind::Endpoint,
                format!("Could not find endpoint \"{endpoint_name}\""),
            ));
        }
        state.enter_transition(endpoint_name, "Deleting");
        Ok(())
    }

    async fn describe_endpoint(
        &self,
        endpoint_name: &str,
    ) -> Result<EndpointDescription, PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::DescribeEndpoint(endpoint_name.to_string()))?;

        let due = match state.endpoints.get_mut(endpoint_name) {
            Some(record) => match record.describes_until_settled {
                Some(0) => true,
                Some(n) => {
                    record.describes_until_settled = Some(n - 1);
                    false
                }
                None => false,
            },
            None => false,
        };
        if due {
            state.settle(endpoint_name);
        }

        state
            .endpoints
            .get(endpoint_name)
            .map(|record| EndpointDescription {
                name: endpoint_name.to_string(),
                status: record.status.clone(),
                config_name: record.config_name.clone(),
                failure_reason: record.failure_reason.clone(),
            })
            .ok_or_else(|| {
                PlatformError::not_found(
                    ResourceKind::Endpoint,
                    format!("Could not find endpoint \"{endpoint_name}\""),
                )
            })
    }

    async fn register_scalable_target(&self, policy: &ScalingPolicy) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::RegisterScalableTarget(
            policy.endpoint_name.clone(),
        ))?;
        if !state.endpoints.contains_key(&policy.endpoint_name) {
            return Err(validation(format!(
                "Endpoint \"{}\" does not exist",
                policy.endpoint_name
            )));
        }
        state.scalable_targets.insert(
            policy.endpoint_name.clone(),
            (policy.min_capacity, policy.max_capacity),
        );
        Ok(())
    }

    async fn put_scaling_policy(&self, policy: &ScalingPolicy) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::PutScalingPolicy(policy.endpoint_name.clone()))?;
        if !state.scalable_targets.contains_key(&policy.endpoint_name) {
            return Err(PlatformError::not_found(
                ResourceKind::ScalableTarget,
                format!("No scalable target registered for {}", policy.endpoint_name),
            ));
        }
        state
            .policies
            .insert(policy.endpoint_name.clone(), policy.clone());
        Ok(())
    }

    async fn delete_scaling_policy(&self, endpoint_name: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::DeleteScalingPolicy(endpoint_name.to_string()))?;
        match state.policies.remove(endpoint_name) {
            Some(_) => Ok(()),
            None => Err(PlatformError::not_found(
                ResourceKind::ScalingPolicy,
                format!("No scaling policy for {endpoint_name}"),
            )),
        }
    }

    async fn deregister_scalable_target(
        &self,
        endpoint_name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::DeregisterScalableTarget(
            endpoint_name.to_string(),
        ))?;
        match state.scalable_targets.remove(endpoint_name) {
            Some(_) => Ok(()),
            None => Err(PlatformError::not_found(
                ResourceKind::ScalableTarget,
                format!("No scalable target for {endpoint_name}"),
            )),
        }
    }

    async fn predict(&self, request: &PredictRequest) -> Result<Vec<u8>, PlatformError> {
        let mut state = self.lock();
        state.record(PlatformCall::Predict(request.endpoint_name.clone()))?;
        let Some(record) = state.endpoints.get(&request.endpoint_name) else {
            return Err(PlatformError::not_found(
                ResourceKind::Endpoint,
                format!("Endpoint {} not found", request.endpoint_name),
            ));
        };
        if record.status != "InService" && record.status != "Updating" {
            return Err(validation(format!(
                "Endpoint {} is not in service (status {})",
                request.endpoint_name, record.status
            )));
        }
        if let Some(body) = state.predict_responses.get(&request.endpoint_name) {
            return Ok(body.clone());
        }
        Ok(stub_embeddings(&request.body))
    }
}

/// One small vector per input item of a `texts` or `fileUrls` batch.
fn stub_embeddings(request_body: &[u8]) -> Vec<u8> {
    let items = serde_json::from_slice::<serde_json::Value>(request_body)
        .ok()
        .and_then(|v| {
            v.get("texts")
                .or_else(|| v.get("fileUrls"))
                .and_then(|items| items.as_array().map(|a| a.len()))
        })
        .unwrap_or(0);
    let embeddings: Vec<[f32; 3]> = (0..items).map(|_| [0.1, 0.2, 0.3]).collect();
    serde_json::json!({ "embeddings": embeddings })
        .to_string()
        .into_bytes()
}
