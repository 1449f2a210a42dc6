//! SageMaker-backed [`PlatformClient`].
//!
//! Talks the AWS JSON 1.1 protocol to the SageMaker control plane and to
//! Application Auto Scaling, and plain HTTP to the SageMaker runtime. Every
//! request is SigV4-signed. Control-plane calls go through [`with_retry`];
//! predictions are issued exactly once.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::sigv4::{self, Credentials, SignableRequest};
use super::{
    ConfigRequest, PlatformClient, PredictRequest, SCALABLE_DIMENSION, SCALING_POLICY_NAME,
    VARIANT_NAME, scaling_resource_id,
};
use crate::config::DeployConfig;
use crate::error::{ConfigError, PlatformError, ResourceKind};
use crate::retry::{RetryConfig, with_retry};
use crate::types::{Capacity, EndpointDescription, ScalingPolicy};

const JSON_11: &str = "application/x-amz-json-1.1";
const SERVICE_NAMESPACE: &str = "sagemaker";
const INVOCATIONS_METRIC: &str = "SageMakerVariantInvocationsPerInstance";
const LIST_PAGE_SIZE: u32 = 100;

/// Which JSON 1.1 service a control-plane call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Api {
    SageMaker,
    Autoscaling,
}

impl Api {
    fn target_prefix(self) -> &'static str {
        match self {
            Self::SageMaker => "SageMaker",
            Self::Autoscaling => "AnyScaleFrontendService",
        }
    }

    fn signing_service(self) -> &'static str {
        match self {
            Self::SageMaker => "sagemaker",
            Self::Autoscaling => "application-autoscaling",
        }
    }
}

/// Base URLs of the three services, without trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrls {
    pub control: String,
    pub autoscaling: String,
    pub runtime: String,
}

impl ServiceUrls {
    pub fn for_region(region: &str) -> Self {
        Self {
            control: format!("https://api.sagemaker.{region}.amazonaws.com"),
            autoscaling: format!("https://application-autoscaling.{region}.amazonaws.com"),
            runtime: format!("https://runtime.sagemaker.{region}.amazonaws.com"),
        }
    }
}

/// Platform client for Amazon SageMaker.
pub struct SageMakerClient {
    client: Client,
    credentials: Credentials,
    region: String,
    urls: ServiceUrls,
    retry: RetryConfig,
    timeout: Duration,
}

impl SageMakerClient {
    pub fn new(
        credentials: Credentials,
        region: impl Into<String>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        let region = region.into();
        Self {
            client: Client::new(),
            credentials,
            urls: ServiceUrls::for_region(&region),
            region,
            retry,
            timeout,
        }
    }

    /// Build a client from resolved configuration and environment credentials.
    pub fn from_config(config: &DeployConfig) -> Result<Self, ConfigError> {
        let credentials = Credentials::from_env()?;
        Ok(Self::new(
            credentials,
            config.region.clone(),
            config.retry.clone(),
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    /// Point the client at alternative service URLs (VPC endpoints, local stacks).
    pub fn with_urls(mut self, urls: ServiceUrls) -> Self {
        self.urls = urls;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn call(&self, api: Api, action: &str, body: Value) -> Result<Value, PlatformError> {
        let body = &body;
        with_retry(&self.retry, action, move || self.call_once(api, action, body)).await
    }

    async fn call_once(&self, api: Api, action: &str, body: &Value) -> Result<Value, PlatformError> {
        let base = match api {
            Api::SageMaker => &self.urls.control,
            Api::Autoscaling => &self.urls.autoscaling,
        };
        let target = format!("{}.{action}", api.target_prefix());
        let payload = body.to_string().into_bytes();
        let headers = [("content-type", JSON_11), ("x-amz-target", target.as_str())];

        debug!(action = %action, service = api.signing_service(), "Platform call");
        let bytes = self
            .send_signed(action, base, "/", &headers, payload, api.signing_service())
            .await?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            PlatformError::fault("MalformedResponse", format!("{action} returned invalid JSON: {e}"))
        })
    }

    /// Sign, send and bound one request. Non-2xx responses are classified.
    async fn send_signed(
        &self,
        action: &str,
        base: &str,
        path: &str,
        headers: &[(&str, &str)],
        payload: Vec<u8>,
        service: &str,
    ) -> Result<Vec<u8>, PlatformError> {
        let host = host_of(base);
        let signed = sigv4::sign(
            &SignableRequest {
                method: "POST",
                host,
                path,
                headers,
                payload: &payload,
            },
            &self.credentials,
            &self.region,
            service,
            Utc::now(),
        );

        let mut request = self.client.post(format!("{base}{path}"));
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        for (name, value) in &signed {
            request = request.header(name.as_str(), value.as_str());
        }
        let request = request.body(payload);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let error_type = response
                .headers()
                .get("x-amzn-errortype")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, error_type, retry_after, body))
        };

        let (status, error_type, retry_after, body) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => return Err(transport_error(action, self.timeout, e)),
            Err(_) => {
                return Err(PlatformError::Timeout {
                    operation: action.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(classify_error(
                action,
                status.as_u16(),
                error_type.as_deref(),
                &text,
            )
            .with_retry_after(retry_after));
        }
        Ok(body.to_vec())
    }

    async fn delete_model(&self, model_name: &str) -> Result<(), PlatformError> {
        self.call(
            Api::SageMaker,
            "DeleteModel",
            json!({ "ModelName": model_name }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl PlatformClient for SageMakerClient {
    async fn create_config(&self, request: &ConfigRequest) -> Result<(), PlatformError> {
        match self
            .call(
                Api::SageMaker,
                "CreateModel",
                create_model_body(request, &self.region),
            )
            .await
        {
            Ok(_) => {}
            Err(PlatformError::AlreadyExists { .. }) => {
                debug!(model = %request.config_name, "Model already exists, reusing it");
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self
            .call(
                Api::SageMaker,
                "CreateEndpointConfig",
                endpoint_config_body(request),
            )
            .await
        {
            if let Err(cleanup) = self.delete_model(&request.config_name).await {
                warn!(
                    model = %request.config_name,
                    error = %cleanup,
                    "Failed to remove model after endpoint configuration error"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete_config(&self, config_name: &str) -> Result<(), PlatformError> {
        self.call(
            Api::SageMaker,
            "DeleteEndpointConfig",
            json!({ "EndpointConfigName": config_name }),
        )
        .await?;
        match self.delete_model(config_name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(model = %config_name, error = %e, "Failed to delete model"),
        }
        Ok(())
    }

    async fn list_configs(&self, prefix: &str) -> Result<Vec<String>, PlatformError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({
                "NameContains": prefix,
                "MaxResults": LIST_PAGE_SIZE,
            });
            if let Some(token) = &next_token {
                body["NextToken"] = Value::String(token.clone());
            }
            let page = self
                .call(Api::SageMaker, "ListEndpointConfigs", body)
                .await?;
            if let Some(configs) = page.get("EndpointConfigs").and_then(Value::as_array) {
                names.extend(
                    configs
                        .iter()
                        .filter_map(|c| c.get("EndpointConfigName").and_then(Value::as_str))
                        .filter(|name| name.starts_with(prefix))
                        .map(str::to_string),
                );
            }
            next_token = page
                .get("NextToken")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        names.sort();
        Ok(names)
    }

    async fn create_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Api::SageMaker,
            "CreateEndpoint",
            json!({
                "EndpointName": endpoint_name,
                "EndpointConfigName": config_name,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn update_endpoint(
        &self,
        endpoint_name: &str,
        config_name: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Api::SageMaker,
            "UpdateEndpoint",
            json!({
                "EndpointName": endpoint_name,
                "EndpointConfigName": config_name,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn delete_endpoint(&self, endpoint_name: &str) -> Result<(), PlatformError> {
        self.call(
            Api::SageMaker,
            "DeleteEndpoint",
            json!({ "EndpointName": endpoint_name }),
        )
        .await
        .map(|_| ())
    }

    async fn describe_endpoint(
        &self,
        endpoint_name: &str,
    ) -> Result<EndpointDescription, PlatformError> {
        let resp = self
            .call(
                Api::SageMaker,
                "DescribeEndpoint",
                json!({ "EndpointName": endpoint_name }),
            )
            .await?;
        let field = |key: &str| resp.get(key).and_then(Value::as_str).map(str::to_string);
        let status = field("EndpointStatus").ok_or_else(|| {
            PlatformError::fault(
                "MalformedResponse",
                "DescribeEndpoint response has no EndpointStatus",
            )
        })?;
        Ok(EndpointDescription {
            name: field("EndpointName").unwrap_or_else(|| endpoint_name.to_string()),
            status,
            config_name: field("EndpointConfigName").unwrap_or_default(),
            failure_reason: field("FailureReason"),
        })
    }

    async fn register_scalable_target(&self, policy: &ScalingPolicy) -> Result<(), PlatformError> {
        self.call(
            Api::Autoscaling,
            "RegisterScalableTarget",
            json!({
                "ServiceNamespace": SERVICE_NAMESPACE,
                "ResourceId": scaling_resource_id(&policy.endpoint_name),
                "ScalableDimension": SCALABLE_DIMENSION,
                "MinCapacity": policy.min_capacity,
                "MaxCapacity": policy.max_capacity,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn put_scaling_policy(&self, policy: &ScalingPolicy) -> Result<(), PlatformError> {
        self.call(Api::Autoscaling, "PutScalingPolicy", scaling_policy_body(policy))
            .await
            .map(|_| ())
    }

    async fn delete_scaling_policy(&self, endpoint_name: &str) -> Result<(), PlatformError> {
        self.call(
            Api::Autoscaling,
            "DeleteScalingPolicy",
            json!({
                "PolicyName": SCALING_POLICY_NAME,
                "ServiceNamespace": SERVICE_NAMESPACE,
                "ResourceId": scaling_resource_id(endpoint_name),
                "ScalableDimension": SCALABLE_DIMENSION,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn deregister_scalable_target(
        &self,
        endpoint_name: &str,
    ) -> Result<(), PlatformError> {
        self.call(
            Api::Autoscaling,
            "DeregisterScalableTarget",
            json!({
                "ServiceNamespace": SERVICE_NAMESPACE,
                "ResourceId": scaling_resource_id(endpoint_name),
                "ScalableDimension": SCALABLE_DIMENSION,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn predict(&self, request: &PredictRequest) -> Result<Vec<u8>, PlatformError> {
        let path = format!("/endpoints/{}/invocations", request.endpoint_name);
        let headers = [
            ("content-type", request.content_type.as_str()),
            ("accept", request.accept.as_str()),
        ];
        debug!(endpoint = %request.endpoint_name, bytes = request.body.len(), "InvokeEndpoint");
        self.send_signed(
            "InvokeEndpoint",
            &self.urls.runtime,
            &path,
            &headers,
            request.body.clone(),
            "sagemaker",
        )
        .await
    }
}

fn host_of(base: &str) -> &str {
    base.split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base)
        .trim_end_matches('/')
}

fn transport_error(action: &str, timeout: Duration, err: reqwest::Error) -> PlatformError {
    if err.is_timeout() {
        PlatformError::Timeout {
            operation: action.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        PlatformError::Transport {
            message: format!("{action}: {err}"),
        }
    }
}

/// Container environment for a model: the handler script plus the
/// framework's serving settings, overridden by the request's own entries.
fn container_environment(request: &ConfigRequest, region: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("SAGEMAKER_PROGRAM".to_string(), request.entry_point.clone());
    env.insert(
        "SAGEMAKER_SUBMIT_DIRECTORY".to_string(),
        "/opt/ml/model/code".to_string(),
    );
    env.insert("SAGEMAKER_REGION".to_string(), region.to_string());
    env.insert("SAGEMAKER_CONTAINER_LOG_LEVEL".to_string(), "20".to_string());
    for (key, value) in &request.environment {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// `CreateModel` body. The model shares its name with the configuration.
fn create_model_body(request: &ConfigRequest, region: &str) -> Value {
    json!({
        "ModelName": request.config_name,
        "ExecutionRoleArn": request.role_arn,
        "PrimaryContainer": {
            "Image": request.image_uri,
            "ModelDataUrl": request.model_data,
            "Environment": container_environment(request, region),
        },
    })
}

fn endpoint_config_body(request: &ConfigRequest) -> Value {
    let mut variant = Map::new();
    variant.insert("VariantName".into(), json!(VARIANT_NAME));
    variant.insert("ModelName".into(), json!(request.config_name));
    match &request.capacity {
        Capacity::Provisioned {
            instance_type,
            initial_instance_count,
        } => {
            variant.insert("InstanceType".into(), json!(instance_type));
            variant.insert("InitialInstanceCount".into(), json!(initial_instance_count));
            variant.insert("InitialVariantWeight".into(), json!(1.0));
        }
        Capacity::Serverless(profile) => {
            variant.insert(
                "ServerlessConfig".into(),
                json!({
                    "MemorySizeInMB": profile.memory_mb,
                    "MaxConcurrency": profile.max_concurrency,
                }),
            );
        }
    }
    json!({
        "EndpointConfigName": request.config_name,
        "ProductionVariants": [Value::Object(variant)],
    })
}

fn scaling_policy_body(policy: &ScalingPolicy) -> Value {
    json!({
        "PolicyName": SCALING_POLICY_NAME,
        "ServiceNamespace": SERVICE_NAMESPACE,
        "ResourceId": scaling_resource_id(&policy.endpoint_name),
        "ScalableDimension": SCALABLE_DIMENSION,
        "PolicyType": "TargetTrackingScaling",
        "TargetTrackingScalingPolicyConfiguration": {
            "TargetValue": policy.target_invocations_per_instance,
            "PredefinedMetricSpecification": {
                "PredefinedMetricType": INVOCATIONS_METRIC,
            },
            "ScaleInCooldown": policy.scale_in_cooldown_secs,
            "ScaleOutCooldown": policy.scale_out_cooldown_secs,
        },
    })
}

/// Error codes arrive as `Code`, `prefix#Code` or `Code:http://...`.
fn normalize_code(raw: &str) -> &str {
    let code = raw.rsplit('#').next().unwrap_or(raw);
    code.split(':').next().unwrap_or(code).trim()
}

/// The resource an action operates on.
fn resource_for_action(action: &str) -> ResourceKind {
    if action.contains("EndpointConfig") {
        ResourceKind::EndpointConfig
    } else if action.contains("Model") {
        ResourceKind::Model
    } else if action.contains("ScalingPolic") {
        ResourceKind::ScalingPolicy
    } else if action.contains("ScalableTarget") {
        ResourceKind::ScalableTarget
    } else {
        ResourceKind::Endpoint
    }
}

/// Delay from a `Retry-After` header. Only the delta-seconds form is used.
fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

/// Classify a non-2xx response into a [`PlatformError`].
fn classify_error(
    action: &str,
    status: u16,
    error_type: Option<&str>,
    body: &str,
) -> PlatformError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = error_type
        .map(str::to_string)
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|v| v.get("__type"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(|raw| normalize_code(&raw).to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| format!("HTTP{status}"));
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("Message")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    match code.as_str() {
        "ThrottlingException" | "Throttling" | "TooManyRequestsException"
        | "RequestLimitExceeded" => {
            return PlatformError::Throttled {
                message,
                retry_after_secs: None,
            };
        }
        "ResourceNotFound" | "ResourceNotFoundException" | "ObjectNotFoundException" => {
            return PlatformError::not_found(resource_for_action(action), message);
        }
        "ValidationException" | "ValidationError" => {
            return classify_validation(action, &code, message);
        }
        "ServiceUnavailable" | "ServiceUnavailableException" | "InternalFailure"
        | "InternalServerError" | "InternalServiceException" | "ConcurrentUpdateException" => {
            return PlatformError::Unavailable {
                message: format!("{code}: {message}"),
            };
        }
        _ => {}
    }

    if status == 429 {
        return PlatformError::Throttled {
            message,
            retry_after_secs: None,
        };
    }
    if status >= 500 {
        return PlatformError::Unavailable {
            message: format!("{code} (HTTP {status}): {message}"),
        };
    }
    PlatformError::Fault { code, message }
}

/// SageMaker reports missing and duplicate resources as validation errors.
fn classify_validation(action: &str, code: &str, message: String) -> PlatformError {
    let targets_existing = ["Describe", "Delete", "Update"]
        .iter()
        .any(|verb| action.starts_with(verb));

    if targets_existing {
        let lower = message.to_ascii_lowercase();
        let resource = if lower.contains("could not find endpoint configuration") {
            Some(ResourceKind::EndpointConfig)
        } else if lower.contains("could not find model") {
            Some(ResourceKind::Model)
        } else if lower.contains("could not find endpoint") {
            Some(ResourceKind::Endpoint)
        } else {
            None
        };
        if let Some(resource) = resource {
            return PlatformError::not_found(resource, message);
        }
    }

    if action == "InvokeEndpoint" && message.to_ascii_lowercase().contains("not found") {
        return PlatformError::not_found(ResourceKind::Endpoint, message);
    }

    if message.contains("already existing") || message.contains("already exists") {
        return PlatformError::AlreadyExists {
            resource: resource_for_action(action),
            message,
        };
    }

    PlatformError::invalid_argument(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerlessProfile;
    use pretty_assertions::assert_eq;

    fn request(capacity: Capacity) -> ConfigRequest {
        ConfigRequest {
            config_name: "embed-text-cfg-1700000000000".into(),
            image_uri: "763104351884.dkr.ecr.us-east-1.amazonaws.com/pytorch-inference:2.2-gpu-py310"
                .into(),
            model_data: "s3://models/text.tar.gz".into(),
            entry_point: "embed_text.py".into(),
            role_arn: "arn:aws:iam::123456789012:role/SageMakerRole".into(),
            capacity,
            environment: BTreeMap::new(),
        }
    }

    #[test]
    fn test_missing_endpoint_on_describe_is_not_found() {
        let err = classify_error(
            "DescribeEndpoint",
            400,
            None,
            r#"{"__type":"com.amazonaws.sagemaker#ValidationException","message":"Could not find endpoint \"embed-text\"."}"#,
        );
        assert_eq!(
            err,
            PlatformError::not_found(
                ResourceKind::Endpoint,
                "Could not find endpoint \"embed-text\"."
            )
        );
    }

    #[test]
    fn test_missing_config_on_delete_is_not_found() {
        let err = classify_error(
            "DeleteEndpointConfig",
            400,
            None,
            r#"{"__type":"ValidationException","message":"Could not find endpoint configuration \"embed-text\"."}"#,
        );
        assert!(matches!(
            err,
            PlatformError::NotFound {
                resource: ResourceKind::EndpointConfig,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_config_on_create_is_invalid_argument() {
        let err = classify_error(
            "CreateEndpoint",
            400,
            None,
            r#"{"__type":"ValidationException","message":"Could not find endpoint configuration \"x\"."}"#,
        );
        assert!(matches!(err, PlatformError::InvalidArgument { .. }));
    }

    #[test]
    fn test_duplicate_create_is_already_exists() {
        let err = classify_error(
            "CreateEndpointConfig",
            400,
            None,
            r#"{"__type":"ValidationException","message":"Cannot create already existing endpoint configuration \"x\"."}"#,
        );
        assert!(matches!(
            err,
            PlatformError::AlreadyExists {
                resource: ResourceKind::EndpointConfig,
                ..
            }
        ));
    }

    #[test]
    fn test_throttling_and_server_errors_are_retryable() {
        let throttled = classify_error(
            "DescribeEndpoint",
            400,
            None,
            r#"{"__type":"ThrottlingException","message":"Rate exceeded"}"#,
        );
        assert!(matches!(throttled, PlatformError::Throttled { .. }));
        assert!(throttled.is_retryable());

        let too_many = classify_error("ListEndpointConfigs", 429, None, "");
        assert!(too_many.is_retryable());

        let unavailable = classify_error("CreateEndpoint", 503, None, "Service Unavailable");
        assert!(matches!(unavailable, PlatformError::Unavailable { .. }));

        let concurrent = classify_error(
            "RegisterScalableTarget",
            400,
            None,
            r#"{"__type":"ConcurrentUpdateException","Message":"busy"}"#,
        );
        assert!(concurrent.is_retryable());
    }

    #[test]
    fn test_retry_after_header_reaches_throttling_error() {
        assert_eq!(parse_retry_after(" 7 "), Some(7));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);

        let throttled = classify_error("DescribeEndpoint", 429, None, "")
            .with_retry_after(parse_retry_after("7"));
        assert_eq!(
            throttled,
            PlatformError::Throttled {
                message: String::new(),
                retry_after_secs: Some(7),
            }
        );

        let unavailable = classify_error("CreateEndpoint", 503, None, "Service Unavailable")
            .with_retry_after(Some(7));
        assert!(matches!(unavailable, PlatformError::Unavailable { .. }));
    }

    #[test]
    fn test_autoscaling_object_not_found() {
        let err = classify_error(
            "DeregisterScalableTarget",
            400,
            None,
            r#"{"__type":"ObjectNotFoundException","Message":"No scalable target registered"}"#,
        );
        assert_eq!(
            err,
            PlatformError::not_found(ResourceKind::ScalableTarget, "No scalable target registered")
        );
    }

    #[test]
    fn test_runtime_error_type_header() {
        let err = classify_error(
            "InvokeEndpoint",
            400,
            Some("ValidationError:http://internal.amazon.com/coral/com.amazon.coral.validate/"),
            r#"{"message":"Endpoint embed-text of account 123456789012 not found."}"#,
        );
        assert!(matches!(
            err,
            PlatformError::NotFound {
                resource: ResourceKind::Endpoint,
                ..
            }
        ));

        let model_error = classify_error(
            "InvokeEndpoint",
            424,
            Some("ModelError"),
            r#"{"message":"Received server error (500) from primary"}"#,
        );
        assert_eq!(
            model_error,
            PlatformError::fault("ModelError", "Received server error (500) from primary")
        );
    }

    #[test]
    fn test_access_denied_is_fault() {
        let err = classify_error(
            "CreateModel",
            400,
            None,
            r#"{"__type":"AccessDeniedException","message":"not authorized"}"#,
        );
        assert_eq!(err, PlatformError::fault("AccessDeniedException", "not authorized"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("com.amazonaws.sagemaker#ValidationException"), "ValidationException");
        assert_eq!(normalize_code("ValidationError:http://x/y"), "ValidationError");
        assert_eq!(normalize_code("ThrottlingException"), "ThrottlingException");
    }

    #[test]
    fn test_provisioned_config_body() {
        let body = endpoint_config_body(&request(Capacity::Provisioned {
            instance_type: "ml.g4dn.xlarge".into(),
            initial_instance_count: 1,
        }));
        let variant = &body["ProductionVariants"][0];
        assert_eq!(variant["VariantName"], "AllTraffic");
        assert_eq!(variant["ModelName"], "embed-text-cfg-1700000000000");
        assert_eq!(variant["InstanceType"], "ml.g4dn.xlarge");
        assert_eq!(variant["InitialInstanceCount"], 1);
        assert!(variant.get("ServerlessConfig").is_none());
    }

    #[test]
    fn test_serverless_config_body() {
        let body = endpoint_config_body(&request(Capacity::Serverless(ServerlessProfile {
            memory_mb: 2048,
            max_concurrency: 5,
        })));
        let variant = &body["ProductionVariants"][0];
        assert_eq!(variant["ServerlessConfig"]["MemorySizeInMB"], 2048);
        assert_eq!(variant["ServerlessConfig"]["MaxConcurrency"], 5);
        assert!(variant.get("InstanceType").is_none());
    }

    #[test]
    fn test_model_body_sets_handler_and_allows_overrides() {
        let mut req = request(Capacity::Provisioned {
            instance_type: "ml.m5.large".into(),
            initial_instance_count: 1,
        });
        req.environment
            .insert("SAGEMAKER_CONTAINER_LOG_LEVEL".into(), "10".into());
        let body = create_model_body(&req, "eu-west-1");
        let env = &body["PrimaryContainer"]["Environment"];
        assert_eq!(env["SAGEMAKER_PROGRAM"], "embed_text.py");
        assert_eq!(env["SAGEMAKER_REGION"], "eu-west-1");
        assert_eq!(env["SAGEMAKER_CONTAINER_LOG_LEVEL"], "10");
        assert_eq!(body["PrimaryContainer"]["ModelDataUrl"], "s3://models/text.tar.gz");
    }

    #[test]
    fn test_scaling_policy_body() {
        let body = scaling_policy_body(&ScalingPolicy::new("embed-text", 1, 4, 70.0));
        assert_eq!(body["ResourceId"], "endpoint/embed-text/variant/AllTraffic");
        assert_eq!(body["PolicyType"], "TargetTrackingScaling");
        let cfg = &body["TargetTrackingScalingPolicyConfiguration"];
        assert_eq!(cfg["TargetValue"], 70.0);
        assert_eq!(
            cfg["PredefinedMetricSpecification"]["PredefinedMetricType"],
            "SageMakerVariantInvocationsPerInstance"
        );
        assert_eq!(cfg["ScaleInCooldown"], 60);
    }

    #[test]
    fn test_service_urls_and_hosts() {
        let urls = ServiceUrls::for_region("us-west-2");
        assert_eq!(host_of(&urls.control), "api.sagemaker.us-west-2.amazonaws.com");
        assert_eq!(
            host_of(&urls.autoscaling),
            "application-autoscaling.us-west-2.amazonaws.com"
        );
        assert_eq!(host_of("http://localhost:4566/"), "localhost:4566");
    }
}
