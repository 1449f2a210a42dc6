//! Integration tests for the inference dispatcher, plus the full
//! deploy → wait → autoscale → invoke flow.

use inferdeploy_core::config::{DeployConfig, InferenceConfig, WaitConfig};
use inferdeploy_core::error::{InferenceError, PlatformError};
use inferdeploy_core::platform::memory::PlatformOp;
use inferdeploy_core::platform::{InMemoryPlatform, PlatformCall};
use inferdeploy_core::types::{EndpointSpec, EndpointState, ScalingPolicy};
use inferdeploy_core::{Autoscaler, EndpointController, InferenceDispatcher, Payload};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn serving_platform() -> Arc<InMemoryPlatform> {
    let platform = Arc::new(InMemoryPlatform::new());
    for name in ["embedd-text", "embedd-audio"] {
        let config = format!("{name}-cfg-1");
        platform.seed_config(&config);
        platform.seed_endpoint(name, &config, "InService");
    }
    platform
}

fn dispatcher(platform: &Arc<InMemoryPlatform>) -> InferenceDispatcher {
    InferenceDispatcher::new(platform.clone(), InferenceConfig::default())
}

#[tokio::test]
async fn test_invoke_text_uses_configured_endpoint() {
    let platform = serving_platform();
    let dispatcher = dispatcher(&platform);

    let response = dispatcher
        .invoke_text(vec!["hello world".into(), "second".into()])
        .await
        .unwrap();
    assert_eq!(response.endpoint, "embedd-text");
    assert_eq!(response.body["embeddings"].as_array().unwrap().len(), 2);
    assert_eq!(
        platform.calls(),
        vec![PlatformCall::Predict("embedd-text".into())]
    );
}

#[tokio::test]
async fn test_invoke_audio_passes_body_through() {
    let platform = serving_platform();
    platform.set_predict_response("embedd-audio", r#"{"vectors": [[1.0]], "model": "clap"}"#);
    let dispatcher = dispatcher(&platform);

    let response = dispatcher
        .invoke_audio(vec!["s3://clips/a.wav".into()])
        .await
        .unwrap();
    assert_eq!(
        response.body,
        serde_json::json!({"vectors": [[1.0]], "model": "clap"})
    );
}

#[tokio::test]
async fn test_empty_batch_is_rejected_locally() {
    let platform = serving_platform();
    let dispatcher = dispatcher(&platform);
    let err = dispatcher.invoke_text(Vec::new()).await.unwrap_err();
    assert_eq!(
        err,
        InferenceError::EmptyBatch {
            endpoint: "embedd-text".into()
        }
    );
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn test_non_json_response_is_serialization_error() {
    let platform = serving_platform();
    platform.set_predict_response("embedd-text", "<html>502</html>");
    let dispatcher = dispatcher(&platform);
    let err = dispatcher
        .invoke_text(vec!["hi".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::Serialization { .. }));
}

#[tokio::test]
async fn test_missing_endpoint_is_typed_error() {
    let platform = Arc::new(InMemoryPlatform::new());
    let dispatcher = dispatcher(&platform);
    let err = dispatcher
        .invoke("nope", &Payload::text(["hi"]))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        InferenceError::EndpointNotFound {
            endpoint: "nope".into()
        }
    );
}

#[tokio::test]
async fn test_predict_is_not_retried() {
    let platform = serving_platform();
    platform.fail_next(
        PlatformOp::Predict,
        PlatformError::Unavailable {
            message: "503".into(),
        },
    );
    let dispatcher = dispatcher(&platform);
    let err = dispatcher
        .invoke_text(vec!["hi".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::Platform { .. }));
    assert_eq!(platform.calls().len(), 1);
}

#[tokio::test]
async fn test_batch_continues_past_failures() {
    let platform = serving_platform();
    let dispatcher = dispatcher(&platform);
    let requests = vec![
        ("embedd-text".to_string(), Payload::text(["a"])),
        ("missing".to_string(), Payload::text(["b"])),
        ("embedd-audio".to_string(), Payload::audio(Vec::<String>::new())),
        ("embedd-audio".to_string(), Payload::audio(["s3://clips/c.wav"])),
    ];
    let results = dispatcher.invoke_batch(&requests).await;
    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1],
        Err(InferenceError::EndpointNotFound { .. })
    ));
    assert!(matches!(results[2], Err(InferenceError::EmptyBatch { .. })));
    assert!(results[3].is_ok());
}

#[tokio::test]
async fn test_deploy_wait_attach_invoke_flow() {
    let platform = Arc::new(InMemoryPlatform::new().with_auto_settle(1));
    let config = DeployConfig {
        role_arn: Some("arn:aws:iam::123456789012:role/SageMakerRole".into()),
        wait: WaitConfig {
            poll_interval_secs: 0,
            max_wait_secs: 5,
        },
        ..DeployConfig::default()
    };
    let controller = EndpointController::new(platform.clone(), config.clone());
    let autoscaler = Autoscaler::new(platform.clone());
    let dispatcher = InferenceDispatcher::new(platform.clone(), config.inference.clone());

    let spec = EndpointSpec::provisioned(
        "embed-text",
        "s3://bucket/model.tar.gz",
        "embed_text.py",
        "ml.g4dn.xlarge",
    );
    controller.deploy(&spec).await.unwrap();
    assert_eq!(
        controller.status("embed-text").await.unwrap(),
        EndpointState::Configuring
    );
    assert_eq!(
        controller.wait_for_in_service("embed-text").await.unwrap(),
        EndpointState::InService
    );
    assert_eq!(
        controller.status("embed-text").await.unwrap(),
        EndpointState::InService
    );

    autoscaler
        .attach(&ScalingPolicy::new("embed-text", 1, 5, 50.0))
        .await
        .unwrap();
    assert_eq!(platform.scalable_target("embed-text"), Some((1, 5)));

    let response = dispatcher
        .invoke("embed-text", &Payload::text(["hello world"]))
        .await
        .unwrap();
    assert_eq!(response.body["embeddings"].as_array().unwrap().len(), 1);
    assert!(response.latency.as_secs() < config.inference.timeout_secs);
}
