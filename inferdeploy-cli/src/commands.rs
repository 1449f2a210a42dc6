//! CLI subcommand handlers.
//!
//! Each handler runs its operation for every configured endpoint, logs the
//! outcome per endpoint and returns the number of failures. Platform failures
//! are never turned into an `Err`; only local problems (bad configuration,
//! missing credentials) are.

use crate::{Commands, InvokeTarget};
use inferdeploy_core::{
    Autoscaler, DeployConfig, DeployOutcome, EndpointController, InferenceDispatcher,
    PlatformClient, SageMakerClient,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Handle a CLI subcommand against SageMaker.
pub async fn handle_command(command: Commands, config: DeployConfig) -> anyhow::Result<usize> {
    let client = SageMakerClient::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Cannot create platform client: {}", e))?;
    run(command, config, Arc::new(client)).await
}

/// Handle a subcommand against any platform.
async fn run(
    command: Commands,
    config: DeployConfig,
    platform: Arc<dyn PlatformClient>,
) -> anyhow::Result<usize> {
    match command {
        Commands::Deploy { wait } => handle_deploy(config, platform, wait).await,
        Commands::Delete => Ok(handle_delete(config, platform).await),
        Commands::Status => Ok(handle_status(config, platform).await),
        Commands::Autoscale => Ok(handle_autoscale(config, platform).await),
        Commands::Invoke { target } => handle_invoke(config, platform, target).await,
    }
}

async fn handle_deploy(
    config: DeployConfig,
    platform: Arc<dyn PlatformClient>,
    wait: bool,
) -> anyhow::Result<usize> {
    let specs = config
        .endpoint_specs()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if specs.is_empty() {
        warn!("No endpoints configured; set [[endpoints]] or MODEL_S3_PATH");
        return Ok(0);
    }

    let controller = EndpointController::new(platform, config);
    let mut failures = 0;
    for spec in &specs {
        let outcome = match controller.deploy(spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(endpoint = %spec.name, error = %e, "Deploy failed");
                failures += 1;
                continue;
            }
        };
        println!("{}: {}", spec.name, describe_outcome(&outcome));

        if wait {
            match controller.wait_for_in_service(&spec.name).await {
                Ok(state) => println!("{}: {}", spec.name, state),
                Err(e) => {
                    error!(endpoint = %spec.name, error = %e, "Endpoint did not become ready");
                    failures += 1;
                }
            }
        }
    }
    Ok(failures)
}

async fn handle_delete(config: DeployConfig, platform: Arc<dyn PlatformClient>) -> usize {
    let names = config.endpoint_names();
    let controller = EndpointController::new(platform, config);
    let mut failures = 0;
    for name in &names {
        match controller.delete(name).await {
            Ok(report) if report.was_absent() => println!("{name}: already absent"),
            Ok(report) => {
                let configs = report.configs.len();
                println!("{name}: deleted ({configs} configuration(s) checked)");
            }
            Err(e) => {
                error!(endpoint = %name, error = %e, "Delete failed");
                failures += 1;
            }
        }
    }
    failures
}

async fn handle_status(config: DeployConfig, platform: Arc<dyn PlatformClient>) -> usize {
    let names = config.endpoint_names();
    let controller = EndpointController::new(platform, config);
    let mut failures = 0;
    for name in &names {
        match controller.status(name).await {
            Ok(state) => println!("{name}: {state}"),
            Err(e) => {
                error!(endpoint = %name, error = %e, "Status check failed");
                failures += 1;
            }
        }
    }
    failures
}

async fn handle_autoscale(config: DeployConfig, platform: Arc<dyn PlatformClient>) -> usize {
    let autoscaler = Autoscaler::new(platform);
    let mut failures = 0;
    for name in config.endpoint_names() {
        if config.is_serverless(&name) {
            info!(endpoint = %name, "Serverless endpoint, skipping autoscaling");
            continue;
        }
        match autoscaler.attach(&config.scaling_policy(&name)).await {
            Ok(()) => println!("{name}: autoscaling attached"),
            Err(e) => {
                error!(endpoint = %name, error = %e, "Autoscaling attach failed");
                failures += 1;
            }
        }
    }
    failures
}

async fn handle_invoke(
    config: DeployConfig,
    platform: Arc<dyn PlatformClient>,
    target: InvokeTarget,
) -> anyhow::Result<usize> {
    let dispatcher = InferenceDispatcher::new(platform, config.inference);
    let result = match target {
        InvokeTarget::Text { texts } => dispatcher.invoke_text(texts).await,
        InvokeTarget::Audio { file_uris } => dispatcher.invoke_audio(file_uris).await,
    };
    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response.body)?);
            Ok(0)
        }
        Err(e) => {
            error!(error = %e, "Inference failed");
            Ok(1)
        }
    }
}

fn describe_outcome(outcome: &DeployOutcome) -> String {
    match outcome {
        DeployOutcome::Created { config_name } => format!("creating with {config_name}"),
        DeployOutcome::Swapped {
            config_name,
            previous_config,
        } => format!("updating from {previous_config} to {config_name}"),
        DeployOutcome::Recreated { config_name } => {
            format!("recreating failed endpoint with {config_name}")
        }
    }
}
