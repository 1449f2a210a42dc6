//! Autoscaling attacher.
//!
//! Registers an endpoint's production variant as a scalable target and puts a
//! target-tracking policy on invocations per instance. Attaching is only
//! meaningful on an in-service endpoint and is refused otherwise.

use std::sync::Arc;
use tracing::{info, warn};

use crate::controller::state_of;
use crate::error::LifecycleError;
use crate::platform::{PlatformClient, scaling_resource_id};
use crate::types::{EndpointState, ScalingPolicy};

pub struct Autoscaler {
    platform: Arc<dyn PlatformClient>,
}

impl Autoscaler {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    /// Attach `policy` after checking the endpoint is in service.
    ///
    /// Only a describe call is made when the endpoint is not ready.
    pub async fn attach(&self, policy: &ScalingPolicy) -> Result<(), LifecycleError> {
        policy.validate()?;
        let state = match self.platform.describe_endpoint(&policy.endpoint_name).await {
            Ok(description) => state_of(Some(&description)),
            Err(e) if e.is_not_found() => EndpointState::Absent,
            Err(e) => {
                return Err(LifecycleError::from_platform(
                    "DescribeEndpoint",
                    &policy.endpoint_name,
                    e,
                ));
            }
        };
        self.attach_with_state(policy, state).await
    }

    /// Attach `policy` given an already known endpoint `state`. No platform
    /// call is made unless `state` is in service.
    pub async fn attach_with_state(
        &self,
        policy: &ScalingPolicy,
        state: EndpointState,
    ) -> Result<(), LifecycleError> {
        policy.validate()?;
        let name = policy.endpoint_name.as_str();
        if state != EndpointState::InService {
            warn!(endpoint = %name, state = %state, "Autoscaling not attached, endpoint not ready");
            return Err(LifecycleError::precondition(format!(
                "endpoint '{name}' is {state}; autoscaling needs an in-service endpoint"
            )));
        }

        self.platform
            .register_scalable_target(policy)
            .await
            .map_err(|e| LifecycleError::from_platform("RegisterScalableTarget", name, e))?;
        info!(
            endpoint = %name,
            resource = %scaling_resource_id(name),
            min = policy.min_capacity,
            max = policy.max_capacity,
            "Scalable target registered"
        );

        // The registration is kept if the policy put fails; attaching again is safe.
        self.platform
            .put_scaling_policy(policy)
            .await
            .map_err(|e| LifecycleError::from_platform("PutScalingPolicy", name, e))?;
        info!(
            endpoint = %name,
            target = policy.target_invocations_per_instance,
            scale_out_cooldown_secs = policy.scale_out_cooldown_secs,
            scale_in_cooldown_secs = policy.scale_in_cooldown_secs,
            "Scaling policy attached"
        );
        Ok(())
    }

    /// Remove the scaling policy and deregister the target. Missing pieces
    /// are skipped.
    pub async fn detach(&self, endpoint_name: &str) -> Result<(), LifecycleError> {
        match self.platform.delete_scaling_policy(endpoint_name).await {
            Ok(()) => info!(endpoint = %endpoint_name, "Scaling policy deleted"),
            Err(e) if e.is_not_found() => {
                warn!(endpoint = %endpoint_name, "No scaling policy to delete")
            }
            Err(e) => {
                return Err(LifecycleError::from_platform(
                    "DeleteScalingPolicy",
                    endpoint_name,
                    e,
                ));
            }
        }
        match self.platform.deregister_scalable_target(endpoint_name).await {
            Ok(()) => info!(endpoint = %endpoint_name, "Scalable target deregistered"),
            Err(e) if e.is_not_found() => {
                warn!(endpoint = %endpoint_name, "No scalable target to deregister")
            }
            Err(e) => {
                return Err(LifecycleError::from_platform(
                    "DeregisterScalableTarget",
                    endpoint_name,
                    e,
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryPlatform;

    #[tokio::test]
    async fn test_invalid_policy_rejected_before_any_call() {
        let platform = Arc::new(InMemoryPlatform::new());
        let autoscaler = Autoscaler::new(platform.clone());
        let policy = ScalingPolicy::new("embed-text", 3, 2, 50.0);
        let err = autoscaler.attach(&policy).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidSpec { .. }));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognised_status_is_treated_as_configuring() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.seed_config("embed-text-cfg-1");
        platform.seed_endpoint("embed-text", "embed-text-cfg-1", "Hibernating");
        let autoscaler = Autoscaler::new(platform.clone());
        let err = autoscaler
            .attach(&ScalingPolicy::new("embed-text", 1, 5, 50.0))
            .await
            .unwrap_err();
        match err {
            LifecycleError::PreconditionFailed { message } => {
                assert!(message.contains("Configuring"), "{message}");
            }
            other => panic!("Expected PreconditionFailed, got {:?}", other),
        }
        assert!(platform.calls().iter().all(|c| !c.is_mutating()));
    }

    #[tokio::test]
    async fn test_detach_missing_is_benign() {
        let platform = Arc::new(InMemoryPlatform::new());
        let autoscaler = Autoscaler::new(platform.clone());
        autoscaler.detach("embed-text").await.unwrap();
        assert_eq!(platform.calls().len(), 2);
    }
}
