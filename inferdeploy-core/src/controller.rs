//! Endpoint lifecycle controller.
//!
//! Reconciles the platform towards an [`EndpointSpec`]: creates, swaps,
//! recreates and deletes endpoints and their configurations, tolerating
//! whatever a previous, possibly interrupted, run left behind. Endpoint state
//! is always read from the platform and never cached between calls.
//!
//! Configuration names belonging to endpoint `N` are either `N` (written by
//! earlier tooling) or `N-cfg-<unix millis>`. Anything else that happens to
//! share the prefix is left alone, and so is a generational-looking name that
//! is itself an endpoint.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DeployConfig;
use crate::error::LifecycleError;
use crate::platform::{ConfigRequest, PlatformClient};
use crate::types::{
    CleanupOutcome, DeleteReport, DeployOutcome, EndpointDescription, EndpointSpec, EndpointState,
};

/// Separator between an endpoint name and a config generation.
pub const GENERATION_MARKER: &str = "-cfg-";

/// Name of the configuration generation `generation` of `endpoint`.
pub fn generational_config_name(endpoint: &str, generation: i64) -> String {
    format!("{endpoint}{GENERATION_MARKER}{generation}")
}

/// Generation number encoded in `config_name`, if it is a generational
/// configuration of `endpoint`.
pub fn config_generation(endpoint: &str, config_name: &str) -> Option<i64> {
    let digits = config_name
        .strip_prefix(endpoint)?
        .strip_prefix(GENERATION_MARKER)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next generation: the current time, bumped past any generation already
/// present so names stay unique and ordered.
fn next_generation(endpoint: &str, existing: &[String], now_millis: i64) -> i64 {
    existing
        .iter()
        .filter_map(|name| config_generation(endpoint, name))
        .max()
        .map_or(now_millis, |latest| now_millis.max(latest + 1))
}

/// Map a described status to an [`EndpointState`].
pub(crate) fn state_of(description: Option<&EndpointDescription>) -> EndpointState {
    match description {
        None => EndpointState::Absent,
        Some(desc) => EndpointState::from_platform_status(&desc.status).unwrap_or_else(|| {
            warn!(
                endpoint = %desc.name,
                status = %desc.status,
                "Unrecognised endpoint status, treating as configuring"
            );
            EndpointState::Configuring
        }),
    }
}

/// Drives endpoint create, swap, recreate and delete against a platform.
pub struct EndpointController {
    platform: Arc<dyn PlatformClient>,
    config: DeployConfig,
}

impl EndpointController {
    pub fn new(platform: Arc<dyn PlatformClient>, config: DeployConfig) -> Self {
        Self { platform, config }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Deploy `spec`, replacing whatever currently serves under its name.
    ///
    /// An in-service endpoint is switched to the new configuration in place.
    /// The previous configuration keeps serving until the switch completes and
    /// is removed by the next [`prune_stale_configs`](Self::prune_stale_configs),
    /// [`wait_for_in_service`](Self::wait_for_in_service), deploy or delete.
    pub async fn deploy(&self, spec: &EndpointSpec) -> Result<DeployOutcome, LifecycleError> {
        spec.validate()?;
        let role_arn = self
            .config
            .role_arn
            .as_deref()
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .ok_or_else(|| {
                LifecycleError::invalid_spec("execution role (role_arn) is not configured")
            })?
            .to_string();

        let name = spec.name.as_str();
        let description = self.describe(name).await?;
        let state = state_of(description.as_ref());
        if matches!(state, EndpointState::Configuring | EndpointState::Deleting) {
            warn!(endpoint = %name, state = %state, "Deploy refused, endpoint is busy");
            return Err(LifecycleError::precondition(format!(
                "endpoint '{name}' is {state}; retry once the current operation completes"
            )));
        }
        let live = description
            .as_ref()
            .map(|d| d.config_name.clone())
            .filter(|c| !c.is_empty());

        let existing = self.owned_configs(name).await?;
        self.remove_stale_configs(name, &existing, live.as_deref())
            .await?;

        let generation = next_generation(name, &existing, chrono::Utc::now().timestamp_millis());
        let config_name = generational_config_name(name, generation);
        let request = ConfigRequest {
            config_name: config_name.clone(),
            image_uri: self.config.image_uri_for(&spec.capacity),
            model_data: spec.model_data.clone(),
            entry_point: spec.entry_point.clone(),
            role_arn,
            capacity: spec.capacity.clone(),
            environment: Default::default(),
        };
        self.platform
            .create_config(&request)
            .await
            .map_err(|e| LifecycleError::from_platform("CreateEndpointConfig", &config_name, e))?;
        info!(
            endpoint = %name,
            config = %config_name,
            capacity = %spec.capacity,
            image = %request.image_uri,
            "Endpoint configuration created"
        );

        let bound = match (state, live) {
            (EndpointState::InService, Some(previous)) => self
                .platform
                .update_endpoint(name, &config_name)
                .await
                .map(|()| DeployOutcome::Swapped {
                    config_name: config_name.clone(),
                    previous_config: previous,
                })
                .map_err(|e| LifecycleError::from_platform("UpdateEndpoint", name, e)),
            (EndpointState::Failed, live) => self
                .recreate(name, &config_name, live.as_deref())
                .await
                .map(|()| DeployOutcome::Recreated {
                    config_name: config_name.clone(),
                }),
            _ => self
                .platform
                .create_endpoint(name, &config_name)
                .await
                .map(|()| DeployOutcome::Created {
                    config_name: config_name.clone(),
                })
                .map_err(|e| LifecycleError::from_platform("CreateEndpoint", name, e)),
        };

        match bound {
            Ok(outcome) => {
                info!(endpoint = %name, config = %config_name, outcome = ?outcome, "Deploy acknowledged");
                Ok(outcome)
            }
            Err(e) => {
                error!(endpoint = %name, config = %config_name, error = %e, "Deploy failed");
                self.discard_unbound_config(name, &config_name, &e).await;
                Err(e)
            }
        }
    }

    /// Delete the endpoint and every configuration belonging to it.
    ///
    /// All deletions are attempted even when earlier ones fail. Not-found
    /// outcomes count as success; the first other failure is returned once
    /// every attempt has run.
    pub async fn delete(&self, name: &str) -> Result<DeleteReport, LifecycleError> {
        let mut first_error: Option<LifecycleError> = None;
        let mut note = |err: LifecycleError| {
            if first_error.is_none() {
                first_error = Some(err);
            }
        };

        let description = match self.describe(name).await {
            Ok(description) => description,
            Err(e) => {
                warn!(endpoint = %name, error = %e, "Describe failed, deleting blindly");
                note(e);
                None
            }
        };

        let endpoint = if state_of(description.as_ref()) == EndpointState::Deleting {
            debug!(endpoint = %name, "Endpoint deletion already in progress");
            CleanupOutcome::Deleted
        } else {
            match self.platform.delete_endpoint(name).await {
                Ok(()) => {
                    info!(endpoint = %name, "Endpoint deletion started");
                    CleanupOutcome::Deleted
                }
                Err(e) if e.is_not_found() => {
                    warn!(endpoint = %name, "Endpoint not found, nothing to delete");
                    CleanupOutcome::AlreadyAbsent
                }
                Err(e) => {
                    let err = LifecycleError::from_platform("DeleteEndpoint", name, e);
                    error!(endpoint = %name, error = %err, "Endpoint deletion failed");
                    let outcome = CleanupOutcome::Failed(err.to_string());
                    note(err);
                    outcome
                }
            }
        };

        let mut targets: BTreeSet<String> = BTreeSet::new();
        targets.insert(name.to_string());
        if let Some(desc) = &description {
            if !desc.config_name.is_empty() {
                targets.insert(desc.config_name.clone());
            }
        }
        match self.owned_configs(name).await {
            Ok(owned) => targets.extend(owned),
            Err(e) => {
                warn!(endpoint = %name, error = %e, "Listing configurations failed");
                note(e);
            }
        }

        let mut configs = Vec::with_capacity(targets.len());
        for config_name in targets {
            let outcome = match self.delete_config(&config_name).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let outcome = CleanupOutcome::Failed(err.to_string());
                    note(err);
                    outcome
                }
            };
            configs.push((config_name, outcome));
        }

        let report = DeleteReport {
            endpoint_name: name.to_string(),
            endpoint,
            configs,
        };
        match first_error {
            Some(err) => {
                error!(endpoint = %name, error = %err, "Delete completed with failures");
                Err(err)
            }
            None => {
                info!(endpoint = %name, already_absent = report.was_absent(), "Delete completed");
                Ok(report)
            }
        }
    }

    /// Current state of `name`. Unknown names are [`EndpointState::Absent`].
    pub async fn status(&self, name: &str) -> Result<EndpointState, LifecycleError> {
        let description = self.describe(name).await?;
        let state = state_of(description.as_ref());
        debug!(endpoint = %name, state = %state, "Endpoint status");
        Ok(state)
    }

    /// Poll until `name` is in service, then prune stale configurations.
    pub async fn wait_for_in_service(&self, name: &str) -> Result<EndpointState, LifecycleError> {
        let max_wait = Duration::from_secs(self.config.wait.max_wait_secs);
        let interval = Duration::from_secs(self.config.wait.poll_interval_secs);
        let started = Instant::now();

        loop {
            let description = self.describe(name).await?;
            match state_of(description.as_ref()) {
                EndpointState::InService => {
                    info!(
                        endpoint = %name,
                        waited_secs = started.elapsed().as_secs(),
                        "Endpoint in service"
                    );
                    if let Err(e) = self.prune_stale_configs(name).await {
                        warn!(endpoint = %name, error = %e, "Pruning stale configurations failed");
                    }
                    return Ok(EndpointState::InService);
                }
                EndpointState::Failed => {
                    let reason = description
                        .and_then(|d| d.failure_reason)
                        .unwrap_or_else(|| "no failure reason reported".to_string());
                    error!(endpoint = %name, reason = %reason, "Endpoint failed");
                    return Err(LifecycleError::PlatformFault {
                        operation: "WaitForInService".to_string(),
                        message: format!("endpoint '{name}' failed: {reason}"),
                    });
                }
                EndpointState::Absent => {
                    return Err(LifecycleError::EndpointNotFound {
                        name: name.to_string(),
                    });
                }
                state => debug!(endpoint = %name, state = %state, "Waiting for endpoint"),
            }

            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                return Err(LifecycleError::Timeout {
                    operation: "WaitForInService".to_string(),
                    timeout_secs: max_wait.as_secs(),
                });
            }
            tokio::time::sleep(interval.min(max_wait - elapsed)).await;
        }
    }

    /// Delete configurations of `name` other than the live one.
    ///
    /// Only runs while the endpoint is in service or absent, when no swap can
    /// still reference an older configuration. Returns the deleted names.
    pub async fn prune_stale_configs(&self, name: &str) -> Result<Vec<String>, LifecycleError> {
        let description = self.describe(name).await?;
        let state = state_of(description.as_ref());
        if !matches!(state, EndpointState::InService | EndpointState::Absent) {
            return Err(LifecycleError::precondition(format!(
                "cannot prune configurations of '{name}' while it is {state}"
            )));
        }
        let live = description.map(|d| d.config_name);
        let mut targets = self.owned_configs(name).await?;
        targets.insert(0, name.to_string());

        let mut deleted = Vec::new();
        for config_name in targets {
            if live.as_deref() == Some(config_name.as_str()) {
                continue;
            }
            if self.delete_config(&config_name).await? == CleanupOutcome::Deleted {
                deleted.push(config_name);
            }
        }
        if !deleted.is_empty() {
            info!(endpoint = %name, pruned = ?deleted, "Stale configurations pruned");
        }
        Ok(deleted)
    }

    /// Describe `name`; not-found becomes `None`.
    async fn describe(&self, name: &str) -> Result<Option<EndpointDescription>, LifecycleError> {
        match self.platform.describe_endpoint(name).await {
            Ok(description) => Ok(Some(description)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(LifecycleError::from_platform("DescribeEndpoint", name, e)),
        }
    }

    /// Generational configurations belonging to `name`, sorted.
    ///
    /// A name shaped like a generation of `name` that is itself an endpoint
    /// (created by other tooling) is that endpoint's legacy configuration and
    /// is never claimed.
    async fn owned_configs(&self, name: &str) -> Result<Vec<String>, LifecycleError> {
        let prefix = format!("{name}{GENERATION_MARKER}");
        let mut candidates: Vec<String> = self
            .platform
            .list_configs(&prefix)
            .await
            .map_err(|e| LifecycleError::from_platform("ListEndpointConfigs", name, e))?
            .into_iter()
            .filter(|config| config_generation(name, config).is_some())
            .collect();
        candidates.sort();

        let mut owned = Vec::with_capacity(candidates.len());
        for config_name in candidates {
            if self.describe(&config_name).await?.is_some() {
                warn!(
                    endpoint = %name,
                    config = %config_name,
                    "Configuration is named after another endpoint, leaving it alone"
                );
                continue;
            }
            owned.push(config_name);
        }
        Ok(owned)
    }

    /// Remove the configuration created by a deploy whose binding failed,
    /// unless the endpoint is or may be using it.
    async fn discard_unbound_config(
        &self,
        name: &str,
        config_name: &str,
        cause: &LifecycleError,
    ) {
        if cause.is_ambiguous() {
            warn!(
                endpoint = %name,
                config = %config_name,
                error = %cause,
                "Binding outcome unknown, keeping configuration"
            );
            return;
        }
        match self.describe(name).await {
            Ok(Some(desc))
                if desc.config_name == config_name
                    || state_of(Some(&desc)) == EndpointState::Configuring =>
            {
                warn!(
                    endpoint = %name,
                    config = %config_name,
                    status = %desc.status,
                    "Endpoint may reference the new configuration, keeping it"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    endpoint = %name,
                    config = %config_name,
                    error = %e,
                    "Cannot confirm endpoint binding, keeping configuration"
                );
                return;
            }
        }
        if let Err(cleanup) = self.platform.delete_config(config_name).await {
            warn!(
                config = %config_name,
                error = %cleanup,
                "Failed to remove configuration of failed deploy"
            );
        }
    }

    /// Delete one configuration. Not-found is reported, not returned.
    async fn delete_config(&self, config_name: &str) -> Result<CleanupOutcome, LifecycleError> {
        match self.platform.delete_config(config_name).await {
            Ok(()) => {
                info!(config = %config_name, "Endpoint configuration deleted");
                Ok(CleanupOutcome::Deleted)
            }
            Err(e) => {
                let err = LifecycleError::from_platform("DeleteEndpointConfig", config_name, e);
                if err.is_benign() {
                    warn!(config = %config_name, "Endpoint configuration not found, skipping");
                    Ok(CleanupOutcome::AlreadyAbsent)
                } else {
                    error!(config = %config_name, error = %err, "Endpoint configuration deletion failed");
                    Err(err)
                }
            }
        }
    }

    /// Pre-deploy cleanup: the legacy config plus every generational config
    /// that is not live. Any non-benign failure aborts the deploy.
    async fn remove_stale_configs(
        &self,
        name: &str,
        existing: &[String],
        live: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let mut targets: BTreeSet<&str> = existing.iter().map(String::as_str).collect();
        targets.insert(name);
        for config_name in targets {
            if Some(config_name) == live {
                continue;
            }
            self.delete_config(config_name).await?;
        }
        Ok(())
    }

    /// Replace a failed endpoint: delete it, wait until it is gone, then create
    /// it again on `config_name`.
    async fn recreate(
        &self,
        name: &str,
        config_name: &str,
        failed_config: Option<&str>,
    ) -> Result<(), LifecycleError> {
        warn!(endpoint = %name, "Endpoint is failed, recreating");
        match self.platform.delete_endpoint(name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(LifecycleError::from_platform("DeleteEndpoint", name, e)),
        }
        self.wait_until_absent(name).await?;

        if let Some(failed) = failed_config {
            if failed != config_name {
                self.delete_config(failed).await?;
            }
        }

        self.platform
            .create_endpoint(name, config_name)
            .await
            .map_err(|e| LifecycleError::from_platform("CreateEndpoint", name, e))
    }

    async fn wait_until_absent(&self, name: &str) -> Result<(), LifecycleError> {
        let max_wait = Duration::from_secs(self.config.wait.max_wait_secs);
        let interval = Duration::from_secs(self.config.wait.poll_interval_secs);
        let started = Instant::now();
        loop {
            if self.describe(name).await?.is_none() {
                debug!(endpoint = %name, "Endpoint gone");
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= max_wait {
                return Err(LifecycleError::Timeout {
                    operation: "WaitForDeletion".to_string(),
                    timeout_secs: max_wait.as_secs(),
                });
            }
            tokio::time::sleep(interval.min(max_wait - elapsed)).await;
        }
    }
}
