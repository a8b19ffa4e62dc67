//! Bollard-backed container runtime.
//!
//! Connects to Docker or Podman with automatic fallback and implements
//! the [`Runtime`] capability surface on top of the daemon API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{HealthConfig, HealthStatusEnum, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::stream::StreamExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::runtime::{
    ContainerSpec, ContainerSummary, InspectReport, ReadinessState, Runtime, MEMORY_LIMIT_BYTES,
    NANO_CPUS,
};

/// Docker/Podman implementation of [`Runtime`].
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
}

impl DockerRuntime {
    /// Connect to the local container runtime.
    ///
    /// Tries the platform defaults first (Unix socket or named pipe,
    /// honoring `DOCKER_HOST`), then the rootless and system Podman
    /// sockets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeUnavailable`] when no daemon answers.
    pub async fn connect() -> Result<Self> {
        let docker = Self::try_connect()?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    fn try_connect() -> Result<Docker> {
        debug!("connecting to container runtime");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                debug!("connected via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            if let Ok(home) = std::env::var("HOME") {
                let podman_socket = format!("unix://{}/run/podman/podman.sock", home);
                match Docker::connect_with_socket(&podman_socket, 120, bollard::API_DEFAULT_VERSION)
                {
                    Ok(docker) => {
                        info!("connected to Podman via rootless socket");
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman rootless socket failed: {}", e);
                    }
                }
            }

            let system_socket = "unix:///run/podman/podman.sock";
            match Docker::connect_with_socket(system_socket, 120, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => {
                    info!("connected to Podman via system socket");
                    return Ok(docker);
                }
                Err(e) => {
                    debug!("Podman system socket failed: {}", e);
                }
            }
        }

        Err(Error::RuntimeUnavailable(
            "failed to connect to Docker or Podman; ensure a container runtime is installed and running"
                .to_string(),
        ))
    }

    /// The underlying bollard client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::RuntimeUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(Error::Api(e)),
        }
    }

    async fn image_pull(&self, image: &str) -> Result<()> {
        info!(image, "pulling image");

        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            let progress = result?;
            if let Some(status) = progress.status {
                debug!(image, "pull: {}", status);
            }
            if let Some(error) = progress.error {
                return Err(Error::ImageUnavailable {
                    image: image.to_string(),
                    reason: error,
                });
            }
        }

        info!(image, "image pulled");
        Ok(())
    }

    async fn container_create(&self, spec: &ContainerSpec) -> Result<String> {
        debug!(name = %spec.name, image = %spec.image, "creating container");

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(spec.internal_port.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            spec.internal_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            memory: Some(MEMORY_LIMIT_BYTES),
            nano_cpus: Some(NANO_CPUS),
            ..Default::default()
        };

        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            healthcheck: Some(HealthConfig {
                test: Some(spec.readiness_cmd.clone()),
                interval: Some(spec.probe.interval.as_nanos() as i64),
                timeout: Some(spec.probe.timeout.as_nanos() as i64),
                retries: Some(spec.probe.retries as i64),
                start_period: Some(spec.probe.start_period.as_nanos() as i64),
                ..Default::default()
            }),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: spec.name.as_str(),
                    ..Default::default()
                }),
                config,
            )
            .await?;

        info!(name = %spec.name, container_id = %response.id, "container created");
        Ok(response.id)
    }

    async fn container_start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<bollard::container::StartContainerOptions<String>>)
            .await?;
        debug!(container_id = id, "container started");
        Ok(())
    }

    async fn container_stop(&self, id: &str, grace: Duration) -> Result<()> {
        self.docker
            .stop_container(
                id,
                Some(bollard::container::StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await?;
        debug!(container_id = id, "container stopped");
        Ok(())
    }

    async fn container_remove(&self, id: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(bollard::container::RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        debug!(container_id = id, "container removed");
        Ok(())
    }

    async fn container_inspect(&self, id: &str) -> Result<InspectReport> {
        let inspect = self
            .docker
            .inspect_container(
                id,
                None::<bollard::container::InspectContainerOptions>,
            )
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => Error::NotFound(id.to_string()),
                e => Error::Api(e),
            })?;

        let Some(state) = inspect.state else {
            return Ok(InspectReport::not_running());
        };

        let running = state.running.unwrap_or(false);
        let (readiness, readiness_log_tail) = match state.health {
            Some(health) => {
                let tail = health
                    .log
                    .as_ref()
                    .and_then(|entries| entries.last())
                    .and_then(|entry| entry.output.clone());
                let readiness = match health.status {
                    Some(HealthStatusEnum::HEALTHY) => Some(ReadinessState::Healthy),
                    Some(HealthStatusEnum::UNHEALTHY) => Some(ReadinessState::Unhealthy),
                    Some(HealthStatusEnum::STARTING) => Some(ReadinessState::Starting),
                    _ => None,
                };
                (readiness, tail)
            }
            None => (None, None),
        };

        Ok(InspectReport {
            running,
            readiness,
            readiness_log_tail,
        })
    }

    async fn container_list(
        &self,
        label_filters: &[(String, String)],
    ) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            label_filters
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>(),
        );

        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                labels: c.labels.unwrap_or_default(),
                state: c
                    .state
                    .map(|s| s.to_string().to_lowercase())
                    .unwrap_or_default(),
                created_unix: c.created.unwrap_or(0),
            })
            .collect())
    }

    async fn container_logs(&self, id: &str, tail: usize) -> Result<String> {
        let mut stream = self.docker.logs(
            id,
            Some(bollard::container::LogsOptions {
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(result) = stream.next().await {
            output.push_str(&result?.to_string());
        }

        Ok(output)
    }
}
