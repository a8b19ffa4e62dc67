//! Per-kind instance lifecycle engine.
//!
//! One engine exists per database kind. It owns the create flow (port
//! allocation, image pull, container provisioning, readiness wait, and
//! rollback on every failure path), reconstructs instances from container
//! labels so that list/get/drop survive process restarts, and resolves
//! user-supplied partial ids.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::health::{self, HealthResult};
use crate::ports::PortAllocator;
use crate::profile::Profile;
use crate::runtime::{ContainerSpec, ContainerSummary, ReadinessState, Runtime};
use crate::types::{
    container_name, format_created_at, generate_instance_id, labels, parse_created_at, Instance,
    InstanceStatus, Kind, ResolvedOptions, MASKED_PASSWORD,
};

/// Tunable timings for the engine. Defaults are production values; tests
/// shrink them to millisecond scale.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overall budget for the readiness wait.
    pub readiness_timeout: Duration,
    /// Inspect polling interval during the readiness wait.
    pub readiness_poll: Duration,
    /// Grace applied before declaring a probe-less container ready.
    pub settle_delay: Duration,
    /// Grace given to a container on stop.
    pub stop_grace: Duration,
    /// Number of log lines attached to readiness failures.
    pub log_tail: usize,
    /// Whether PostgreSQL health checks may open a SQL connection when
    /// the instance password is known.
    pub sql_probe: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(60),
            readiness_poll: Duration::from_secs(2),
            settle_delay: Duration::from_secs(5),
            stop_grace: Duration::from_secs(10),
            log_tail: 50,
            sql_probe: true,
        }
    }
}

/// Lifecycle engine for one database kind.
pub struct InstanceEngine {
    profile: &'static Profile,
    runtime: Arc<dyn Runtime>,
    ports: Arc<PortAllocator>,
    config: EngineConfig,
    /// In-process cache. Truth lives in container labels; this exists for
    /// exact-id fast paths and to retain passwords of instances created
    /// in this process.
    instances: RwLock<HashMap<String, Instance>>,
}

impl InstanceEngine {
    pub fn new(
        kind: Kind,
        runtime: Arc<dyn Runtime>,
        ports: Arc<PortAllocator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            profile: Profile::for_kind(kind),
            runtime,
            ports,
            config,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// The kind this engine manages.
    pub fn kind(&self) -> Kind {
        self.profile.kind
    }

    /// Create a new database instance.
    ///
    /// The port is allocated up front and released on every failure path;
    /// a container that was created but never became ready is removed.
    /// The same rollback runs when the operation is cancelled.
    pub async fn create(
        &self,
        opts: ResolvedOptions,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        self.runtime.ping().await?;

        let id = generate_instance_id();
        info!(
            kind = %self.profile.kind,
            instance_id = %id,
            version = %opts.version,
            database = %opts.database,
            user = %opts.user,
            "creating database instance"
        );

        let host_port = self.ports.allocate()?;

        match self.provision(&id, &opts, host_port, cancel).await {
            Ok(instance) => {
                self.instances
                    .write()
                    .await
                    .insert(id.clone(), instance.clone());
                info!(
                    kind = %self.profile.kind,
                    instance_id = %id,
                    host_port,
                    "database instance created"
                );
                Ok(instance)
            }
            Err(e) => {
                self.ports.release(host_port);
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        id: &str,
        opts: &ResolvedOptions,
        host_port: u16,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let image = self.profile.image_ref(&opts.version);
        self.ensure_image(&image).await?;

        let created_at = Utc::now();
        let spec = self.container_spec(id, opts, host_port, created_at);

        let container_id = self
            .runtime
            .container_create(&spec)
            .await
            .map_err(|e| Error::ContainerCreateFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self.start_and_wait(&container_id, id, cancel).await {
            if let Err(remove_err) = self.runtime.container_remove(&container_id, true).await {
                warn!(
                    instance_id = %id,
                    container_id = %container_id,
                    error = %remove_err,
                    "failed to remove container while rolling back"
                );
            }
            return Err(e);
        }

        Ok(Instance {
            id: id.to_string(),
            kind: self.profile.kind,
            container_id,
            host_port,
            database: opts.database.clone(),
            user: opts.user.clone(),
            password: opts.password.clone(),
            version: opts.version.clone(),
            dsn: self
                .profile
                .dsn(&opts.user, &opts.password, host_port, &opts.database),
            created_at,
            status: InstanceStatus::Running,
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        let present = self
            .runtime
            .image_present(image)
            .await
            .map_err(|e| Error::ImageUnavailable {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        if present {
            debug!(image, "image already present");
            return Ok(());
        }

        self.runtime.image_pull(image).await.map_err(|e| match e {
            Error::ImageUnavailable { .. } => e,
            other => Error::ImageUnavailable {
                image: image.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn container_spec(
        &self,
        id: &str,
        opts: &ResolvedOptions,
        host_port: u16,
        created_at: DateTime<Utc>,
    ) -> ContainerSpec {
        let mut container_labels = HashMap::new();
        container_labels.insert(labels::MANAGED.to_string(), "true".to_string());
        container_labels.insert(
            labels::KIND.to_string(),
            self.profile.kind.as_str().to_string(),
        );
        container_labels.insert(labels::INSTANCE_ID.to_string(), id.to_string());
        container_labels.insert(labels::DATABASE.to_string(), opts.database.clone());
        container_labels.insert(labels::USER.to_string(), opts.user.clone());
        container_labels.insert(labels::VERSION.to_string(), opts.version.clone());
        container_labels.insert(labels::PORT.to_string(), host_port.to_string());
        container_labels.insert(
            labels::CREATED_AT.to_string(),
            format_created_at(created_at),
        );

        ContainerSpec {
            image: self.profile.image_ref(&opts.version),
            name: container_name(self.profile.kind, id),
            env: self
                .profile
                .render_env(&opts.database, &opts.user, &opts.password),
            labels: container_labels,
            internal_port: self.profile.internal_port.to_string(),
            host_port,
            readiness_cmd: self
                .profile
                .render_readiness(&opts.database, &opts.user, &opts.password),
            probe: Default::default(),
        }
    }

    async fn start_and_wait(
        &self,
        container_id: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.runtime
            .container_start(container_id)
            .await
            .map_err(|e| Error::ContainerStartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        self.wait_ready(container_id, id, cancel).await
    }

    /// Poll the container's readiness probe until it turns healthy.
    async fn wait_ready(
        &self,
        container_id: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(
            kind = %self.profile.kind,
            instance_id = %id,
            container_id,
            "waiting for database container to become ready"
        );

        let wait = async {
            let mut ticker = tokio::time::interval(self.config.readiness_poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = ticker.tick() => {}
                }

                let report = self.runtime.container_inspect(container_id).await?;

                if !report.running {
                    let tail = self.log_tail(container_id).await;
                    return Err(Error::ReadinessFailed {
                        id: id.to_string(),
                        log_tail: if tail.is_empty() {
                            "container exited during startup".to_string()
                        } else {
                            tail
                        },
                    });
                }

                match report.readiness {
                    Some(ReadinessState::Healthy) => return Ok(()),
                    Some(ReadinessState::Starting) => {
                        debug!(container_id, "container still starting");
                    }
                    Some(ReadinessState::Unhealthy) => {
                        let tail = self.log_tail(container_id).await;
                        return Err(Error::ReadinessFailed {
                            id: id.to_string(),
                            log_tail: tail,
                        });
                    }
                    None => {
                        // No probe configured. Database images always carry
                        // one, so this is a fallback for foreign images.
                        warn!(
                            container_id,
                            "container has no readiness probe, assuming ready after settle delay"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(Error::Cancelled),
                            _ = tokio::time::sleep(self.config.settle_delay) => {}
                        }
                        return Ok(());
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.readiness_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::ReadinessTimeout {
                id: id.to_string(),
                waited_secs: self.config.readiness_timeout.as_secs(),
            }),
        }
    }

    async fn log_tail(&self, container_id: &str) -> String {
        self.runtime
            .container_logs(container_id, self.config.log_tail)
            .await
            .unwrap_or_default()
            .trim_end()
            .to_string()
    }

    /// List all instances of this kind, reconstructed from container
    /// labels. Works without any in-process state.
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Instance>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let filters = vec![
            (labels::MANAGED.to_string(), "true".to_string()),
            (
                labels::KIND.to_string(),
                self.profile.kind.as_str().to_string(),
            ),
        ];
        let summaries = self.runtime.container_list(&filters).await?;

        let mut instances = Vec::with_capacity(summaries.len());
        for summary in &summaries {
            if let Some(instance) = self.reconstruct(summary).await {
                instances.push(instance);
            }
        }

        // Replace the cache wholesale, but keep passwords of instances
        // created in this process so health checks stay fully functional.
        let mut cache = self.instances.write().await;
        let previous = std::mem::take(&mut *cache);
        for instance in &instances {
            let mut entry = instance.clone();
            if let Some(known) = previous.get(&entry.id) {
                if known.password != MASKED_PASSWORD {
                    entry.password = known.password.clone();
                    entry.dsn = known.dsn.clone();
                }
            }
            cache.insert(entry.id.clone(), entry);
        }

        Ok(instances)
    }

    /// Rebuild an instance from a container's labels. Containers with a
    /// missing or malformed `instance-id` or `port` label are skipped.
    async fn reconstruct(&self, summary: &ContainerSummary) -> Option<Instance> {
        let id = summary.labels.get(labels::INSTANCE_ID)?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            warn!(
                container_id = %summary.id,
                "skipping container with malformed instance-id label"
            );
            return None;
        }

        let host_port: u16 = match summary.labels.get(labels::PORT).map(|p| p.parse()) {
            Some(Ok(port)) => port,
            _ => {
                warn!(
                    container_id = %summary.id,
                    instance_id = %id,
                    "skipping container with malformed port label"
                );
                return None;
            }
        };

        let database = summary
            .labels
            .get(labels::DATABASE)
            .cloned()
            .unwrap_or_default();
        let user = summary.labels.get(labels::USER).cloned().unwrap_or_default();
        let version = summary
            .labels
            .get(labels::VERSION)
            .cloned()
            .unwrap_or_default();

        let created_at = summary
            .labels
            .get(labels::CREATED_AT)
            .and_then(|v| parse_created_at(v))
            .or_else(|| DateTime::<Utc>::from_timestamp(summary.created_unix, 0))
            .unwrap_or_else(Utc::now);

        let status = self.summary_status(summary).await;

        // The password is never persisted in labels.
        Some(Instance {
            id: id.clone(),
            kind: self.profile.kind,
            container_id: summary.id.clone(),
            host_port,
            database: database.clone(),
            user: user.clone(),
            password: MASKED_PASSWORD.to_string(),
            version,
            dsn: self
                .profile
                .dsn(&user, MASKED_PASSWORD, host_port, &database),
            created_at,
            status,
        })
    }

    /// Project a listing entry's runtime state onto an instance status,
    /// refining running containers with their probe state.
    async fn summary_status(&self, summary: &ContainerSummary) -> InstanceStatus {
        match summary.state.as_str() {
            "running" => match self.runtime.container_inspect(&summary.id).await {
                Ok(report) if report.running => match report.readiness {
                    Some(ReadinessState::Unhealthy) => InstanceStatus::Unhealthy,
                    Some(ReadinessState::Starting) => InstanceStatus::Starting,
                    Some(ReadinessState::Healthy) | None => InstanceStatus::Running,
                },
                Ok(_) => InstanceStatus::Stopped,
                Err(_) => InstanceStatus::Unknown,
            },
            "" => InstanceStatus::Unknown,
            _ => InstanceStatus::Stopped,
        }
    }

    /// Current status of a known container.
    async fn container_status(&self, container_id: &str) -> InstanceStatus {
        match self.runtime.container_inspect(container_id).await {
            Ok(report) if !report.running => InstanceStatus::Stopped,
            Ok(report) => match report.readiness {
                Some(ReadinessState::Unhealthy) => InstanceStatus::Unhealthy,
                Some(ReadinessState::Starting) => InstanceStatus::Starting,
                Some(ReadinessState::Healthy) | None => InstanceStatus::Running,
            },
            Err(e) => {
                warn!(container_id, error = %e, "failed to inspect container");
                InstanceStatus::Unknown
            }
        }
    }

    /// Resolve an instance by exact id or unique prefix.
    ///
    /// An exact id match always wins over prefix matches. Multiple prefix
    /// matches are reported as ambiguous with candidate prefixes.
    pub async fn get(&self, id_or_prefix: &str, cancel: &CancellationToken) -> Result<Instance> {
        if id_or_prefix.is_empty() {
            return Err(Error::InvalidOption(
                "instance id must not be empty".to_string(),
            ));
        }

        let cached = self.instances.read().await.get(id_or_prefix).cloned();
        if let Some(mut refreshed) = cached {
            refreshed.status = self.container_status(&refreshed.container_id).await;
            return Ok(refreshed);
        }

        let all = self.list(cancel).await?;

        let exact: Vec<&Instance> = all.iter().filter(|i| i.id == id_or_prefix).collect();
        let matches: Vec<&Instance> = if exact.is_empty() {
            all.iter()
                .filter(|i| i.id.starts_with(id_or_prefix))
                .collect()
        } else {
            exact
        };

        match matches.len() {
            0 => Err(Error::NotFound(id_or_prefix.to_string())),
            1 => {
                let instance = matches[0].clone();
                self.instances
                    .write()
                    .await
                    .insert(instance.id.clone(), instance.clone());
                Ok(instance)
            }
            _ => Err(Error::Ambiguous {
                id: id_or_prefix.to_string(),
                candidates: matches
                    .iter()
                    .map(|i| i.id.chars().take(12).collect())
                    .collect(),
            }),
        }
    }

    /// Tear down an instance: stop, remove, release the port, evict the
    /// cache entry. Returns the dropped instance's metadata.
    pub async fn drop_instance(
        &self,
        id_or_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        let instance = self.get(id_or_prefix, cancel).await?;

        info!(
            kind = %self.profile.kind,
            instance_id = %instance.id,
            "dropping database instance"
        );

        if let Err(e) = self
            .runtime
            .container_stop(&instance.container_id, self.config.stop_grace)
            .await
        {
            warn!(
                instance_id = %instance.id,
                error = %e,
                "failed to stop container, removing anyway"
            );
        }

        // On removal failure the cache entry stays so the caller can retry.
        self.runtime
            .container_remove(&instance.container_id, true)
            .await
            .map_err(|e| Error::RemoveFailed {
                id: instance.id.clone(),
                reason: e.to_string(),
            })?;

        self.ports.release(instance.host_port);
        self.instances.write().await.remove(&instance.id);

        info!(
            kind = %self.profile.kind,
            instance_id = %instance.id,
            host_port = instance.host_port,
            "database instance dropped"
        );
        Ok(instance)
    }

    /// Check the health of an instance.
    ///
    /// Reports the runtime probe state. For PostgreSQL instances whose
    /// password is known in this process, additionally verifies the
    /// database end to end with a SQL connection.
    pub async fn health_check(
        &self,
        id_or_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<HealthResult> {
        let instance = self.get(id_or_prefix, cancel).await?;

        let start = Instant::now();
        let mut status = self.container_status(&instance.container_id).await;
        let mut message = match status {
            InstanceStatus::Running => {
                format!("{} instance is running and healthy", self.profile.kind)
            }
            InstanceStatus::Starting => {
                format!("{} instance is starting up", self.profile.kind)
            }
            InstanceStatus::Unhealthy => {
                format!("{} instance is unhealthy", self.profile.kind)
            }
            InstanceStatus::Stopped => format!("{} instance is stopped", self.profile.kind),
            InstanceStatus::Unknown => format!(
                "{} instance status could not be determined",
                self.profile.kind
            ),
        };

        if self.config.sql_probe
            && instance.kind == Kind::PostgreSql
            && status == InstanceStatus::Running
            && instance.password != MASKED_PASSWORD
        {
            match health::check_postgres_connection(&instance.dsn).await {
                Ok(()) => message = "PostgreSQL connection successful".to_string(),
                Err(e) => {
                    status = InstanceStatus::Unhealthy;
                    message = format!("PostgreSQL connection failed: {e}");
                }
            }
        }

        Ok(HealthResult::new(status, message, start.elapsed()))
    }

    /// Drop every instance of this kind. Never aborts on the first
    /// failure; all errors are collected and returned.
    pub async fn cleanup(&self, cancel: &CancellationToken) -> Vec<Error> {
        let instances = match self.list(cancel).await {
            Ok(instances) => instances,
            Err(e) => return vec![e],
        };

        let mut errors = Vec::new();
        for instance in instances {
            if let Err(e) = self.drop_instance(&instance.id, cancel).await {
                error!(
                    kind = %self.profile.kind,
                    instance_id = %instance.id,
                    error = %e,
                    "failed to clean up instance"
                );
                errors.push(e);
            }
        }
        errors
    }

    /// Number of cached instances, for status reporting.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}
