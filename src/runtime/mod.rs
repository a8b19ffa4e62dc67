//! Container runtime abstraction.
//!
//! The instance engine depends on this narrow capability surface rather
//! than on a concrete client, so the lifecycle logic can be exercised
//! against an in-memory runtime in tests. The production implementation
//! is [`DockerRuntime`], backed by the bollard Docker/Podman API.

mod docker;

pub use docker::DockerRuntime;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::profile::ProbeTiming;

/// Memory cap applied to every database container (512 MiB).
pub const MEMORY_LIMIT_BYTES: i64 = 512 * 1024 * 1024;

/// CPU cap applied to every database container (1 core).
pub const NANO_CPUS: i64 = 1_000_000_000;

/// Everything needed to create one database container.
///
/// The host binding is always `127.0.0.1:<host_port>` so instances are
/// not exposed on external interfaces.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Internal container port in `port/proto` form, e.g. `5432/tcp`.
    pub internal_port: String,
    pub host_port: u16,
    /// Readiness command, including the exec form marker.
    pub readiness_cmd: Vec<String>,
    pub probe: ProbeTiming,
}

/// Readiness probe state reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Healthy,
    Unhealthy,
}

/// Structured inspect result for one container.
#[derive(Debug, Clone, Default)]
pub struct InspectReport {
    pub running: bool,
    /// Probe state; `None` when the container has no readiness probe.
    pub readiness: Option<ReadinessState>,
    /// Output of the most recent probe execution, when available.
    pub readiness_log_tail: Option<String>,
}

impl InspectReport {
    /// Report for a container that has no readiness state at all.
    pub fn not_running() -> Self {
        Self::default()
    }
}

/// Summary entry from a label-filtered container listing.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Lowercase runtime state, e.g. `running`, `exited`.
    pub state: String,
    /// Creation time as a unix timestamp.
    pub created_unix: i64,
}

/// Capability surface the instance engine needs from a container runtime.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Check that the runtime daemon is reachable.
    async fn ping(&self) -> Result<()>;

    /// Whether an image is present locally.
    async fn image_present(&self, image: &str) -> Result<bool>;

    /// Pull an image from its registry.
    async fn image_pull(&self, image: &str) -> Result<()>;

    /// Create a container from the spec. Returns the container id.
    async fn container_create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a created container.
    async fn container_start(&self, id: &str) -> Result<()>;

    /// Stop a container, giving it `grace` to shut down.
    async fn container_stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a container.
    async fn container_remove(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect a container's run and readiness state.
    async fn container_inspect(&self, id: &str) -> Result<InspectReport>;

    /// List containers matching every given `key=value` label filter,
    /// including stopped ones.
    async fn container_list(
        &self,
        label_filters: &[(String, String)],
    ) -> Result<Vec<ContainerSummary>>;

    /// Fetch the last `tail` log lines of a container.
    async fn container_logs(&self, id: &str, tail: usize) -> Result<String>;
}
