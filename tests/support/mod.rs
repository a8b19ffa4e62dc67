//! In-memory container runtime for lifecycle tests.
//!
//! Simulates the small slice of runtime behavior the engine depends on:
//! labeled containers, readiness probe progression, label-filtered
//! listings, and injectable failures for each lifecycle step.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use dev_db_mcp::error::{Error, Result};
use dev_db_mcp::runtime::{
    ContainerSpec, ContainerSummary, InspectReport, ReadinessState, Runtime,
};
use dev_db_mcp::types::{format_created_at, labels};

/// How a fake container's readiness probe behaves over successive
/// inspects.
#[derive(Debug, Clone, Copy)]
pub enum ReadinessScript {
    /// Report `starting` for the first `n` inspects, then `healthy`.
    HealthyAfter(u32),
    /// Report `starting` forever.
    NeverHealthy,
    /// Report `unhealthy` immediately.
    Unhealthy,
    /// No probe configured at all.
    NoProbe,
}

#[derive(Debug)]
struct FakeContainer {
    name: String,
    labels: HashMap<String, String>,
    running: bool,
    created_unix: i64,
    inspects: u32,
    script: ReadinessScript,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    next_id: u64,
}

/// Runtime double backed by a hash map of containers.
pub struct FakeRuntime {
    state: Mutex<State>,
    script: Mutex<ReadinessScript>,
    pub fail_ping: AtomicBool,
    pub fail_pull: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_remove: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            script: Mutex::new(ReadinessScript::HealthyAfter(1)),
            fail_ping: AtomicBool::new(false),
            fail_pull: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
        }
    }

    /// Readiness behavior applied to containers created after this call.
    pub fn set_readiness(&self, script: ReadinessScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Labels of a container, for asserting the persisted projection.
    pub fn container_labels(&self, container_id: &str) -> Option<HashMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(container_id)
            .map(|c| c.labels.clone())
    }

    /// Simulate the container dying outside the server's control.
    pub fn kill_container(&self, container_id: &str) {
        if let Some(container) = self
            .state
            .lock()
            .unwrap()
            .containers
            .get_mut(container_id)
        {
            container.running = false;
        }
    }

    /// Simulate the container being removed outside the server's control.
    pub fn remove_container_externally(&self, container_id: &str) {
        self.state.lock().unwrap().containers.remove(container_id);
    }

    /// Insert a container as if it had been created by an earlier server
    /// process: fully labeled, with no in-process state anywhere.
    pub fn seed_container(&self, kind: &str, instance_id: &str, port: u16, running: bool) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container_id = format!("{:064x}", state.next_id);

        let mut container_labels = HashMap::new();
        container_labels.insert(labels::MANAGED.to_string(), "true".to_string());
        container_labels.insert(labels::KIND.to_string(), kind.to_string());
        container_labels.insert(labels::INSTANCE_ID.to_string(), instance_id.to_string());
        container_labels.insert(labels::DATABASE.to_string(), "seeded".to_string());
        container_labels.insert(labels::USER.to_string(), "seeder".to_string());
        container_labels.insert(labels::VERSION.to_string(), "1".to_string());
        container_labels.insert(labels::PORT.to_string(), port.to_string());
        container_labels.insert(
            labels::CREATED_AT.to_string(),
            format_created_at(Utc::now()),
        );

        state.containers.insert(
            container_id.clone(),
            FakeContainer {
                name: format!("dev-{}-mcp-{}", kind, instance_id),
                labels: container_labels,
                running,
                created_unix: Utc::now().timestamp(),
                inspects: 0,
                script: ReadinessScript::HealthyAfter(0),
            },
        );
        container_id
    }

    fn injected_failure(what: &str) -> Error {
        Error::Io(std::io::Error::other(format!("{what} failure injected")))
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(Error::RuntimeUnavailable("ping failure injected".to_string()));
        }
        Ok(())
    }

    async fn image_present(&self, image: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn image_pull(&self, image: &str) -> Result<()> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(Error::ImageUnavailable {
                image: image.to_string(),
                reason: "pull failure injected".to_string(),
            });
        }
        self.state.lock().unwrap().images.insert(image.to_string());
        Ok(())
    }

    async fn container_create(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let container_id = format!("{:064x}", state.next_id);
        let script = *self.script.lock().unwrap();

        state.containers.insert(
            container_id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                labels: spec.labels.clone(),
                running: false,
                created_unix: Utc::now().timestamp(),
                inspects: 0,
                script,
            },
        );
        Ok(container_id)
    }

    async fn container_start(&self, id: &str) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Self::injected_failure("start"));
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn container_stop(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn container_remove(&self, id: &str, _force: bool) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Self::injected_failure("remove"));
        }
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(())
    }

    async fn container_inspect(&self, id: &str) -> Result<InspectReport> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        container.inspects += 1;

        let readiness = match container.script {
            ReadinessScript::HealthyAfter(n) => {
                if container.inspects > n {
                    Some(ReadinessState::Healthy)
                } else {
                    Some(ReadinessState::Starting)
                }
            }
            ReadinessScript::NeverHealthy => Some(ReadinessState::Starting),
            ReadinessScript::Unhealthy => Some(ReadinessState::Unhealthy),
            ReadinessScript::NoProbe => None,
        };

        Ok(InspectReport {
            running: container.running,
            readiness,
            readiness_log_tail: None,
        })
    }

    async fn container_list(
        &self,
        label_filters: &[(String, String)],
    ) -> Result<Vec<ContainerSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| {
                label_filters
                    .iter()
                    .all(|(key, value)| c.labels.get(key) == Some(value))
            })
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                names: vec![c.name.clone()],
                labels: c.labels.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
                created_unix: c.created_unix,
            })
            .collect())
    }

    async fn container_logs(&self, _id: &str, _tail: usize) -> Result<String> {
        Ok("database startup log tail".to_string())
    }
}
