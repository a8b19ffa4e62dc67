//! Unified registry over all database kinds.
//!
//! Dispatches operations to the per-kind engines, maintains the unified
//! fast-path index used to route exact ids to their owning engine, and
//! coordinates shutdown cleanup across kinds.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::engine::{EngineConfig, InstanceEngine};
use crate::error::{Error, Result};
use crate::health::HealthResult;
use crate::ports::PortAllocator;
use crate::profile::resolve_options;
use crate::runtime::Runtime;
use crate::types::{CreateOptions, Instance, Kind};

/// Registry of database instances across every supported kind.
pub struct Registry {
    engines: Vec<InstanceEngine>,
    ports: Arc<PortAllocator>,
    /// Unified id index, refreshed by every read path. A cache only;
    /// truth lives in container labels.
    instances: RwLock<HashMap<String, Instance>>,
}

impl Registry {
    /// Build a registry with one engine per supported kind, all sharing
    /// the given runtime and port allocator.
    pub fn new(runtime: Arc<dyn Runtime>, ports: Arc<PortAllocator>) -> Self {
        Self::with_config(runtime, ports, EngineConfig::default())
    }

    /// Build a registry with custom engine timings.
    pub fn with_config(
        runtime: Arc<dyn Runtime>,
        ports: Arc<PortAllocator>,
        config: EngineConfig,
    ) -> Self {
        let engines = Kind::ALL
            .iter()
            .map(|&kind| {
                InstanceEngine::new(kind, Arc::clone(&runtime), Arc::clone(&ports), config.clone())
            })
            .collect();

        Self {
            engines,
            ports,
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn engine(&self, kind: Kind) -> &InstanceEngine {
        self.engines
            .iter()
            .find(|e| e.kind() == kind)
            .expect("engine registered for every kind")
    }

    /// The shared port allocator.
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Create a new database instance. Unset options are filled from the
    /// kind's profile; the kind itself defaults to PostgreSQL.
    pub async fn create(
        &self,
        opts: CreateOptions,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        let resolved = resolve_options(opts)?;
        let instance = self.engine(resolved.kind).create(resolved, cancel).await?;

        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance.clone());

        info!(
            instance_id = %instance.id,
            kind = %instance.kind,
            version = %instance.version,
            host_port = instance.host_port,
            "database instance registered"
        );
        Ok(instance)
    }

    /// List instances across every kind.
    ///
    /// A kind whose listing fails is logged and skipped so one broken
    /// engine cannot hide the others' instances.
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Instance>> {
        let mut all = Vec::new();
        for engine in &self.engines {
            match engine.list(cancel).await {
                Ok(instances) => all.extend(instances),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(kind = %engine.kind(), error = %e, "failed to list instances");
                }
            }
        }

        let mut index = self.instances.write().await;
        index.clear();
        for instance in &all {
            index.insert(instance.id.clone(), instance.clone());
        }

        Ok(all)
    }

    /// List instances of a single kind.
    pub async fn list_by_kind(
        &self,
        kind: Kind,
        cancel: &CancellationToken,
    ) -> Result<Vec<Instance>> {
        self.engine(kind).list(cancel).await
    }

    /// Resolve an instance by exact id or unique prefix across all kinds.
    pub async fn get(&self, id_or_prefix: &str, cancel: &CancellationToken) -> Result<Instance> {
        if id_or_prefix.is_empty() {
            return Err(Error::InvalidOption(
                "instance id must not be empty".to_string(),
            ));
        }

        // Fast path: a known exact id routes straight to its engine.
        let known_kind = self
            .instances
            .read()
            .await
            .get(id_or_prefix)
            .map(|i| i.kind);
        if let Some(kind) = known_kind {
            match self.engine(kind).get(id_or_prefix, cancel).await {
                Ok(instance) => return Ok(instance),
                Err(Error::NotFound(_)) => {
                    // Stale index entry; fall through to the full scan.
                    self.instances.write().await.remove(id_or_prefix);
                }
                Err(e) => return Err(e),
            }
        }

        // Ask every engine; a single resolution wins, several distinct
        // resolutions mean the prefix is ambiguous across kinds.
        let mut hits: Vec<Instance> = Vec::new();
        let mut ambiguous_candidates: Vec<String> = Vec::new();
        for engine in &self.engines {
            match engine.get(id_or_prefix, cancel).await {
                Ok(instance) => hits.push(instance),
                Err(Error::NotFound(_)) => {}
                Err(Error::Ambiguous { candidates, .. }) => {
                    ambiguous_candidates.extend(candidates);
                }
                Err(e) => return Err(e),
            }
        }

        if !ambiguous_candidates.is_empty() || hits.len() > 1 {
            let mut candidates: Vec<String> = hits
                .iter()
                .map(|i| i.id.chars().take(12).collect())
                .collect();
            candidates.extend(ambiguous_candidates);
            return Err(Error::Ambiguous {
                id: id_or_prefix.to_string(),
                candidates,
            });
        }

        match hits.pop() {
            Some(instance) => {
                self.instances
                    .write()
                    .await
                    .insert(instance.id.clone(), instance.clone());
                Ok(instance)
            }
            None => Err(Error::NotFound(id_or_prefix.to_string())),
        }
    }

    /// Drop an instance resolved by id or prefix. Returns the dropped
    /// instance's metadata.
    pub async fn drop_instance(
        &self,
        id_or_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        let instance = self.get(id_or_prefix, cancel).await?;
        let dropped = self
            .engine(instance.kind)
            .drop_instance(&instance.id, cancel)
            .await?;

        self.instances.write().await.remove(&dropped.id);

        info!(
            instance_id = %dropped.id,
            kind = %dropped.kind,
            "database instance dropped from registry"
        );
        Ok(dropped)
    }

    /// Health-check an instance resolved by id or prefix.
    pub async fn health_check(
        &self,
        id_or_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<HealthResult> {
        let instance = self.get(id_or_prefix, cancel).await?;
        self.engine(instance.kind)
            .health_check(&instance.id, cancel)
            .await
    }

    /// Drop every instance across every kind.
    ///
    /// Individual failures never abort the sweep; they are aggregated
    /// into a single [`Error::Cleanup`].
    pub async fn cleanup(&self, cancel: &CancellationToken) -> Result<()> {
        info!("cleaning up all database instances");

        let mut errors = Vec::new();
        for engine in &self.engines {
            errors.extend(engine.cleanup(cancel).await);
        }

        self.instances.write().await.clear();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Cleanup { errors })
        }
    }

    /// Supported kinds, in registration order.
    pub fn kinds(&self) -> Vec<Kind> {
        self.engines.iter().map(|e| e.kind()).collect()
    }
}
