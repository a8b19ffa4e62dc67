//! # dev-db-mcp
//!
//! An MCP (Model Context Protocol) server that creates, inspects and
//! destroys ephemeral database instances (PostgreSQL, MySQL, MariaDB)
//! running in local containers, for interactive use by AI coding
//! assistants and developer CLIs.
//!
//! ## Architecture Overview
//!
//! - **[`types`]**: database kinds, instance records, creation options,
//!   id and password generation
//! - **[`ports`]**: host port allocation from a bounded range with an
//!   OS-level bind probe
//! - **[`profile`]**: per-kind configuration (images, defaults, env and
//!   readiness templates, DSN formats)
//! - **[`runtime`]**: the container runtime capability surface and its
//!   bollard-backed Docker/Podman implementation
//! - **[`engine`]**: per-kind instance lifecycle (create with rollback,
//!   label-based discovery, readiness wait, partial-id resolution)
//! - **[`registry`]**: the unified surface over all kinds, used by both
//!   the MCP server and the CLI
//! - **[`mcp`]**: the MCP tool surface served over stdio
//! - **[`cli`]**: the command-line interface
//!
//! Instances are ephemeral by design: nothing is persisted outside the
//! containers' labels, and every instance is torn down when dropped or
//! when the server shuts down.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dev_db_mcp::ports::PortAllocator;
//! use dev_db_mcp::registry::Registry;
//! use dev_db_mcp::runtime::{DockerRuntime, Runtime};
//! use dev_db_mcp::types::CreateOptions;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime: Arc<dyn Runtime> = Arc::new(DockerRuntime::connect().await?);
//!     let ports = Arc::new(PortAllocator::new(15432, 25432));
//!     let registry = Registry::new(runtime, ports);
//!
//!     let cancel = CancellationToken::new();
//!     let instance = registry.create(CreateOptions::default(), &cancel).await?;
//!     println!("connect to {}", instance.dsn);
//!
//!     registry.drop_instance(&instance.id, &cancel).await?;
//!     Ok(())
//! }
//! ```

/// Core data types: kinds, instances, creation options, label keys.
pub mod types;

/// Error taxonomy shared by every operation.
pub mod error;

/// Host port allocation.
pub mod ports;

/// Per-kind database configuration profiles.
pub mod profile;

/// Container runtime abstraction and its Docker/Podman implementation.
pub mod runtime;

/// Per-kind instance lifecycle engine.
pub mod engine;

/// Unified registry across all database kinds.
pub mod registry;

/// Health checking.
pub mod health;

/// MCP server and tool surface.
pub mod mcp;

/// Command-line interface.
pub mod cli;

/// Logging setup from environment variables.
pub mod logging;

pub use engine::{EngineConfig, InstanceEngine};
pub use error::{Error, Result};
pub use health::HealthResult;
pub use ports::PortAllocator;
pub use profile::Profile;
pub use registry::Registry;
pub use runtime::{DockerRuntime, Runtime};
pub use types::{CreateOptions, Instance, InstanceStatus, Kind};
