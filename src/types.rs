//! Core data types for database instance management.
//!
//! Defines the database kind enumeration, the instance record exposed to
//! MCP clients and the CLI, creation options, and the helpers for
//! generating instance ids and passwords.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Password placeholder used when the real password is not available in
/// memory, e.g. for instances rediscovered after a process restart.
pub const MASKED_PASSWORD: &str = "****";

/// Generated password length in characters.
pub const PASSWORD_LENGTH: usize = 16;

/// Label keys written on every managed container.
///
/// The password is deliberately never written to a label; rediscovered
/// instances carry [`MASKED_PASSWORD`] instead.
pub mod labels {
    /// Marks a container as managed by this server; always `"true"`.
    pub const MANAGED: &str = "managed";
    /// Database kind (`postgresql`, `mysql`, `mariadb`).
    pub const KIND: &str = "kind";
    /// 32-character hex instance id.
    pub const INSTANCE_ID: &str = "instance-id";
    /// Database name.
    pub const DATABASE: &str = "database";
    /// Database user.
    pub const USER: &str = "user";
    /// Database server version.
    pub const VERSION: &str = "version";
    /// Allocated host port.
    pub const PORT: &str = "port";
    /// Creation timestamp, RFC3339 UTC.
    pub const CREATED_AT: &str = "created-at";
}

/// Supported database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[serde(rename = "postgresql")]
    PostgreSql,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mariadb")]
    MariaDb,
}

impl Kind {
    /// All supported kinds, in registration order.
    pub const ALL: [Kind; 3] = [Kind::PostgreSql, Kind::MySql, Kind::MariaDb];

    /// Canonical lowercase name used in labels, DSNs and tool arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::PostgreSql => "postgresql",
            Kind::MySql => "mysql",
            Kind::MariaDb => "mariadb",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgresql" => Ok(Kind::PostgreSql),
            "mysql" => Ok(Kind::MySql),
            "mariadb" => Ok(Kind::MariaDb),
            other => Err(Error::InvalidOption(format!(
                "invalid database kind: {other} (expected postgresql, mysql or mariadb)"
            ))),
        }
    }
}

/// Lifecycle status of a database instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Unhealthy,
    Stopped,
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Unhealthy => "unhealthy",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A single database instance: one container plus its connection metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique 32-character hex identifier.
    pub id: String,
    /// Database kind.
    pub kind: Kind,
    /// Backing container id.
    pub container_id: String,
    /// Host port the database is bound to on 127.0.0.1.
    pub host_port: u16,
    /// Database name.
    pub database: String,
    /// Database user.
    pub user: String,
    /// Database password, or [`MASKED_PASSWORD`] when unknown.
    pub password: String,
    /// Database server version.
    pub version: String,
    /// Connection string targeting localhost.
    pub dsn: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Current status.
    pub status: InstanceStatus,
}

/// Options accepted by instance creation.
///
/// Unset fields are filled from the kind's profile; a missing password is
/// generated from the OS random source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Creation options after validation and defaulting.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub kind: Kind,
    pub version: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

/// Generate a new instance id: a random UUID with separators removed,
/// 32 lowercase hex characters.
pub fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate a random URL-safe password from the OS random source.
pub fn generate_password(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

/// Container name for an instance: `dev-<kind>-mcp-<id>`.
pub fn container_name(kind: Kind, instance_id: &str) -> String {
    format!("dev-{}-mcp-{}", kind, instance_id)
}

/// Format a timestamp the way it is written to the `created-at` label.
pub fn format_created_at(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a `created-at` label value.
pub fn parse_created_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
