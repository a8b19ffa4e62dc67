//! Instance health reporting.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Connection;
use tracing::debug;

use crate::types::InstanceStatus;

/// Connection budget for the SQL-level probe.
const SQL_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a health check on one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: InstanceStatus,
    pub message: String,
    /// How long the check took, human readable.
    pub duration: String,
    /// When the check completed, RFC3339 UTC.
    pub timestamp: String,
}

impl HealthResult {
    /// Build a result stamped with the current time.
    pub fn new(status: InstanceStatus, message: String, elapsed: Duration) -> Self {
        Self {
            status,
            message,
            duration: format!("{:?}", elapsed),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Verify a PostgreSQL instance end to end: open a connection to the DSN
/// and run a trivial query.
///
/// Only callable when the real password is known, i.e. for instances
/// created in this process.
pub async fn check_postgres_connection(dsn: &str) -> Result<(), String> {
    debug!("probing PostgreSQL connection");

    let probe = async {
        let mut conn = sqlx::postgres::PgConnection::connect(dsn)
            .await
            .map_err(|e| format!("failed to connect: {e}"))?;

        let result: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&mut conn)
            .await
            .map_err(|e| format!("test query failed: {e}"))?;

        let _ = conn.close().await;

        if result != 1 {
            return Err("test query returned unexpected result".to_string());
        }
        Ok(())
    };

    match tokio::time::timeout(SQL_PROBE_TIMEOUT, probe).await {
        Ok(result) => result,
        Err(_) => Err(format!(
            "connection attempt timed out after {:?}",
            SQL_PROBE_TIMEOUT
        )),
    }
}
