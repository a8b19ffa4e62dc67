//! MCP server exposing database instance management tools.
//!
//! Serves the Model Context Protocol over stdio. Each tool resolves to a
//! registry operation; failures are returned as tool-level error results
//! rather than protocol errors, so MCP clients can show the message.

use std::str::FromStr;
use std::sync::Arc;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::Registry;
use crate::types::{CreateOptions, Kind};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateDatabaseRequest {
    /// Database kind: postgresql, mysql or mariadb (default: postgresql)
    pub kind: Option<String>,
    /// Database server version (defaults vary by kind)
    pub version: Option<String>,
    /// Database name to create (defaults vary by kind)
    pub database: Option<String>,
    /// Database user (defaults vary by kind)
    pub user: Option<String>,
    /// Database password (auto-generated if not provided)
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDatabasesRequest {
    /// Restrict the listing to one kind: postgresql, mysql or mariadb
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetDatabaseRequest {
    /// Instance id; a unique prefix is accepted
    pub instance_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DropDatabaseRequest {
    /// Instance id; a unique prefix is accepted
    pub instance_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HealthCheckRequest {
    /// Instance id; a unique prefix is accepted
    pub instance_id: String,
}

/// MCP server over a shared instance registry.
pub struct DbServer {
    registry: Arc<Registry>,
    cancel: CancellationToken,
    tool_router: ToolRouter<Self>,
}

impl DbServer {
    pub fn new(registry: Arc<Registry>, cancel: CancellationToken) -> Self {
        Self {
            registry,
            cancel,
            tool_router: Self::tool_router(),
        }
    }

    fn parse_kind(value: Option<String>) -> Result<Option<Kind>, String> {
        match value {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => Kind::from_str(&s).map(Some).map_err(|e| e.to_string()),
        }
    }

    fn error_result(message: String) -> CallToolResult {
        CallToolResult::error(vec![Content::text(message)])
    }

    fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[tool_router]
impl DbServer {
    #[tool(
        description = "Create a new ephemeral database instance (PostgreSQL, MySQL or MariaDB) in a container. Returns the instance including its DSN and credentials. The instance is bound to 127.0.0.1 on a dynamically allocated port."
    )]
    async fn create_database_instance(
        &self,
        params: Parameters<CreateDatabaseRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;

        let kind = match Self::parse_kind(req.kind) {
            Ok(kind) => kind,
            Err(message) => return Ok(Self::error_result(message)),
        };

        let opts = CreateOptions {
            kind,
            version: req.version,
            database: req.database,
            user: req.user,
            password: req.password,
        };

        match self.registry.create(opts, &self.cancel.child_token()).await {
            Ok(instance) => Self::json_result(&instance),
            Err(e) => Ok(Self::error_result(format!(
                "Failed to create database instance: {e}"
            ))),
        }
    }

    #[tool(
        description = "List all running database instances, optionally filtered by kind. Returns a count and the instance records. Passwords of instances created before a server restart are masked."
    )]
    async fn list_database_instances(
        &self,
        params: Parameters<ListDatabasesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;

        let kind = match Self::parse_kind(req.kind) {
            Ok(kind) => kind,
            Err(message) => return Ok(Self::error_result(message)),
        };

        let cancel = self.cancel.child_token();
        let result = match kind {
            Some(kind) => self.registry.list_by_kind(kind, &cancel).await,
            None => self.registry.list(&cancel).await,
        };

        match result {
            Ok(instances) => Self::json_result(&json!({
                "count": instances.len(),
                "instances": instances,
            })),
            Err(e) => Ok(Self::error_result(format!(
                "Failed to list database instances: {e}"
            ))),
        }
    }

    #[tool(
        description = "Get details of a specific database instance by id. A unique id prefix is accepted, like with a container CLI."
    )]
    async fn get_database_instance(
        &self,
        params: Parameters<GetDatabaseRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;

        match self
            .registry
            .get(&req.instance_id, &self.cancel.child_token())
            .await
        {
            Ok(instance) => Self::json_result(&instance),
            Err(e) => Ok(Self::error_result(format!(
                "Failed to get database instance: {e}"
            ))),
        }
    }

    #[tool(
        description = "Remove a database instance and all its data. The container is stopped and removed and the allocated port is released. This action is irreversible."
    )]
    async fn drop_database_instance(
        &self,
        params: Parameters<DropDatabaseRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;

        match self
            .registry
            .drop_instance(&req.instance_id, &self.cancel.child_token())
            .await
        {
            Ok(instance) => Self::json_result(&json!({
                "message": format!(
                    "Database instance {} ({}) has been dropped and all data removed",
                    instance.id, instance.kind
                ),
                "instance_id": instance.id,
                "kind": instance.kind,
                "host_port": instance.host_port,
            })),
            Err(e) => Ok(Self::error_result(format!(
                "Failed to drop database instance: {e}"
            ))),
        }
    }

    #[tool(
        description = "Check the health of a database instance. Reports the container's readiness probe state; for PostgreSQL instances created by this server it additionally verifies the database with a SQL connection."
    )]
    async fn health_check_database(
        &self,
        params: Parameters<HealthCheckRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;

        match self
            .registry
            .health_check(&req.instance_id, &self.cancel.child_token())
            .await
        {
            Ok(health) => Self::json_result(&health),
            Err(e) => Ok(Self::error_result(format!(
                "Failed to check database health: {e}"
            ))),
        }
    }
}

#[tool_handler]
impl ServerHandler for DbServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                r#"dev-db-mcp manages ephemeral database instances in local containers.

Supported kinds: postgresql, mysql, mariadb. Instances are bound to
127.0.0.1 on a dynamically allocated port and are destroyed without a
trace when dropped.

TYPICAL WORKFLOW:
1. create_database_instance to start a database; note the returned dsn
2. connect to the dsn from your code or tests
3. health_check_database if the connection misbehaves
4. drop_database_instance when you are done

NOTES:
- instance ids can be abbreviated to any unique prefix
- passwords are never persisted; instances surviving a server restart
  report a masked password in their DSN
- all instances are removed automatically when the server shuts down"#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

/// Serve the MCP protocol over stdio until the client disconnects or the
/// process is interrupted, then tear down every managed instance.
pub async fn serve_stdio(registry: Arc<Registry>) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    info!("starting MCP server on stdio");

    let cancel = CancellationToken::new();
    let service = DbServer::new(Arc::clone(&registry), cancel.clone());
    let server = service.serve((stdin(), stdout())).await?;

    tokio::select! {
        reason = server.waiting() => {
            info!("MCP server stopped: {:?}", reason?);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    cancel.cancel();

    // Cleanup uses its own token: it must run even after cancellation.
    if let Err(e) = registry.cleanup(&CancellationToken::new()).await {
        error!(error = %e, "cleanup finished with errors");
    }

    Ok(())
}
