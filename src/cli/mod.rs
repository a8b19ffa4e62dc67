//! Command-line interface.
//!
//! A thin shell over the same registry the MCP server uses; there is no
//! separate code path for CLI operations.

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::ports::PortAllocator;
use crate::registry::Registry;
use crate::runtime::{DockerRuntime, Runtime};
use crate::types::{Instance, Kind};

const DEFAULT_START_PORT: u16 = 15432;
const DEFAULT_END_PORT: u16 = 25432;

#[derive(Debug, Parser)]
#[command(name = "dev-db-mcp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP server for managing ephemeral database instances in containers")]
#[command(long_about = "dev-db-mcp creates, inspects and destroys ephemeral PostgreSQL, MySQL \
and MariaDB instances running in local containers. Instances are bound to 127.0.0.1 on \
dynamically allocated ports and can be managed over the Model Context Protocol or from \
this command line.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Database instance management commands
    #[command(alias = "db")]
    Database {
        #[command(subcommand)]
        command: DatabaseCommand,
    },
    /// MCP server commands
    Mcp {
        #[command(subcommand)]
        command: McpCommand,
    },
    /// Print version information
    Version,
}

#[derive(Debug, Subcommand)]
pub enum DatabaseCommand {
    /// List all running database instances
    List {
        /// Filter by database kind (postgresql, mysql, mariadb)
        #[arg(long)]
        kind: Option<String>,
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
        /// Start of the host port range for database instances
        #[arg(long = "start-port", default_value_t = DEFAULT_START_PORT)]
        start_port: u16,
        /// End of the host port range for database instances
        #[arg(long = "end-port", default_value_t = DEFAULT_END_PORT)]
        end_port: u16,
    },
    /// Get details of a specific database instance
    Get {
        /// Instance id; a unique prefix is accepted
        instance_id: String,
        #[arg(long = "start-port", default_value_t = DEFAULT_START_PORT)]
        start_port: u16,
        #[arg(long = "end-port", default_value_t = DEFAULT_END_PORT)]
        end_port: u16,
    },
    /// Drop a database instance and all its data
    Drop {
        /// Instance id; a unique prefix is accepted
        instance_id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        #[arg(long = "start-port", default_value_t = DEFAULT_START_PORT)]
        start_port: u16,
        #[arg(long = "end-port", default_value_t = DEFAULT_END_PORT)]
        end_port: u16,
    },
}

#[derive(Debug, Subcommand)]
pub enum McpCommand {
    /// Start the MCP server on stdio
    Serve {
        /// Start of the host port range for database instances
        #[arg(long = "start-port", default_value_t = DEFAULT_START_PORT)]
        start_port: u16,
        /// End of the host port range for database instances
        #[arg(long = "end-port", default_value_t = DEFAULT_END_PORT)]
        end_port: u16,
    },
}

/// Execute a parsed command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Database { command } => match command {
            DatabaseCommand::List {
                kind,
                format,
                start_port,
                end_port,
            } => run_list(kind, format, start_port, end_port).await,
            DatabaseCommand::Get {
                instance_id,
                start_port,
                end_port,
            } => run_get(instance_id, start_port, end_port).await,
            DatabaseCommand::Drop {
                instance_id,
                force,
                start_port,
                end_port,
            } => run_drop(instance_id, force, start_port, end_port).await,
        },
        Command::Mcp { command } => match command {
            McpCommand::Serve {
                start_port,
                end_port,
            } => run_serve(start_port, end_port).await,
        },
        Command::Version => {
            println!("dev-db-mcp {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Connect to the container runtime and build the registry shared by all
/// command paths.
async fn build_registry(start_port: u16, end_port: u16) -> anyhow::Result<Arc<Registry>> {
    if start_port > end_port {
        anyhow::bail!("invalid port range: {start_port} > {end_port}");
    }

    let runtime = DockerRuntime::connect().await?;
    runtime.ping().await?;

    let runtime: Arc<dyn Runtime> = Arc::new(runtime);
    let ports = Arc::new(PortAllocator::new(start_port, end_port));
    Ok(Arc::new(Registry::new(runtime, ports)))
}

async fn run_serve(start_port: u16, end_port: u16) -> anyhow::Result<()> {
    let registry = build_registry(start_port, end_port).await?;
    crate::mcp::serve_stdio(registry).await
}

async fn run_list(
    kind: Option<String>,
    format: String,
    start_port: u16,
    end_port: u16,
) -> anyhow::Result<()> {
    let registry = build_registry(start_port, end_port).await?;
    let cancel = CancellationToken::new();

    let instances = match kind {
        Some(kind) => {
            let kind = Kind::from_str(&kind)?;
            registry.list_by_kind(kind, &cancel).await?
        }
        None => registry.list(&cancel).await?,
    };

    match format.as_str() {
        "json" => {
            let response = serde_json::json!({
                "count": instances.len(),
                "instances": instances,
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "table" => {
            if instances.is_empty() {
                println!("No database instances are currently running.");
                return Ok(());
            }
            print_table(&instances);
        }
        other => anyhow::bail!("unsupported format: {other} (expected table or json)"),
    }

    Ok(())
}

fn print_table(instances: &[Instance]) {
    println!(
        "{:<32}  {:<10}  {:<6}  {:<12}  {:<10}  CREATED",
        "ID", "KIND", "PORT", "DATABASE", "STATUS"
    );
    for instance in instances {
        println!(
            "{:<32}  {:<10}  {:<6}  {:<12}  {:<10}  {}",
            instance.id,
            instance.kind,
            instance.host_port,
            instance.database,
            instance.status,
            instance.created_at.to_rfc3339(),
        );
    }
}

async fn run_get(instance_id: String, start_port: u16, end_port: u16) -> anyhow::Result<()> {
    let registry = build_registry(start_port, end_port).await?;
    let instance = registry.get(&instance_id, &CancellationToken::new()).await?;
    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}

async fn run_drop(
    instance_id: String,
    force: bool,
    start_port: u16,
    end_port: u16,
) -> anyhow::Result<()> {
    let registry = build_registry(start_port, end_port).await?;
    let cancel = CancellationToken::new();

    let instance = registry.get(&instance_id, &cancel).await?;

    if !force && !confirm_drop(&instance)? {
        println!("Operation cancelled.");
        return Ok(());
    }

    let dropped = registry.drop_instance(&instance.id, &cancel).await?;
    println!(
        "Database instance {} ({}) has been dropped.",
        dropped.id, dropped.kind
    );
    Ok(())
}

fn confirm_drop(instance: &Instance) -> anyhow::Result<bool> {
    println!(
        "Are you sure you want to drop database instance {} ({})? This cannot be undone.",
        instance.id, instance.kind
    );
    println!("  Kind:     {}", instance.kind);
    println!("  Port:     {}", instance.host_port);
    println!("  Database: {}", instance.database);
    println!("  Status:   {}", instance.status);
    print!("\nType 'yes' to confirm: ");
    std::io::stdout().flush()?;

    let mut confirmation = String::new();
    std::io::stdin().read_line(&mut confirmation)?;
    Ok(confirmation.trim() == "yes")
}
