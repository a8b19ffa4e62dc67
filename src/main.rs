use clap::Parser;

use dev_db_mcp::cli::{self, Cli};
use dev_db_mcp::logging;

#[tokio::main]
async fn main() {
    logging::init_from_env();

    let cli = Cli::parse();
    if let Err(e) = cli::run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
