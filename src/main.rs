use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use bq_tasks::cli::{self, Command};
use bq_tasks::client::BigQueryClient;
use bq_tasks::config::BqTasksConfig;
use bq_tasks::storage::StorageClient;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Reject bad usage before resolving credentials.
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        eprintln!("{}", cli::USAGE);
        return Ok(ExitCode::from(cli::EXIT_USAGE));
    };

    let config =
        BqTasksConfig::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    let client = Arc::new(BigQueryClient::from_config(&config).await?);
    let storage = Arc::new(StorageClient::new());

    let code = cli::execute(command, &config, client, storage, &mut std::io::stdout()).await?;
    Ok(ExitCode::from(code))
}
