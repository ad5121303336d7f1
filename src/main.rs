use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqs_local::registry::SqsService;
use sqs_local::server;

#[derive(Parser)]
#[command(name = "sqs-local", about = "Local in-memory Amazon SQS service")]
struct Args {
    #[arg(long, default_value = "9324", env = "SQS_LOCAL_PORT")]
    port: u16,
    #[arg(long, default_value = "us-east-1", env = "SQS_LOCAL_REGION")]
    region: String,
    #[arg(long, default_value = "000000000000", env = "SQS_LOCAL_ACCOUNT_ID")]
    account_id: String,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SQS_LOCAL_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sqs_local={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(SqsService::new(args.account_id, args.region, args.port));
    let app = server::create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    info!(port = args.port, "sqs-local listening");
    axum::serve(listener, app).await?;

    Ok(())
}
