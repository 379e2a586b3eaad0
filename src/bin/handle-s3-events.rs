use anyhow::{anyhow, Result};
use lambda_runtime::{run, service_fn, LambdaEvent};
use serde_json::Value;
use sftp_switch::{client, notify, upload};

/// Handle each S3 event record of the envelope.
async fn function_handler(event: LambdaEvent<Value>) -> Result<()> {
    upload::current()
        .handle(&event.payload, notify::current())
        .await;
    Ok(())
}

/// Run an AWS Lambda function that listens to S3 events from the SFTP
/// storage bucket.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    upload::init()?;
    notify::init(&client::lambda().await)?;

    run(service_fn(function_handler))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
