use anyhow::{anyhow, Result};
use lambda_runtime::{run, service_fn, LambdaEvent};
use serde_json::Value;
use sftp_switch::app::{self, Response};
use sftp_switch::{client, notify};

/// Start, stop or test the SFTP server according to the invocation's
/// action.
async fn function_handler(event: LambdaEvent<Value>) -> Result<Response> {
    let clients = client::current();
    Ok(app::current()
        .handle(
            &event.payload,
            &clients.cloudformation,
            &clients.transfer,
            notify::current(),
        )
        .await)
}

/// Run an AWS Lambda function that starts the SFTP server by creating
/// its stack, waiting for the stack to be complete, and installing the
/// server's host key; or stops it by deleting the stack. The function
/// timeout must be longer than the stack creation timeout.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;
    notify::init(&client::current().lambda)?;

    run(service_fn(function_handler))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
