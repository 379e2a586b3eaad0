//! Defines the global AWS clients and their service implementations.

use crate::service::{
    ServerUpdate, StackDescription, StackManager, StackRequest, TransferService,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::{from_env, SdkConfig};
use aws_sdk_cloudformation::types::{Capability, Parameter};
use once_cell::sync::OnceCell;
use std::env;

#[async_trait]
impl StackManager for aws_sdk_cloudformation::Client {
    async fn create_stack(&self, request: &StackRequest) -> Result<String> {
        let response = self
            .create_stack()
            .stack_name(&request.stack_name)
            .template_url(&request.template_url)
            .set_parameters(Some(
                request
                    .parameters
                    .iter()
                    .map(|(key, value)| {
                        Parameter::builder()
                            .parameter_key(key)
                            .parameter_value(value)
                            .build()
                    })
                    .collect(),
            ))
            .timeout_in_minutes(request.timeout_in_minutes)
            .set_capabilities(Some(
                request
                    .capabilities
                    .iter()
                    .map(|capability| Capability::from(capability.as_str()))
                    .collect(),
            ))
            .send()
            .await
            .with_context(|| format!("Failed to create stack {:?}", request.stack_name))?;
        Ok(response.stack_id().unwrap_or_default().to_string())
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription> {
        let response = self
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .with_context(|| format!("Failed to describe stack {:?}", stack_name))?;
        let Some(stack) = response.stacks().unwrap_or_default().first() else {
            return Ok(StackDescription::default());
        };
        Ok(StackDescription {
            status: stack.stack_status().map(|s| s.as_str().to_string()),
            outputs: stack
                .outputs()
                .unwrap_or_default()
                .iter()
                .filter_map(|o| {
                    let value = o.output_value().unwrap_or_default();
                    o.output_key()
                        .map(|key| (key.to_string(), value.to_string()))
                })
                .collect(),
        })
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        self.delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .with_context(|| format!("Failed to delete stack {:?}", stack_name))?;
        Ok(())
    }
}

#[async_trait]
impl TransferService for aws_sdk_transfer::Client {
    async fn update_server(&self, server_id: &str, host_key: &str) -> Result<ServerUpdate> {
        let response = self
            .update_server()
            .server_id(server_id)
            .host_key(host_key)
            .send()
            .await
            .with_context(|| format!("Failed to update host key of server {:?}", server_id))?;
        Ok(ServerUpdate {
            server_id: response.server_id().unwrap_or(server_id).to_string(),
        })
    }
}

/// The AWS clients used by the handlers, sharing one configuration.
pub struct Clients {
    pub cloudformation: aws_sdk_cloudformation::Client,
    pub transfer: aws_sdk_transfer::Client,
    pub lambda: aws_sdk_lambda::Client,
}

/// Global clients instance.
static CURRENT: OnceCell<Clients> = OnceCell::new();

/// Prefix an endpoint with `https://` unless it already names a
/// scheme.
fn endpoint_url(raw: String) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw
    } else {
        format!("https://{}", raw)
    }
}

/// Load the shared AWS configuration, honouring `AWS_ENDPOINT_URL`.
async fn load_config() -> SdkConfig {
    if let Ok(raw) = env::var("AWS_ENDPOINT_URL") {
        from_env()
            .endpoint_url(endpoint_url(raw))
            .region("us-east-1") // should be OK since the endpoint was overridden
            .load()
            .await
    } else {
        from_env().load().await
    }
}

/// Build a standalone Lambda client, for functions that only need to
/// reach the notification relay.
pub async fn lambda() -> aws_sdk_lambda::Client {
    aws_sdk_lambda::Client::new(&load_config().await)
}

/// Initialize the global AWS clients.
pub async fn init() -> Result<()> {
    let config = load_config().await;
    let clients = Clients {
        cloudformation: aws_sdk_cloudformation::Client::new(&config),
        transfer: aws_sdk_transfer::Client::new(&config),
        lambda: aws_sdk_lambda::Client::new(&config),
    };
    CURRENT
        .set(clients)
        .map_err(|_| anyhow!("client::CURRENT was already initialized"))
}

/// Get the current AWS clients, or panic if they haven't been
/// initialized.
pub fn current() -> &'static Clients {
    CURRENT.get().expect("client is not initialized")
}
