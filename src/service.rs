//! Defines the managed services the handlers orchestrate, as traits
//! implemented by the AWS clients in [`crate::client`].

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Everything needed to create a stack from a template stored in S3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_url: String,

    /// Ordered key/value pairs, sent as given.
    pub parameters: Vec<(String, String)>,

    pub timeout_in_minutes: i32,
    pub capabilities: Vec<String>,
}

/// The slice of a stack description the handlers look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    /// The raw stack status, or `None` if the stack doesn't exist.
    pub status: Option<String>,

    /// Stack outputs indexed by output key.
    pub outputs: BTreeMap<String, String>,
}

/// The result of updating a file-transfer server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUpdate {
    pub server_id: String,
}

/// An infrastructure stack manager.
#[async_trait]
pub trait StackManager: Send + Sync {
    /// Start creating a stack, returning its id.
    async fn create_stack(&self, request: &StackRequest) -> Result<String>;

    async fn describe_stack(&self, stack_name: &str) -> Result<StackDescription>;

    /// Start deleting a stack.
    async fn delete_stack(&self, stack_name: &str) -> Result<()>;
}

/// A managed file-transfer service.
#[async_trait]
pub trait TransferService: Send + Sync {
    /// Replace the host key of a server.
    async fn update_server(&self, server_id: &str, host_key: &str) -> Result<ServerUpdate>;
}

/// A notification relay. Delivery is best-effort: failures are logged
/// by the implementation and never reach the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);
}
