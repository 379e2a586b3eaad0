//! Defines configuration as read from the environment.

use serde::Deserialize;

/// Default `template_bucket_name` value.
fn default_template_bucket_name() -> String {
    String::from("sftp-cloudformation-template-bucket")
}

/// Default `project_name` value.
fn default_project_name() -> String {
    String::from("test-project")
}

/// Default `template_region` value.
fn default_template_region() -> String {
    String::from("eu-west-1")
}

/// Default `template_file` value.
fn default_template_file() -> String {
    String::from("sftp-server.yaml")
}

/// Default `stack_timeout_minutes` value.
fn default_stack_timeout_minutes() -> i32 {
    10
}

/// Default `poll_interval_seconds` value.
fn default_poll_interval_seconds() -> u64 {
    10
}

/// The SFTP lifecycle function creates and deletes the stack holding
/// the SFTP server. The configuration must be given as environment
/// variables, and most of it is forwarded verbatim as stack
/// parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSettings {
    /// The bucket the SFTP users upload into.
    pub s3_bucket: String,

    /// The role assumed by the transfer service on behalf of SFTP
    /// users.
    pub user_role_arn: String,

    pub vpc_id: String,

    /// The public subnet the server endpoint is placed in.
    pub subnet_id: String,

    pub subnet_cidr: String,

    /// Allocation id of the elastic IP attached to the server
    /// endpoint.
    pub ip_allocation_id: String,

    /// The elastic IP address itself.
    pub ip_address: String,

    /// Name of the secret holding the project credentials, read by
    /// the stack template.
    pub secret_name: String,

    /// Host key material installed on the server once it's created,
    /// so that clients see the same identity on every start.
    pub sftp_key: String,

    /// Bucket holding the stack template.
    #[serde(default = "default_template_bucket_name")]
    pub template_bucket_name: String,

    /// Project name, used to derive the stack name.
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Region of the template bucket, as it appears in the template
    /// URL.
    #[serde(default = "default_template_region")]
    pub template_region: String,

    /// Key of the stack template within the template bucket.
    #[serde(default = "default_template_file")]
    pub template_file: String,

    /// Creation timeout handed to the stack manager. The function's
    /// own invocation timeout must exceed it, since the start action
    /// waits for stack creation to finish.
    #[serde(default = "default_stack_timeout_minutes")]
    pub stack_timeout_minutes: i32,

    /// Seconds to sleep between stack status queries.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

/// Settings for the bucket event function.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadSettings {
    /// Announce every uploaded object through the notifier. When off,
    /// events are only extracted and logged.
    #[serde(default)]
    pub notify_on_upload: bool,
}

/// Selects where notifications are delivered. A webhook takes
/// precedence over a relay function; with neither, notifications are
/// only logged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySettings {
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    /// Name of a Lambda function relaying notifications to Slack.
    #[serde(default)]
    pub slack_alert_name: Option<String>,
}
