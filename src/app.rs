//! Defines the read-only state of the SFTP lifecycle function and the
//! start, stop and test flows it dispatches to.

use crate::conf::LifecycleSettings;
use crate::service::{Notifier, StackManager, StackRequest, TransferService};
use anyhow::{anyhow, Result};
use envy::from_env;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Stack status while creation is ongoing.
pub const CREATE_IN_PROGRESS: &str = "CREATE_IN_PROGRESS";

/// The only stack status accepted as a successful creation.
pub const CREATE_COMPLETE: &str = "CREATE_COMPLETE";

/// Stack output holding the id of the created server.
pub const SERVER_ID_OUTPUT: &str = "SFTPServerId";

/// Capability acknowledging that the stack creates named IAM
/// resources.
pub const CAPABILITY_NAMED_IAM: &str = "CAPABILITY_NAMED_IAM";

pub const TEST_MESSAGE: &str = "just testing";
pub const STARTED_MESSAGE: &str = ":sunny: *SFTP Server* is *STARTED* ";
pub const STOPPED_MESSAGE: &str = ":zzz: *SFTP Server* is *STOPPED* ";
pub const CREATION_FAILED_MESSAGE: &str = ":rotating_light: *SFTP Server* creation *FAILED*";

/// The actions understood by the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Test,
}

impl Action {
    /// Read the action from an invocation payload. The value is
    /// trimmed and lower-cased; anything else than a known action,
    /// including a missing or non-string value, yields `None`.
    pub fn from_event(event: &Value) -> Option<Self> {
        match event
            .get("action")
            .and_then(Value::as_str)?
            .trim()
            .to_lowercase()
            .as_str()
        {
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "test" => Some(Action::Test),
            _ => None,
        }
    }
}

/// The function's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl Response {
    fn new(status_code: u16, body: impl Into<String>) -> Self {
        Response {
            status_code,
            body: body.into(),
        }
    }
}

/// An App is an initialized application state, derived from
/// settings. The stack request is fixed for the lifetime of the
/// process.
pub struct App {
    /// The original settings.
    pub settings: LifecycleSettings,

    /// The request issued to create the SFTP server stack.
    pub stack_request: StackRequest,

    /// The time to wait between stack status queries.
    pub poll_interval: Duration,
}

impl App {
    /// Initialize an App instance given a settings struct. Consumes
    /// the settings struct.
    pub fn new(settings: LifecycleSettings) -> Self {
        let template_url = format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            settings.template_bucket_name, settings.template_region, settings.template_file
        );
        let parameters = [
            ("ProjectName", &settings.project_name),
            ("S3Bucket", &settings.s3_bucket),
            ("UserRoleArn", &settings.user_role_arn),
            ("VpcId", &settings.vpc_id),
            ("SubnetId", &settings.subnet_id),
            ("SubnetCidr", &settings.subnet_cidr),
            ("EIPAllocationId", &settings.ip_allocation_id),
            ("EIPAddress", &settings.ip_address),
            ("TemplateBucket", &settings.template_bucket_name),
            ("SecretName", &settings.secret_name),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .chain([(String::from("Test"), String::from("test"))])
        .collect();
        let stack_request = StackRequest {
            stack_name: format!("{}-sftp-server", settings.project_name),
            template_url,
            parameters,
            timeout_in_minutes: settings.stack_timeout_minutes,
            capabilities: vec![String::from(CAPABILITY_NAMED_IAM)],
        };
        let poll_interval = Duration::from_secs(settings.poll_interval_seconds);
        App {
            settings,
            stack_request,
            poll_interval,
        }
    }

    /// The name of the SFTP server stack.
    pub fn stack_name(&self) -> &str {
        &self.stack_request.stack_name
    }

    /// Handle an invocation. Every failure is turned into a response
    /// here; nothing is returned as an error.
    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        event: &Value,
        stack: &dyn StackManager,
        transfer: &dyn TransferService,
        notifier: &dyn Notifier,
    ) -> Response {
        let Some(action) = Action::from_event(event) else {
            warn!("Rejected invocation with action {:?}", event.get("action"));
            return Response::new(
                400,
                "Missing or wrong action (available actions are: start, stop and test)",
            );
        };
        match self.dispatch(action, stack, transfer, notifier).await {
            Ok(response) => response,
            Err(e) => {
                let description = format!("{:#}", e);
                error!("{:?} action failed: {}", action, description);
                notifier
                    .send(&format!(
                        ":rotating_light: ERROR during SFTPStartStop Lambda, error: {}",
                        description
                    ))
                    .await;
                Response::new(500, description)
            }
        }
    }

    async fn dispatch(
        &self,
        action: Action,
        stack: &dyn StackManager,
        transfer: &dyn TransferService,
        notifier: &dyn Notifier,
    ) -> Result<Response> {
        match action {
            Action::Test => {
                info!("TEST");
                notifier.send(TEST_MESSAGE).await;
                Ok(Response::new(200, "test notification sent"))
            }
            Action::Start => {
                info!("START");
                self.start(stack, transfer, notifier).await
            }
            Action::Stop => {
                info!("STOP");
                stack.delete_stack(self.stack_name()).await?;
                notifier.send(STOPPED_MESSAGE).await;
                Ok(Response::new(200, "stack deletion initiated"))
            }
        }
    }

    /// Create the server stack, wait for it, and install the host key
    /// on the new server.
    async fn start(
        &self,
        stack: &dyn StackManager,
        transfer: &dyn TransferService,
        notifier: &dyn Notifier,
    ) -> Result<Response> {
        let stack_id = stack.create_stack(&self.stack_request).await?;
        info!(stack_id = %stack_id, "Stack creation started");

        self.wait_for_creation(stack).await?;
        let description = stack.describe_stack(self.stack_name()).await?;
        if description.status.as_deref() != Some(CREATE_COMPLETE) {
            warn!("Stack creation ended with status {:?}", description.status);
            notifier.send(CREATION_FAILED_MESSAGE).await;
            return Ok(Response::new(500, "Stack creation failed"));
        }

        let server_id = description
            .outputs
            .get(SERVER_ID_OUTPUT)
            .ok_or_else(|| anyhow!("stack output {} is missing", SERVER_ID_OUTPUT))?;
        let update = transfer
            .update_server(server_id, &self.settings.sftp_key)
            .await?;
        notifier.send(STARTED_MESSAGE).await;
        Ok(Response::new(
            200,
            json!({ "ServerId": update.server_id }).to_string(),
        ))
    }

    /// Poll the stack until it leaves the creation state. There's no
    /// deadline here; the stack manager fails the creation on its own
    /// timeout. The caller describes the stack again afterwards.
    async fn wait_for_creation(&self, stack: &dyn StackManager) -> Result<()> {
        loop {
            sleep(self.poll_interval).await;
            let description = stack.describe_stack(self.stack_name()).await?;
            info!(status = ?description.status, "Polled stack");
            if description.status.as_deref() != Some(CREATE_IN_PROGRESS) {
                return Ok(());
            }
        }
    }
}

/// Global App instance.
static CURRENT: OnceCell<App> = OnceCell::new();

/// Initialize the global App instance.
pub fn init() -> Result<()> {
    let settings = from_env()?;
    CURRENT
        .set(App::new(settings))
        .map_err(|_| anyhow!("app::CURRENT was already initialized"))
}

/// Get the current App instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static App {
    CURRENT.get().expect("app is not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServerUpdate, StackDescription};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    fn settings() -> LifecycleSettings {
        LifecycleSettings {
            s3_bucket: String::from("acme-sftp-storage-bucket"),
            user_role_arn: String::from("arn:aws:iam::123456789012:role/acme-sftp-user-role"),
            vpc_id: String::from("vpc-0abc"),
            subnet_id: String::from("subnet-0abc"),
            subnet_cidr: String::from("10.0.1.0/24"),
            ip_allocation_id: String::from("eipalloc-0abc"),
            ip_address: String::from("203.0.113.7"),
            secret_name: String::from("acme-project-secrets"),
            sftp_key: String::from("host-key"),
            template_bucket_name: String::from("acme-sftp-cloudformation-template-bucket"),
            project_name: String::from("acme"),
            template_region: String::from("eu-west-1"),
            template_file: String::from("sftp-server.yaml"),
            stack_timeout_minutes: 10,
            poll_interval_seconds: 0,
        }
    }

    #[derive(Default)]
    struct FakeStack {
        /// Statuses returned by successive descriptions; the last one
        /// repeats.
        statuses: Mutex<VecDeque<&'static str>>,
        outputs: BTreeMap<String, String>,
        fail_delete: bool,
        created: Mutex<Vec<StackRequest>>,
        observed: Mutex<Vec<Option<String>>>,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeStack {
        fn with_statuses(statuses: &[&'static str]) -> Self {
            FakeStack {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                outputs: BTreeMap::from([
                    (String::from("SFTPServerId"), String::from("s-0123456789abcdef0")),
                    (String::from("Endpoint"), String::from("203.0.113.7")),
                ]),
                ..Default::default()
            }
        }

        fn observed(&self) -> Vec<Option<String>> {
            self.observed.lock().expect("poisoned mutex").clone()
        }
    }

    #[async_trait]
    impl StackManager for FakeStack {
        async fn create_stack(&self, request: &StackRequest) -> Result<String> {
            self.created
                .lock()
                .expect("poisoned mutex")
                .push(request.clone());
            Ok(format!("arn:aws:cloudformation:stack/{}", request.stack_name))
        }

        async fn describe_stack(&self, _stack_name: &str) -> Result<StackDescription> {
            let mut statuses = self.statuses.lock().expect("poisoned mutex");
            let status = if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().copied()
            }
            .map(String::from);
            self.observed
                .lock()
                .expect("poisoned mutex")
                .push(status.clone());
            Ok(StackDescription {
                status,
                outputs: self.outputs.clone(),
            })
        }

        async fn delete_stack(&self, stack_name: &str) -> Result<()> {
            if self.fail_delete {
                return Err(anyhow!("Failed to delete stack: access denied"));
            }
            self.deleted
                .lock()
                .expect("poisoned mutex")
                .push(stack_name.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTransfer {
        fail: bool,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeTransfer {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().expect("poisoned mutex").clone()
        }
    }

    #[async_trait]
    impl TransferService for FakeTransfer {
        async fn update_server(&self, server_id: &str, host_key: &str) -> Result<ServerUpdate> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push((server_id.to_string(), host_key.to_string()));
            if self.fail {
                return Err(anyhow!("invalid host key"));
            }
            Ok(ServerUpdate {
                server_id: server_id.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CapturingNotifier {
        messages: Mutex<Vec<String>>,
    }

    impl CapturingNotifier {
        fn messages(&self) -> Vec<String> {
            self.messages.lock().expect("poisoned mutex").clone()
        }
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn send(&self, message: &str) {
            self.messages
                .lock()
                .expect("poisoned mutex")
                .push(message.to_string());
        }
    }

    #[test]
    fn parses_normalized_actions() {
        assert_eq!(
            Action::from_event(&json!({"action": "  START "})),
            Some(Action::Start)
        );
        assert_eq!(Action::from_event(&json!({"action": "stop"})), Some(Action::Stop));
        assert_eq!(Action::from_event(&json!({"action": "Test"})), Some(Action::Test));
        assert_eq!(Action::from_event(&json!({"action": "restart"})), None);
        assert_eq!(Action::from_event(&json!({"action": ""})), None);
        assert_eq!(Action::from_event(&json!({"action": 1})), None);
        assert_eq!(Action::from_event(&json!({})), None);
        assert_eq!(Action::from_event(&json!("start")), None);
    }

    #[test]
    fn builds_stack_request_from_settings() {
        let app = App::new(settings());
        let request = &app.stack_request;
        assert_eq!(request.stack_name, "acme-sftp-server");
        assert_eq!(
            request.template_url,
            "https://acme-sftp-cloudformation-template-bucket.s3.eu-west-1.amazonaws.com/sftp-server.yaml"
        );
        let keys: Vec<&str> = request.parameters.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "ProjectName",
                "S3Bucket",
                "UserRoleArn",
                "VpcId",
                "SubnetId",
                "SubnetCidr",
                "EIPAllocationId",
                "EIPAddress",
                "TemplateBucket",
                "SecretName",
                "Test"
            ]
        );
        assert_eq!(
            request.parameters[8].1,
            "acme-sftp-cloudformation-template-bucket"
        );
        assert_eq!(request.parameters[10].1, "test");
        assert_eq!(request.timeout_in_minutes, 10);
        assert_eq!(request.capabilities, ["CAPABILITY_NAMED_IAM"]);
    }

    #[tokio::test]
    async fn rejects_unknown_actions_without_side_effects() {
        let app = App::new(settings());
        let stack = FakeStack::with_statuses(&[CREATE_COMPLETE]);
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        for event in [
            json!({"action": "reboot"}),
            json!({"action": "  "}),
            json!({"action": null}),
            json!({}),
        ] {
            let response = app.handle(&event, &stack, &transfer, &notifier).await;
            assert_eq!(response.status_code, 400);
            assert!(response.body.contains("Missing or wrong action"));
        }
        assert!(notifier.messages().is_empty());
        assert!(stack.created.lock().unwrap().is_empty());
        assert!(stack.observed().is_empty());
        assert!(transfer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_action_only_notifies() {
        let app = App::new(settings());
        let stack = FakeStack::with_statuses(&[CREATE_COMPLETE]);
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "test"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response.status_code, 200);
        assert!(!response.body.is_empty());
        assert_eq!(notifier.messages(), [TEST_MESSAGE]);
        assert!(stack.created.lock().unwrap().is_empty());
        assert!(stack.deleted.lock().unwrap().is_empty());
        assert!(transfer.calls().is_empty());
    }

    #[tokio::test]
    async fn start_waits_for_creation_and_installs_host_key() {
        let app = App::new(settings());
        let stack =
            FakeStack::with_statuses(&[CREATE_IN_PROGRESS, CREATE_IN_PROGRESS, CREATE_COMPLETE]);
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "start"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, r#"{"ServerId":"s-0123456789abcdef0"}"#);
        assert_eq!(*stack.created.lock().unwrap(), [app.stack_request.clone()]);
        let observed = stack.observed();
        assert_eq!(
            observed
                .iter()
                .filter(|s| s.as_deref() == Some(CREATE_IN_PROGRESS))
                .count(),
            2
        );
        // two polls in progress, the one that saw completion, and the
        // final description
        assert_eq!(observed.len(), 4);
        assert_eq!(
            transfer.calls(),
            [(
                String::from("s-0123456789abcdef0"),
                String::from("host-key")
            )]
        );
        assert_eq!(notifier.messages(), [STARTED_MESSAGE]);
    }

    #[tokio::test]
    async fn start_reports_failed_creation() {
        let app = App::new(settings());
        let stack = FakeStack::with_statuses(&[CREATE_IN_PROGRESS, "ROLLBACK_COMPLETE"]);
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "start"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response, Response::new(500, "Stack creation failed"));
        assert!(transfer.calls().is_empty());
        assert_eq!(notifier.messages(), [CREATION_FAILED_MESSAGE]);
    }

    #[tokio::test]
    async fn start_decides_on_final_description() {
        let app = App::new(settings());
        let stack =
            FakeStack::with_statuses(&[CREATE_IN_PROGRESS, CREATE_COMPLETE, "ROLLBACK_COMPLETE"]);
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "start"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response, Response::new(500, "Stack creation failed"));
        assert_eq!(stack.observed().len(), 3);
        assert!(transfer.calls().is_empty());
        assert_eq!(notifier.messages(), [CREATION_FAILED_MESSAGE]);
    }

    #[tokio::test]
    async fn start_fails_without_server_id_output() {
        let app = App::new(settings());
        let stack = FakeStack {
            outputs: BTreeMap::new(),
            ..FakeStack::with_statuses(&[CREATE_COMPLETE])
        };
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "start"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response.status_code, 500);
        assert!(response.body.contains("SFTPServerId"));
        assert!(transfer.calls().is_empty());
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn start_reports_downstream_errors_once() {
        let app = App::new(settings());
        let stack = FakeStack::with_statuses(&[CREATE_COMPLETE]);
        let transfer = FakeTransfer {
            fail: true,
            ..Default::default()
        };
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "start"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response.status_code, 500);
        assert!(response.body.contains("invalid host key"));
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("invalid host key"));
    }

    #[tokio::test]
    async fn stop_deletes_stack_and_acknowledges() {
        let app = App::new(settings());
        let stack = FakeStack::with_statuses(&[CREATE_COMPLETE]);
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "stop"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response, Response::new(200, "stack deletion initiated"));
        assert_eq!(*stack.deleted.lock().unwrap(), ["acme-sftp-server"]);
        assert_eq!(notifier.messages(), [STOPPED_MESSAGE]);
        assert!(transfer.calls().is_empty());
    }

    #[tokio::test]
    async fn stop_reports_deletion_errors() {
        let app = App::new(settings());
        let stack = FakeStack {
            fail_delete: true,
            ..FakeStack::with_statuses(&[CREATE_COMPLETE])
        };
        let transfer = FakeTransfer::default();
        let notifier = CapturingNotifier::default();

        let response = app
            .handle(&json!({"action": "stop"}), &stack, &transfer, &notifier)
            .await;

        assert_eq!(response.status_code, 500);
        assert!(response.body.contains("access denied"));
        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with(":rotating_light: ERROR during SFTPStartStop Lambda"));
    }

    #[test]
    fn response_serializes_status_code_in_camel_case() {
        let response = Response::new(200, "ok");
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"statusCode": 200, "body": "ok"})
        );
    }
}
