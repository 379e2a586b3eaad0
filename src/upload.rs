//! Handles bucket events. By default each record is only extracted
//! and logged; announcing uploads is opt-in.

use crate::conf::UploadSettings;
use crate::service::Notifier;
use crate::trigger::Trigger;
use anyhow::{anyhow, Result};
use envy::from_env;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{info, instrument, warn};

/// Format the announcement of an uploaded object. The first segment
/// of the key is the SFTP user's home folder.
pub fn upload_message(bucket: &str, key: &str, size: Option<u64>) -> String {
    let segments: Vec<&str> = key.split('/').collect();
    let user = if segments.len() > 1 {
        segments[0]
    } else {
        "unknown"
    };
    let file = segments.last().copied().unwrap_or_default();
    let size = size.map_or_else(|| String::from("unknown"), |s| s.to_string());
    format!(
        ":inbox_tray: *New file uploaded to S3*\n\
         *Bucket:* `{bucket}`\n\
         *User:* `{user}`\n\
         *File:* `{file}`\n\
         *Size:* `{size}` bytes"
    )
}

/// The bucket handler state.
pub struct Uploads {
    pub settings: UploadSettings,
}

impl Uploads {
    pub fn new(settings: UploadSettings) -> Self {
        Uploads { settings }
    }

    /// Handle an S3 event envelope. Returns the amount of
    /// notifications sent.
    #[instrument(skip_all)]
    pub async fn handle(&self, event: &Value, notifier: &dyn Notifier) -> usize {
        let triggers = Trigger::all(event);
        if triggers.is_empty() {
            warn!("No records found in event");
            return 0;
        }
        let mut sent = 0;
        for trigger in &triggers {
            info!(
                event_name = ?trigger.event_name,
                bucket = ?trigger.bucket_name,
                key = ?trigger.object_key,
                "Received bucket event"
            );
            if self.act(trigger, notifier).await {
                sent += 1;
            }
        }
        sent
    }

    /// The action taken for each record. Returns whether a
    /// notification was sent.
    async fn act(&self, trigger: &Trigger, notifier: &dyn Notifier) -> bool {
        if !self.settings.notify_on_upload {
            return false;
        }
        let (Some(bucket), Some(key)) = (&trigger.bucket_name, &trigger.object_key) else {
            warn!("Skipping record without bucket or key: {:?}", trigger);
            return false;
        };
        notifier
            .send(&upload_message(bucket, key, trigger.object_size))
            .await;
        true
    }
}

/// Global Uploads instance.
static CURRENT: OnceCell<Uploads> = OnceCell::new();

/// Initialize the global Uploads instance.
pub fn init() -> Result<()> {
    let settings = from_env()?;
    CURRENT
        .set(Uploads::new(settings))
        .map_err(|_| anyhow!("upload::CURRENT was already initialized"))
}

/// Get the current Uploads instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static Uploads {
    CURRENT.get().expect("uploads is not initialized")
}
