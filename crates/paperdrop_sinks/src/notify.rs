//! Best-effort sanitized alerts.
//!
//! The notifier is constructed once at startup and shared by the admission
//! pipeline and the worker loop. [`SlackNotifier`] holds a bounded queue
//! drained by one background sender task; `error()` never blocks and never
//! returns an error to the caller. Raw extracted text must never reach this
//! module - messages pass through [`paperdrop_logging::redact`] and are
//! truncated before they leave the process.

use paperdrop_logging::redact;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

const QUEUE_CAPACITY: usize = 64;
const POST_TIMEOUT: Duration = Duration::from_secs(5);
/// Rate-limit cushion between webhook posts.
const POST_PACING: Duration = Duration::from_millis(200);
const MESSAGE_LIMIT: usize = 300;

#[derive(Debug, Clone, Default)]
pub struct NotifyContext {
    pub filename: String,
    pub content_hash: String,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    /// Fire-and-forget sanitized notification. Must never fail the caller.
    fn error(&self, code: &str, ctx: NotifyContext);
}

pub struct SlackNotifier {
    tx: Option<mpsc::Sender<Value>>,
}

impl SlackNotifier {
    /// With no webhook configured every call is a no-op.
    pub fn new(webhook_url: Option<String>) -> Self {
        let Some(url) = webhook_url else {
            return Self { tx: None };
        };
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(sender_task(url, rx));
        Self { tx: Some(tx) }
    }
}

impl Notifier for SlackNotifier {
    fn error(&self, code: &str, ctx: NotifyContext) {
        let Some(tx) = &self.tx else {
            return;
        };
        let info: String = redact(&ctx.message).chars().take(MESSAGE_LIMIT).collect();
        let message = json!({
            "text": format!("Paperdrop error: {code}"),
            "blocks": [{
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*Error:* `{code}`\n*File:* `{}`\n*SHA:* `{}`\n*Info:* `{info}`",
                        ctx.filename, ctx.content_hash
                    ),
                },
            }],
        });
        if tx.try_send(message).is_err() {
            warn!("notification queue full, dropping alert {code}");
        }
    }
}

async fn sender_task(webhook_url: String, mut rx: mpsc::Receiver<Value>) {
    let client = match reqwest::Client::builder().timeout(POST_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            warn!("notifier disabled, could not build HTTP client: {err}");
            return;
        }
    };
    while let Some(message) = rx.recv().await {
        if let Err(err) = client.post(&webhook_url).json(&message).send().await {
            warn!("webhook post failed: {err}");
        }
        tokio::time::sleep(POST_PACING).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn without_webhook_calls_are_noops() {
        let notifier = SlackNotifier::new(None);
        notifier.error(
            "PROCESSING_FAILED",
            NotifyContext {
                filename: "a.pdf".to_string(),
                ..Default::default()
            },
        );
    }

    #[tokio::test]
    async fn queue_overflow_drops_instead_of_blocking() {
        // Channel exists but nothing drains it: keep a receiver alive without
        // a sender task by pointing the webhook at a closed channel setup.
        let (tx, _rx) = mpsc::channel(1);
        let notifier = SlackNotifier { tx: Some(tx) };
        for _ in 0..10 {
            notifier.error("JOB_FAILED", NotifyContext::default());
        }
    }
}
