//! Forwarding of error logs to the operator's debug chat.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use voxbot_chat::Messenger;
use voxbot_core::ChatId;

use crate::text::escape_html;

/// Visitor collecting the message and error fields of an event.
#[derive(Default)]
struct AlertVisitor {
    message: Option<String>,
    error: Option<String>,
}

impl Visit for AlertVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "error" => self.error = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            "error" => self.error = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}

/// Tracing layer that hands every ERROR event to [`forward_alerts`].
///
/// The layer never blocks or touches the network itself.
#[derive(Debug, Clone)]
pub struct AlertLayer {
    sender: UnboundedSender<String>,
}

impl AlertLayer {
    pub fn new() -> (Self, UnboundedReceiver<String>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR {
            return;
        }

        let mut visitor = AlertVisitor::default();
        event.record(&mut visitor);
        let Some(message) = visitor.message else {
            return;
        };

        let mut alert = format!("{}: {}", metadata.target(), message);
        if let Some(error) = visitor.error {
            let _ = write!(alert, " ({})", error);
        }
        // The receiver is gone only during shutdown.
        let _ = self.sender.send(alert);
    }
}

/// Sends alerts to `chat_id` until the layer is dropped.
///
/// Without a debug chat the alerts are drained and discarded. Delivery
/// failures are logged at WARN so they never loop back into the channel.
pub async fn forward_alerts(
    mut alerts: UnboundedReceiver<String>,
    messenger: Arc<dyn Messenger>,
    chat_id: Option<ChatId>,
) {
    while let Some(alert) = alerts.recv().await {
        let Some(chat_id) = chat_id else {
            continue;
        };
        let text = format!("<b>Error</b>\n<code>{}</code>", escape_html(&alert));
        if let Err(e) = messenger.send(chat_id, &text, None).await {
            warn!(chat_id, error = %e, "Failed to forward alert to debug chat");
        }
    }
}
