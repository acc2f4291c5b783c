//! Best-effort user notifications.
//!
//! The auth manager never waits on delivery. Events go onto an unbounded
//! channel; whoever owns the receiver (a chat bot, a mailer) drains it.
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    UserBlocked { user_id: String, by_user_id: String },
    UserUnblocked { user_id: String, by_user_id: String },
}

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    /// A notifier and the receiving end of its queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a notification. Failures are logged and never retried.
    pub fn dispatch(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.send(notification) {
            tracing::warn!(notification = ?err.0, "notification receiver dropped");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::disabled()
    }
}
