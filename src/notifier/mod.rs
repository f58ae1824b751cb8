// Fan-out of internal events: push channel for every event, email for errors, with dedup.

mod mail;

pub use mail::Mailer;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::executor::CommandExecutor;
use crate::models::{Notification, NotificationKind, PanelEvent, SystemUpdate};

pub struct Notifier {
    sink: broadcast::Sender<PanelEvent>,
    mailer: Option<Mailer>,
    dedup_window: Duration,
    recent: Mutex<HashMap<(NotificationKind, String), Instant>>,
}

impl Notifier {
    pub fn new(broadcast_capacity: usize, mailer: Option<Mailer>, dedup_window: Duration) -> Self {
        let (sink, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            sink,
            mailer,
            dedup_window,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig, executor: CommandExecutor) -> Self {
        Self::new(
            config.monitoring.broadcast_capacity,
            Mailer::from_config(config, executor),
            Duration::from_secs(config.alerts.dedup_window_secs),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.sink.subscribe()
    }

    /// Pushes a state update to observers connected right now. Returns how many got it.
    pub fn publish(&self, update: SystemUpdate) -> usize {
        match self.sink.send(PanelEvent::Update(update)) {
            Ok(n) => n,
            Err(_) => {
                tracing::trace!("no push-channel observers");
                0
            }
        }
    }

    /// Emits a notification unless the same (kind, message) went out within the dedup window.
    /// Returns the notification when it was sent.
    pub async fn emit(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Option<Notification> {
        let message = message.into();
        if !self.admit(kind, &message) {
            tracing::debug!(kind = kind.as_str(), message = %message, "duplicate notification suppressed");
            return None;
        }

        let notification = Notification::new(kind, message, details);
        let _ = self.sink.send(PanelEvent::Notification(notification.clone()));

        if kind == NotificationKind::Error
            && let Some(mailer) = &self.mailer
            && let Err(e) = mailer.send(&notification).await
        {
            tracing::warn!(error = %e, to = %mailer.recipient(), "failed to send alert email");
        }

        tracing::info!(
            id = %notification.id,
            kind = kind.as_str(),
            message = %notification.message,
            details = %notification.details,
            "notification sent"
        );
        Some(notification)
    }

    fn admit(&self, kind: NotificationKind, message: &str) -> bool {
        let now = Instant::now();
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.retain(|_, sent| now.duration_since(*sent) < self.dedup_window);
        let key = (kind, message.to_string());
        if recent.contains_key(&key) {
            return false;
        }
        recent.insert(key, now);
        true
    }
}
