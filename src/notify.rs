//! User-visible notifications (toasts) queued by the session.

use std::collections::VecDeque;

use crate::error::SessionError;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Operation the user can retry from a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Save the label being edited again
    Save,
    /// Delete the label being edited again
    Delete,
}

/// A message for the embedding UI.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// Retry affordance, for persistence failures
    pub retry: Option<RetryAction>,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
            retry: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
            retry: None,
        }
    }

    /// Error notification for a failed operation.
    pub fn error(error: &SessionError, retry: Option<RetryAction>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: error.to_string(),
            retry,
        }
    }
}

/// FIFO of notifications waiting to be shown.
#[derive(Debug, Default)]
pub struct Notifications {
    queue: VecDeque<Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => log::warn!("🔔 {}", notification.message),
            _ => log::info!("🔔 {}", notification.message),
        }
        self.queue.push_back(notification);
    }

    /// Take every queued notification, oldest first.
    pub fn drain(&mut self) -> Vec<Notification> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_order_and_drain() {
        let mut notifications = Notifications::new();
        notifications.push(Notification::info("saved"));
        notifications.push(Notification::error(
            &SessionError::persistence("save label", "offline"),
            Some(RetryAction::Save),
        ));
        assert_eq!(notifications.len(), 2);

        let drained = notifications.drain();
        assert_eq!(drained[0].level, NotificationLevel::Info);
        assert_eq!(drained[1].retry, Some(RetryAction::Save));
        assert_eq!(drained[1].message, "Failed to save label: offline");
        assert!(notifications.is_empty());
    }
}
