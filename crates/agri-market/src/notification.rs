//! Per-user notification records.
//!
//! Records only; delivery over SMS or push is handled elsewhere.

use std::collections::HashMap;

use agri_proto::{BookingId, NotificationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Delivery channel a notification is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Shown in the app.
    #[default]
    InApp,
    /// Text message.
    Sms,
    /// Push notification.
    Push,
}

/// A message for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Identifier.
    pub id: NotificationId,
    /// Recipient.
    pub user: UserId,
    /// Short title.
    pub title: String,
    /// Body.
    pub message: String,
    /// Channel.
    pub channel: Channel,
    /// Whether the recipient has read it.
    pub read: bool,
    /// Booking it concerns.
    pub booking: Option<BookingId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// All notifications.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    notifications: HashMap<NotificationId, Notification>,
}

impl NotificationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an in-app notification.
    pub fn push(
        &mut self,
        user: UserId,
        title: impl Into<String>,
        message: impl Into<String>,
        booking: Option<BookingId>,
    ) -> &Notification {
        let notification = Notification {
            id: NotificationId::new(),
            user,
            title: title.into(),
            message: message.into(),
            channel: Channel::InApp,
            read: false,
            booking,
            created_at: Utc::now(),
        };
        self.notifications
            .entry(notification.id)
            .or_insert(notification)
    }

    /// A user's notifications, newest first.
    pub fn for_user(&self, user: UserId, unread_only: bool) -> Vec<&Notification> {
        let mut items: Vec<_> = self
            .notifications
            .values()
            .filter(|n| n.user == user && !(unread_only && n.read))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Marks a notification read. Only the recipient may do so.
    pub fn mark_read(&mut self, id: NotificationId, user: UserId) -> MarketResult<&Notification> {
        let notification = self
            .notifications
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("notification", id))?;
        if notification.user != user {
            return Err(MarketError::Forbidden(format!(
                "notification {id} belongs to another user"
            )));
        }
        notification.read = true;
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_filter_and_mark_read() {
        let mut log = NotificationLog::new();
        let user = UserId::new();
        let id = log.push(user, "Booking confirmed", "See you Monday", None).id;
        log.push(UserId::new(), "Other", "Not yours", None);

        assert_eq!(log.for_user(user, true).len(), 1);
        log.mark_read(id, user).unwrap();
        assert!(log.for_user(user, true).is_empty());
        assert_eq!(log.for_user(user, false).len(), 1);
    }

    #[test]
    fn only_recipient_marks_read() {
        let mut log = NotificationLog::new();
        let id = log.push(UserId::new(), "t", "m", None).id;
        assert!(matches!(
            log.mark_read(id, UserId::new()),
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            log.mark_read(NotificationId::new(), UserId::new()),
            Err(MarketError::NotFound { .. })
        ));
    }
}
