//! User-facing notifications (toasts).
//!
//! Every notification is logged at its severity and fanned out as a
//! `Broadcast::Notification`.

use soundmaster_proto::protocol::{Broadcast, Notification, NotificationKind, Severity};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub struct Notifier {
    tx: broadcast::Sender<Broadcast>,
}

impl Notifier {
    pub fn new(tx: broadcast::Sender<Broadcast>) -> Self {
        Self { tx }
    }

    pub fn push(
        &mut self,
        kind: NotificationKind,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) {
        let notification = Notification {
            kind,
            severity,
            title: title.into(),
            description: description.into(),
        };
        match severity {
            Severity::Info | Severity::Success => {
                info!("notify: {} - {}", notification.title, notification.description)
            }
            Severity::Warning => {
                warn!("notify: {} - {}", notification.title, notification.description)
            }
            Severity::Error => {
                error!("notify: {} - {}", notification.title, notification.description)
            }
        }

        if self
            .tx
            .send(Broadcast::Notification { data: notification })
            .is_err()
        {
            debug!("notify: no subscribers");
        }
    }

    pub fn info(&mut self, kind: NotificationKind, title: &str, description: impl Into<String>) {
        self.push(kind, Severity::Info, title, description);
    }

    pub fn success(&mut self, kind: NotificationKind, title: &str, description: impl Into<String>) {
        self.push(kind, Severity::Success, title, description);
    }

    pub fn warning(&mut self, kind: NotificationKind, title: &str, description: impl Into<String>) {
        self.push(kind, Severity::Warning, title, description);
    }
}
