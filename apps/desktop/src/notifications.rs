//! Drains orchestrator notifications into the log.

use client_core::ClientEvent;
use shared::domain::{Notification, NotificationLevel};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{error, info, warn};

pub fn spawn_notification_sink(mut events: broadcast::Receiver<ClientEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut delivered = 0;
        loop {
            match events.recv().await {
                Ok(ClientEvent::Notification(notification)) => {
                    show(&notification);
                    delivered += 1;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifications: sink lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        delivered
    })
}

fn show(notification: &Notification) {
    let request = notification
        .request
        .map(|seq| seq.to_string())
        .unwrap_or_default();
    match notification.level {
        NotificationLevel::Success => {
            info!(request = %request, "{}: {}", notification.title, notification.description)
        }
        NotificationLevel::Warning => {
            warn!(request = %request, "{}: {}", notification.title, notification.description)
        }
        NotificationLevel::Error => {
            error!(request = %request, "{}: {}", notification.title, notification.description)
        }
    }
}
