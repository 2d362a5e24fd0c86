use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::services::messaging::MessagingProvider;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    Booked,
    Rescheduled,
    Cancelled,
}

/// Emitted after a booking operation has committed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingEvent {
    pub kind: BookingEventKind,
    pub organization_id: String,
    pub session_id: String,
    pub appointment_id: String,
    pub patient_name: Option<String>,
    pub start_time: NaiveDateTime,
    pub appointment_type: Option<String>,
}

impl BookingEvent {
    pub fn summary(&self) -> String {
        let verb = match self.kind {
            BookingEventKind::Booked => "New booking",
            BookingEventKind::Rescheduled => "Rescheduled",
            BookingEventKind::Cancelled => "Cancelled",
        };
        let who = self.patient_name.as_deref().unwrap_or("a patient");
        let what = self.appointment_type.as_deref().unwrap_or("appointment");
        format!(
            "{verb}: {who}, {what} on {}",
            self.start_time.format("%a %b %-d at %-I:%M %p")
        )
    }
}

/// Fans booking events out to live subscribers and, when the event's
/// organization has an owner phone, texts that owner. Delivery never blocks
/// or fails a turn.
pub struct Notifier {
    tx: broadcast::Sender<BookingEvent>,
    messaging: Arc<dyn MessagingProvider>,
}

impl Notifier {
    pub fn new(messaging: Arc<dyn MessagingProvider>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx, messaging }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.tx.subscribe()
    }

    /// `owner_phone` must belong to `event.organization_id`; empty skips the SMS.
    pub fn publish(&self, event: BookingEvent, owner_phone: &str) {
        tracing::info!(
            organization_id = %event.organization_id,
            appointment_id = %event.appointment_id,
            kind = ?event.kind,
            "booking event"
        );

        if !owner_phone.trim().is_empty() {
            let messaging = Arc::clone(&self.messaging);
            let owner = owner_phone.trim().to_string();
            let text = event.summary();
            tokio::spawn(async move {
                if let Err(e) = messaging.send_message(&owner, &text).await {
                    tracing::error!(error = %e, "failed to notify owner");
                }
            });
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingMessaging {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessagingProvider for RecordingMessaging {
        async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn event() -> BookingEvent {
        BookingEvent {
            kind: BookingEventKind::Booked,
            organization_id: "org-1".to_string(),
            session_id: "s1".to_string(),
            appointment_id: "appt-1".to_string(),
            patient_name: Some("Jane Doe".to_string()),
            start_time: NaiveDateTime::parse_from_str("2030-01-08 09:30", "%Y-%m-%d %H:%M").unwrap(),
            appointment_type: Some("cleaning".to_string()),
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(event().summary(), "New booking: Jane Doe, cleaning on Tue Jan 8 at 9:30 AM");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_and_owner() {
        let messaging = Arc::new(RecordingMessaging::default());
        let notifier = Notifier::new(messaging.clone());
        let mut rx = notifier.subscribe();

        notifier.publish(event(), "+15550199");
        assert_eq!(rx.recv().await.unwrap(), event());

        for _ in 0..50 {
            if !messaging.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let sent = messaging.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+15550199");
    }

    #[tokio::test]
    async fn test_publish_without_listeners_or_owner() {
        let messaging = Arc::new(RecordingMessaging::default());
        let notifier = Notifier::new(messaging.clone());
        notifier.publish(event(), "  ");
        tokio::task::yield_now().await;
        assert!(messaging.sent.lock().unwrap().is_empty());
    }
}
