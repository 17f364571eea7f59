use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{EmailNotification, EventPublisher, LifecycleEvent, Notifier};

/// Publisher that keeps everything in memory. Used by tests and `STORE=memory`.
#[derive(Default)]
pub struct InMemoryPublisher {
    lifecycle: Mutex<Vec<LifecycleEvent>>,
    notifications: Mutex<Vec<EmailNotification>>,
    failing: AtomicBool,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every publish fails without recording.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn lifecycle_events(&self) -> Vec<LifecycleEvent> {
        self.lifecycle.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<EmailNotification> {
        self.notifications.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Removes and returns the recorded lifecycle events.
    pub fn drain_lifecycle(&self) -> Vec<LifecycleEvent> {
        self.lifecycle
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("publisher unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish_lifecycle(&self, event: &LifecycleEvent) -> Result<(), anyhow::Error> {
        self.check()?;
        self.lifecycle
            .lock()
            .map_err(|e| anyhow::anyhow!("publisher lock poisoned: {}", e))?
            .push(event.clone());
        Ok(())
    }

    async fn publish_notification(
        &self,
        notification: &EmailNotification,
    ) -> Result<(), anyhow::Error> {
        self.check()?;
        self.notifications
            .lock()
            .map_err(|e| anyhow::anyhow!("publisher lock poisoned: {}", e))?
            .push(notification.clone());
        Ok(())
    }
}

/// Notifier that records outgoing mail instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailNotification> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Most recent message addressed to `to`.
    pub fn last_to(&self, to: &str) -> Option<EmailNotification> {
        self.sent()
            .into_iter()
            .rev()
            .find(|n| n.to.eq_ignore_ascii_case(to))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, notification: &EmailNotification) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("mail relay unavailable");
        }
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("notifier lock poisoned: {}", e))?
            .push(notification.clone());
        Ok(())
    }
}
