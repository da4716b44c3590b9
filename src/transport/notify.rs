//! Data-loss warnings shown through the host's notification surface.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::batch::Batch;

/// How prominent an alert should be.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Presentation options passed along with an alert.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertOptions {
    pub severity: Severity,
    /// Extra guidance shown under the main message
    pub hint: Option<String>,
}

/// Marks "no alert showing" in [`DropWarning`]'s episode slot.
const NO_ALERT: u64 = 0;

/// Lets the notification surface report that an alert went away.
///
/// Dismissing or minimizing the alert re-arms the warning it belongs to. A handle from an
/// earlier alert has no effect once a newer alert is showing.
#[derive(Debug, Clone)]
pub struct AlertHandle {
    current: Arc<AtomicU64>,
    episode: u64,
}

impl AlertHandle {
    /// The user closed the alert.
    pub fn dismiss(&self) {
        self.release();
    }

    /// The user minimized the alert.
    pub fn minimize(&self) {
        self.release();
    }

    /// Whether this alert is the one currently showing.
    #[must_use]
    pub fn is_showing(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.episode
    }

    fn release(&self) {
        _ = self.current.compare_exchange(
            self.episode,
            NO_ALERT,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// The host's notification surface.
pub trait Notifier: Send + Sync + 'static {
    /// Show an alert. Call [`AlertHandle::dismiss`] or [`AlertHandle::minimize`] when it
    /// goes away.
    fn alert(&self, message: &str, options: AlertOptions, handle: AlertHandle);
}

/// Reports alerts through `tracing` and treats them as dismissed right away.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str, options: AlertOptions, handle: AlertHandle) {
        #[cfg(feature = "tracing")]
        tracing::warn!(severity = %options.severity, hint = ?options.hint, "{message}");
        #[cfg(not(feature = "tracing"))]
        let _ = (message, &options);
        handle.dismiss();
    }
}

/// Raises one alert per episode of dropped batches.
///
/// A dropped batch raises an alert only if the previous one is no longer showing; the
/// data loss itself is not rate limited, just the alert.
pub struct DropWarning {
    notifier: Arc<dyn Notifier>,
    message: String,
    hint: Option<String>,
    /// Episode of the alert currently showing, or [`NO_ALERT`]
    current: Arc<AtomicU64>,
    last_episode: AtomicU64,
}

impl DropWarning {
    pub fn new<N: Notifier>(notifier: N, message: String, hint: Option<String>) -> Self {
        Self {
            notifier: Arc::new(notifier),
            message,
            hint,
            current: Arc::new(AtomicU64::new(NO_ALERT)),
            last_episode: AtomicU64::new(NO_ALERT),
        }
    }

    /// Look at a released batch. Returns `true` if an alert was raised.
    pub fn observe(&self, batch: &Batch) -> bool {
        if !batch.dropped {
            return false;
        }

        let episode = self.last_episode.fetch_add(1, Ordering::Relaxed) + 1;
        if self
            .current
            .compare_exchange(NO_ALERT, episode, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.notifier.alert(
            &self.message,
            AlertOptions {
                severity: Severity::Warning,
                hint: self.hint.clone(),
            },
            AlertHandle {
                current: Arc::clone(&self.current),
                episode,
            },
        );
        true
    }
}

impl fmt::Debug for DropWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropWarning")
            .field("message", &self.message)
            .field("showing", &(self.current.load(Ordering::Acquire) != NO_ALERT))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every alert showing until the test dismisses it.
    #[derive(Debug, Clone, Default)]
    struct RecordingNotifier {
        alerts: Arc<Mutex<Vec<(String, AlertHandle)>>>,
    }

    impl Notifier for RecordingNotifier {
        fn alert(&self, message: &str, _options: AlertOptions, handle: AlertHandle) {
            self.alerts
                .lock()
                .unwrap()
                .push((message.to_owned(), handle));
        }
    }

    fn dropped_batch() -> Batch {
        Batch {
            dropped: true,
            ..Batch::default()
        }
    }

    #[test]
    fn one_alert_until_dismissed() {
        let notifier = RecordingNotifier::default();
        let warning = DropWarning::new(notifier.clone(), "telemetry dropped".to_owned(), None);

        assert!(warning.observe(&dropped_batch()));
        assert!(!warning.observe(&dropped_batch()));
        assert_eq!(notifier.alerts.lock().unwrap().len(), 1);

        let handle = notifier.alerts.lock().unwrap()[0].1.clone();
        assert!(handle.is_showing());
        handle.dismiss();

        assert!(warning.observe(&dropped_batch()));
        assert_eq!(notifier.alerts.lock().unwrap().len(), 2);
    }

    #[test]
    fn minimize_also_rearms() {
        let notifier = RecordingNotifier::default();
        let warning = DropWarning::new(notifier.clone(), "telemetry dropped".to_owned(), None);

        assert!(warning.observe(&dropped_batch()));
        notifier.alerts.lock().unwrap()[0].1.minimize();

        assert!(warning.observe(&dropped_batch()));
    }

    #[test]
    fn earlier_handle_cannot_rearm_a_newer_alert() {
        let notifier = RecordingNotifier::default();
        let warning = DropWarning::new(notifier.clone(), "telemetry dropped".to_owned(), None);

        assert!(warning.observe(&dropped_batch()));
        let first = notifier.alerts.lock().unwrap()[0].1.clone();
        first.minimize();

        assert!(warning.observe(&dropped_batch()));
        let second = notifier.alerts.lock().unwrap()[1].1.clone();
        first.dismiss();

        assert!(!first.is_showing());
        assert!(second.is_showing());
        assert!(
            !warning.observe(&dropped_batch()),
            "second alert is still showing"
        );
        assert_eq!(notifier.alerts.lock().unwrap().len(), 2);

        second.dismiss();
        assert!(warning.observe(&dropped_batch()));
    }

    #[test]
    fn complete_batches_never_alert() {
        let notifier = RecordingNotifier::default();
        let warning = DropWarning::new(notifier.clone(), "telemetry dropped".to_owned(), None);

        assert!(!warning.observe(&Batch::default()));
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }

    #[test]
    fn log_notifier_dismisses_immediately() {
        let warning = DropWarning::new(LogNotifier, "telemetry dropped".to_owned(), None);

        assert!(warning.observe(&dropped_batch()));
        assert!(warning.observe(&dropped_batch()));
    }
}
