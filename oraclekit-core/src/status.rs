//! Single-slot status publication for the UI layer.

use std::sync::{Arc, RwLock};

use tokio::sync::watch;

/// Receives status updates on the host side.
///
/// Calls are fire-and-forget and may arrive from the polling task's thread;
/// implementations should hop to their UI thread themselves.
#[uniffi::export(with_foreign)]
pub trait StatusListener: Send + Sync {
    /// An informational message, e.g. "Service started".
    fn on_info_message(&self, message: String);

    /// The latest poll result, formatted as `"<body>@<HH:MM:SS>"`.
    fn on_result(&self, result: String);

    /// The library version, reported once when the client starts.
    fn on_sdk_version(&self, version: String);
}

/// Latest-value slot written by the polling task and read by the UI.
///
/// Only the most recent result is retained. Readers either poll
/// [`StatusChannel::latest`] or await changes through
/// [`StatusChannel::subscribe`]; an optional [`StatusListener`] is notified
/// on every publish.
pub struct StatusChannel {
    tx: watch::Sender<Option<String>>,
    listener: RwLock<Option<Arc<dyn StatusListener>>>,
}

impl std::fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChannel")
            .field("latest", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusChannel {
    /// Creates an empty channel with no listener.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            listener: RwLock::new(None),
        }
    }

    /// Installs or clears the host listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn StatusListener>>) {
        match self.listener.write() {
            Ok(mut slot) => *slot = listener,
            Err(poisoned) => *poisoned.into_inner() = listener,
        }
    }

    /// Replaces the current result and notifies subscribers.
    pub fn publish(&self, result: String) {
        self.tx.send_replace(Some(result.clone()));
        if let Some(listener) = self.listener() {
            listener.on_result(result);
        }
    }

    /// Forwards an informational message to the listener, if any.
    pub fn info(&self, message: &str) {
        log::info!("{message}");
        if let Some(listener) = self.listener() {
            listener.on_info_message(message.to_string());
        }
    }

    /// Reports the library version to the listener, if any.
    pub fn sdk_version(&self, version: &str) {
        if let Some(listener) = self.listener() {
            listener.on_sdk_version(version.to_string());
        }
    }

    /// The most recent result, if one was published.
    #[must_use]
    pub fn latest(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Returns a receiver that observes every subsequent publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    fn listener(&self) -> Option<Arc<dyn StatusListener>> {
        self.listener
            .read()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |slot| slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl StatusListener for RecordingListener {
        fn on_info_message(&self, message: String) {
            self.events.lock().expect("lock").push(format!("info:{message}"));
        }

        fn on_result(&self, result: String) {
            self.events.lock().expect("lock").push(format!("result:{result}"));
        }

        fn on_sdk_version(&self, version: String) {
            self.events.lock().expect("lock").push(format!("version:{version}"));
        }
    }

    #[test]
    fn test_only_latest_result_is_kept() {
        let channel = StatusChannel::new();
        assert_eq!(channel.latest(), None);
        channel.publish("1@00:00:01".to_string());
        channel.publish("2@00:00:02".to_string());
        assert_eq!(channel.latest().as_deref(), Some("2@00:00:02"));
    }

    #[test]
    fn test_listener_receives_every_kind_of_event() {
        let channel = StatusChannel::new();
        let listener = Arc::new(RecordingListener::default());
        channel.set_listener(Some(listener.clone()));

        channel.sdk_version("0.3.0");
        channel.info("Service started");
        channel.publish("42@12:00:00".to_string());
        channel.set_listener(None);
        channel.publish("43@12:00:10".to_string());

        assert_eq!(
            *listener.events.lock().expect("lock"),
            vec![
                "version:0.3.0".to_string(),
                "info:Service started".to_string(),
                "result:42@12:00:00".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_subscribers_observe_publishes() {
        let channel = StatusChannel::new();
        let mut rx = channel.subscribe();
        channel.publish("1000000@10:00:00".to_string());
        rx.changed().await.expect("changed");
        assert_eq!(rx.borrow().as_deref(), Some("1000000@10:00:00"));
    }
}
