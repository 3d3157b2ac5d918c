//! Observer registry and event dispatch
//!
//! Each observable reader owns one registry and one dispatch thread fed by
//! an unbounded channel. Events are delivered to every observer in
//! publication order; a failing observer never prevents the others from
//! seeing the event and never disables the reader.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::{trace, warn};

use crate::error::Error;
use crate::selection::CardSelectionResult;

/// Kinds of events published to reader observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderEventKind {
    /// A card was inserted (no scenario scheduled, or none required)
    CardInserted,
    /// A card was inserted and the scheduled scenario matched
    CardMatched,
    /// The card was removed
    CardRemoved,
    /// The reader became unavailable (detection timeout)
    Unavailable,
}

/// Event published to reader observers
#[derive(Debug, Clone)]
pub struct ReaderEvent {
    plugin_name: String,
    reader_name: String,
    kind: ReaderEventKind,
    selection_result: Option<CardSelectionResult>,
}

impl ReaderEvent {
    pub(crate) fn new(
        plugin_name: String,
        reader_name: String,
        kind: ReaderEventKind,
        selection_result: Option<CardSelectionResult>,
    ) -> Self {
        Self {
            plugin_name,
            reader_name,
            kind,
            selection_result,
        }
    }

    /// Name of the plugin owning the reader
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Name of the reader that produced the event
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// What happened
    pub const fn kind(&self) -> ReaderEventKind {
        self.kind
    }

    /// Result of the scheduled selection scenario, when one ran
    pub fn selection_result(&self) -> Option<&CardSelectionResult> {
        self.selection_result.as_ref()
    }
}

/// Recipient of reader events
pub trait ReaderObserver: Send + Sync {
    /// Invoked for every published event, in publication order
    fn on_reader_event(&self, event: &ReaderEvent);
}

/// Recipient of errors raised while observing a reader: monitoring job
/// failures and observer panics
pub trait ObservationErrorHandler: Send + Sync {
    /// Invoked with the plugin and reader names and the error
    fn on_reader_observation_error(&self, plugin_name: &str, reader_name: &str, error: Error);
}

struct DispatchState {
    plugin_name: String,
    reader_name: String,
    observers: Mutex<Vec<Arc<dyn ReaderObserver>>>,
    error_handler: Mutex<Option<Arc<dyn ObservationErrorHandler>>>,
}

impl DispatchState {
    fn deliver(&self, event: &ReaderEvent) {
        let observers = self.observers.lock().unwrap().clone();
        for observer in observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_reader_event(event)));
            if let Err(payload) = outcome {
                let message = panic_message(payload);
                warn!(
                    reader = %self.reader_name,
                    panic = %message,
                    "observer panicked while handling a reader event"
                );
                self.notify_error(Error::illegal_state(format!(
                    "observer panicked: {message}"
                )));
            }
        }
    }

    fn notify_error(&self, error: Error) {
        let handler = self.error_handler.lock().unwrap().clone();
        match handler {
            Some(handler) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    handler.on_reader_observation_error(
                        &self.plugin_name,
                        &self.reader_name,
                        error,
                    );
                }));
                if outcome.is_err() {
                    warn!(
                        reader = %self.reader_name,
                        "observation error handler panicked"
                    );
                }
            }
            None => warn!(
                reader = %self.reader_name,
                %error,
                "observation error without a registered handler"
            ),
        }
    }
}

/// Thread-safe observer registry with its dispatch thread
pub(crate) struct ObservationRegistry {
    state: Arc<DispatchState>,
    events: Option<Sender<ReaderEvent>>,
    dispatcher: Option<thread::JoinHandle<()>>,
}

impl ObservationRegistry {
    pub(crate) fn new(plugin_name: impl Into<String>, reader_name: impl Into<String>) -> Self {
        let state = Arc::new(DispatchState {
            plugin_name: plugin_name.into(),
            reader_name: reader_name.into(),
            observers: Mutex::new(Vec::new()),
            error_handler: Mutex::new(None),
        });

        let (events, receiver) = unbounded::<ReaderEvent>();
        let dispatch_state = state.clone();
        let dispatcher = thread::spawn(move || {
            for event in receiver.iter() {
                dispatch_state.deliver(&event);
            }
        });

        Self {
            state,
            events: Some(events),
            dispatcher: Some(dispatcher),
        }
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn ReaderObserver>) {
        self.state.observers.lock().unwrap().push(observer);
    }

    pub(crate) fn remove_observer(&self, observer: &Arc<dyn ReaderObserver>) {
        self.state
            .observers
            .lock()
            .unwrap()
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub(crate) fn clear_observers(&self) {
        self.state.observers.lock().unwrap().clear();
    }

    pub(crate) fn count_observers(&self) -> usize {
        self.state.observers.lock().unwrap().len()
    }

    pub(crate) fn set_error_handler(&self, handler: Option<Arc<dyn ObservationErrorHandler>>) {
        *self.state.error_handler.lock().unwrap() = handler;
    }

    /// Queue an event for delivery on the dispatch thread
    pub(crate) fn publish(
        &self,
        kind: ReaderEventKind,
        selection_result: Option<CardSelectionResult>,
    ) {
        trace!(
            reader = %self.state.reader_name,
            kind = ?kind,
            "publishing reader event"
        );
        let event = ReaderEvent::new(
            self.state.plugin_name.clone(),
            self.state.reader_name.clone(),
            kind,
            selection_result,
        );
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Forward an observation error to the registered handler
    pub(crate) fn notify_error(&self, error: Error) {
        self.state.notify_error(error);
    }
}

impl Drop for ObservationRegistry {
    fn drop(&mut self) {
        // Disconnect the channel so the dispatch thread drains and exits
        drop(self.events.take());
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use std::time::Duration;

    struct RecordingObserver {
        events: Sender<ReaderEvent>,
    }

    impl RecordingObserver {
        fn create() -> (Arc<Self>, Receiver<ReaderEvent>) {
            let (events, receiver) = unbounded();
            (Arc::new(Self { events }), receiver)
        }
    }

    impl ReaderObserver for RecordingObserver {
        fn on_reader_event(&self, event: &ReaderEvent) {
            let _ = self.events.send(event.clone());
        }
    }

    struct PanickingObserver;

    impl ReaderObserver for PanickingObserver {
        fn on_reader_event(&self, _event: &ReaderEvent) {
            panic!("observer bug");
        }
    }

    struct RecordingErrorHandler {
        errors: Sender<(String, String, String)>,
    }

    impl RecordingErrorHandler {
        fn create() -> (Arc<Self>, Receiver<(String, String, String)>) {
            let (errors, receiver) = unbounded();
            (Arc::new(Self { errors }), receiver)
        }
    }

    impl ObservationErrorHandler for RecordingErrorHandler {
        fn on_reader_observation_error(
            &self,
            plugin_name: &str,
            reader_name: &str,
            error: Error,
        ) {
            let _ = self.errors.send((
                plugin_name.to_string(),
                reader_name.to_string(),
                error.to_string(),
            ));
        }
    }

    #[test]
    fn test_events_reach_every_observer_in_order() {
        let registry = ObservationRegistry::new("plugin-1", "reader-1");
        let (first, first_events) = RecordingObserver::create();
        let (second, second_events) = RecordingObserver::create();
        registry.add_observer(first);
        registry.add_observer(second);

        registry.publish(ReaderEventKind::CardInserted, None);
        registry.publish(ReaderEventKind::CardRemoved, None);

        for events in [first_events, second_events] {
            let kinds: Vec<_> = (0..2)
                .map(|_| events.recv_timeout(Duration::from_secs(2)).unwrap().kind())
                .collect();
            assert_eq!(
                kinds,
                vec![ReaderEventKind::CardInserted, ReaderEventKind::CardRemoved]
            );
        }
    }

    #[test]
    fn test_observer_panic_does_not_starve_others() {
        let registry = ObservationRegistry::new("plugin-1", "reader-1");
        let (handler, errors) = RecordingErrorHandler::create();
        registry.set_error_handler(Some(handler));
        registry.add_observer(Arc::new(PanickingObserver));
        let (recording, events) = RecordingObserver::create();
        registry.add_observer(recording);

        registry.publish(ReaderEventKind::CardMatched, None);

        // The second observer still receives the event
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.kind(), ReaderEventKind::CardMatched);
        assert_eq!(event.plugin_name(), "plugin-1");
        assert_eq!(event.reader_name(), "reader-1");

        // The handler received the observer failure
        let (plugin, reader, message) = errors.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(plugin, "plugin-1");
        assert_eq!(reader, "reader-1");
        assert!(message.contains("observer bug"));
    }

    #[test]
    fn test_registry_accounting() {
        let registry = ObservationRegistry::new("plugin-1", "reader-1");
        let (first, _events) = RecordingObserver::create();
        let (second, _events) = RecordingObserver::create();
        let first_dyn: Arc<dyn ReaderObserver> = first;

        registry.add_observer(first_dyn.clone());
        registry.add_observer(second);
        assert_eq!(registry.count_observers(), 2);

        registry.remove_observer(&first_dyn);
        assert_eq!(registry.count_observers(), 1);

        registry.clear_observers();
        assert_eq!(registry.count_observers(), 0);
    }

    #[test]
    fn test_job_errors_reach_the_handler() {
        let registry = ObservationRegistry::new("plugin-1", "reader-1");
        let (handler, errors) = RecordingErrorHandler::create();
        registry.set_error_handler(Some(handler));

        registry.notify_error(Error::reader_communication("reader unplugged"));

        let (_, _, message) = errors.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(message.contains("reader unplugged"));
    }
}
