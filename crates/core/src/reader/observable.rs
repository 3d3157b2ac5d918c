//! Observable reader: detection state machine and scheduled selection
//!
//! Every observable reader owns one monitor thread consuming internal
//! events from an unbounded channel. The thread serializes all state
//! transitions, so observers always see events consistent with the
//! transition order; monitoring jobs only ever post events, never switch
//! states themselves.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::monitoring::jobs::{
    BlockingInsertionJob, BlockingRemovalJob, PollingInsertionJob, PollingRemovalJob,
    PushInsertionJob, DEFAULT_POLLING_CYCLE,
};
use crate::monitoring::state::transition;
use crate::monitoring::{
    DetectionMode, InternalEvent, JobContext, JobHandle, MonitorMessage, MonitoringJob,
    MonitoringState, NotificationMode,
};
use crate::observation::{
    ObservationErrorHandler, ObservationRegistry, ReaderEventKind, ReaderObserver,
};
use crate::reader::driver::ReaderDriver;
use crate::reader::Reader;
use crate::selection::{CardSelectionResult, CardSelectionScenario};

/// Tuning of the monitoring jobs of one observable reader
#[derive(Debug, Clone)]
pub struct MonitoringOptions {
    insertion_timeout: Option<Duration>,
    insertion_polling_cycle: Duration,
    removal_polling_cycle: Duration,
}

impl Default for MonitoringOptions {
    fn default() -> Self {
        Self {
            insertion_timeout: None,
            insertion_polling_cycle: DEFAULT_POLLING_CYCLE,
            removal_polling_cycle: DEFAULT_POLLING_CYCLE,
        }
    }
}

impl MonitoringOptions {
    /// Timeout applied to blocking insertion waits; `None` waits forever
    pub const fn with_insertion_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.insertion_timeout = timeout;
        self
    }

    /// Delay between insertion presence probes
    pub const fn with_insertion_polling_cycle(mut self, cycle: Duration) -> Self {
        self.insertion_polling_cycle = cycle;
        self
    }

    /// Delay between removal ping probes
    pub const fn with_removal_polling_cycle(mut self, cycle: Duration) -> Self {
        self.removal_polling_cycle = cycle;
        self
    }
}

struct ScheduledScenario {
    scenario: CardSelectionScenario,
    notification_mode: NotificationMode,
}

/// Externally visible machine state; one mutex guards the current state,
/// the active job handle and the detection mode. Critical sections only
/// update these fields, they never block on I/O.
struct MonitorShared {
    state: MonitoringState,
    job: Option<JobHandle>,
    mode: DetectionMode,
}

#[derive(Clone)]
struct MonitorContext {
    reader: Arc<Reader>,
    observation: Arc<ObservationRegistry>,
    shared: Arc<Mutex<MonitorShared>>,
    scenario: Arc<Mutex<Option<ScheduledScenario>>>,
    options: MonitoringOptions,
    events: Sender<MonitorMessage>,
}

/// A reader that asynchronously tracks card insertion, processing and
/// removal, and publishes [`ReaderEvent`](crate::observation::ReaderEvent)s
/// to its observers.
pub struct ObservableReader {
    reader: Arc<Reader>,
    observation: Arc<ObservationRegistry>,
    shared: Arc<Mutex<MonitorShared>>,
    scenario: Arc<Mutex<Option<ScheduledScenario>>>,
    events: Sender<MonitorMessage>,
    monitor: Option<thread::JoinHandle<()>>,
}

impl ObservableReader {
    pub(crate) fn new(
        plugin_name: impl Into<String>,
        driver: Arc<dyn ReaderDriver>,
        options: MonitoringOptions,
    ) -> Result<Self> {
        if driver.observation_capabilities().is_none() {
            return Err(Error::illegal_state(format!(
                "reader '{}' is not observable",
                driver.name()
            )));
        }

        let reader = Arc::new(Reader::new(plugin_name, driver));
        let observation = Arc::new(ObservationRegistry::new(
            reader.plugin_name(),
            reader.name(),
        ));
        let shared = Arc::new(Mutex::new(MonitorShared {
            state: MonitoringState::WaitForStartDetection,
            job: None,
            mode: DetectionMode::Repeating,
        }));
        let scenario = Arc::new(Mutex::new(None));
        let (events, receiver) = unbounded();

        let ctx = MonitorContext {
            reader: reader.clone(),
            observation: observation.clone(),
            shared: shared.clone(),
            scenario: scenario.clone(),
            options,
            events: events.clone(),
        };
        let monitor = thread::spawn(move || monitor_loop(&ctx, &receiver));

        Ok(Self {
            reader,
            observation,
            shared,
            scenario,
            events,
            monitor: Some(monitor),
        })
    }

    /// The underlying reader
    pub fn reader(&self) -> &Arc<Reader> {
        &self.reader
    }

    /// Reader name, unique within its plugin
    pub fn name(&self) -> &str {
        self.reader.name()
    }

    /// Start card detection in the given mode
    pub fn start_detection(&self, mode: DetectionMode) {
        debug!(reader = self.name(), mode = ?mode, "starting card detection");
        self.shared.lock().unwrap().mode = mode;
        self.reader.driver().on_start_detection();
        let _ = self
            .events
            .send(MonitorMessage::Event(InternalEvent::StartDetect));
    }

    /// Stop card detection and return to idle
    pub fn stop_detection(&self) {
        debug!(reader = self.name(), "stopping card detection");
        self.reader.driver().on_stop_detection();
        let _ = self
            .events
            .send(MonitorMessage::Event(InternalEvent::StopDetect));
    }

    /// Schedule a selection scenario to run automatically on each card
    /// insertion; replaces any previously scheduled scenario
    pub fn schedule_selection_scenario(
        &self,
        scenario: CardSelectionScenario,
        notification_mode: NotificationMode,
    ) {
        *self.scenario.lock().unwrap() = Some(ScheduledScenario {
            scenario,
            notification_mode,
        });
    }

    /// Drop the scheduled selection scenario, if any
    pub fn clear_selection_scenario(&self) {
        *self.scenario.lock().unwrap() = None;
    }

    /// Signal that the application has finished processing the current card
    pub fn finalize_card_processing(&self) {
        let _ = self
            .events
            .send(MonitorMessage::Event(InternalEvent::CardProcessed));
    }

    /// Current state of the detection state machine
    pub fn monitoring_state(&self) -> MonitoringState {
        self.shared.lock().unwrap().state
    }

    /// Register an observer
    pub fn add_observer(&self, observer: Arc<dyn ReaderObserver>) {
        self.observation.add_observer(observer);
    }

    /// Unregister an observer
    pub fn remove_observer(&self, observer: &Arc<dyn ReaderObserver>) {
        self.observation.remove_observer(observer);
    }

    /// Unregister every observer
    pub fn clear_observers(&self) {
        self.observation.clear_observers();
    }

    /// Number of registered observers
    pub fn count_observers(&self) -> usize {
        self.observation.count_observers()
    }

    /// Install the handler receiving monitoring and observer failures
    pub fn set_observation_error_handler(
        &self,
        handler: Option<Arc<dyn ObservationErrorHandler>>,
    ) {
        self.observation.set_error_handler(handler);
    }
}

impl std::fmt::Debug for ObservableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableReader")
            .field("name", &self.name())
            .field("state", &self.monitoring_state())
            .finish()
    }
}

impl Drop for ObservableReader {
    fn drop(&mut self) {
        let _ = self.events.send(MonitorMessage::Shutdown);
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

fn monitor_loop(ctx: &MonitorContext, receiver: &Receiver<MonitorMessage>) {
    for message in receiver.iter() {
        match message {
            MonitorMessage::Shutdown => break,
            MonitorMessage::Event(event) => handle_event(ctx, event),
        }
    }
    deactivate_job(ctx);
}

fn handle_event(ctx: &MonitorContext, event: InternalEvent) {
    let (current, mode) = {
        let shared = ctx.shared.lock().unwrap();
        (shared.state, shared.mode)
    };
    trace!(
        reader = ctx.reader.name(),
        state = ?current,
        event = ?event,
        "handling monitoring event"
    );

    match (current, event) {
        (MonitoringState::WaitForCardInsertion, InternalEvent::CardInserted) => {
            match process_card_inserted(ctx) {
                Some((kind, result)) => {
                    switch_state(ctx, MonitoringState::WaitForCardProcessing);
                    ctx.observation.publish(kind, result);
                }
                // Nothing to report: close silently and re-arm detection
                None => {
                    let _ = ctx.reader.release_channel();
                    switch_state(ctx, MonitoringState::WaitForCardInsertion);
                }
            }
        }
        (
            MonitoringState::WaitForCardProcessing | MonitoringState::WaitForCardRemoval,
            InternalEvent::CardRemoved,
        ) => {
            let _ = ctx.reader.release_channel();
            let next = match mode {
                DetectionMode::Repeating => MonitoringState::WaitForCardInsertion,
                DetectionMode::Singleshot => MonitoringState::WaitForStartDetection,
            };
            switch_state(ctx, next);
            ctx.observation.publish(ReaderEventKind::CardRemoved, None);
        }
        (
            MonitoringState::WaitForCardInsertion | MonitoringState::WaitForCardRemoval,
            InternalEvent::TimeOut,
        ) => {
            switch_state(ctx, MonitoringState::WaitForStartDetection);
            ctx.observation.publish(ReaderEventKind::Unavailable, None);
        }
        _ => match transition(current, event, mode) {
            Some(next) => switch_state(ctx, next),
            None => trace!(
                reader = ctx.reader.name(),
                state = ?current,
                event = ?event,
                "event ignored in this state"
            ),
        },
    }
}

/// Run the scheduled scenario against the freshly inserted card.
///
/// Returns the event to publish, or `None` when the insertion stays silent
/// (no selector matched under `MatchedOnly`, or the card could not be read).
fn process_card_inserted(
    ctx: &MonitorContext,
) -> Option<(ReaderEventKind, Option<CardSelectionResult>)> {
    let scheduled = ctx.scenario.lock().unwrap();
    match scheduled.as_ref() {
        None => Some((ReaderEventKind::CardInserted, None)),
        Some(scheduled) => match scheduled.scenario.execute(&ctx.reader) {
            Ok(result) if result.has_match() => {
                Some((ReaderEventKind::CardMatched, Some(result)))
            }
            Ok(result) => match scheduled.notification_mode {
                NotificationMode::Always => Some((ReaderEventKind::CardInserted, Some(result))),
                NotificationMode::MatchedOnly => {
                    debug!(
                        reader = ctx.reader.name(),
                        "no selector matched the inserted card"
                    );
                    None
                }
            },
            Err(error) => {
                debug!(
                    reader = ctx.reader.name(),
                    %error,
                    "card selection scenario failed on insertion"
                );
                None
            }
        },
    }
}

/// Deactivate the outgoing state, then activate the incoming one
fn switch_state(ctx: &MonitorContext, next: MonitoringState) {
    deactivate_job(ctx);

    let job = job_for_state(ctx, next);
    let handle = job.map(|job| {
        JobHandle::spawn(
            job,
            JobContext::new(
                ctx.events.clone(),
                ctx.observation.clone(),
                ctx.reader.name(),
            ),
        )
    });

    let mut shared = ctx.shared.lock().unwrap();
    let from = shared.state;
    shared.state = next;
    shared.job = handle;
    drop(shared);

    debug!(
        reader = ctx.reader.name(),
        from = ?from,
        to = ?next,
        "monitoring state switched"
    );
}

fn deactivate_job(ctx: &MonitorContext) {
    let job = ctx.shared.lock().unwrap().job.take();
    if let Some(job) = job {
        job.stop();
        job.join();
    }
}

fn job_for_state(ctx: &MonitorContext, state: MonitoringState) -> Option<Arc<dyn MonitoringJob>> {
    let driver = ctx.reader.driver().clone();
    let capabilities = driver.observation_capabilities().unwrap_or_default();

    match state {
        MonitoringState::WaitForCardInsertion => Some(if capabilities.insertion_callback {
            Arc::new(PushInsertionJob::new(driver))
        } else if capabilities.blocking_insertion {
            Arc::new(BlockingInsertionJob::new(
                driver,
                ctx.options.insertion_timeout,
            ))
        } else {
            Arc::new(PollingInsertionJob::new(
                driver,
                ctx.options.insertion_polling_cycle,
            ))
        }),
        MonitoringState::WaitForCardRemoval => Some(if capabilities.blocking_removal {
            Arc::new(BlockingRemovalJob::new(driver, None))
        } else {
            // Removal probes only run in this state, never while the
            // application is processing the card
            Arc::new(PollingRemovalJob::new(
                driver,
                ctx.options.removal_polling_cycle,
            ))
        }),
        MonitoringState::WaitForStartDetection | MonitoringState::WaitForCardProcessing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::ReaderEvent;
    use crate::reader::driver::mock::MockDriver;
    use crate::selection::{
        CardSelectionRequest, CardSelector, MultiSelectionProcessing,
    };
    use crossbeam_channel::Receiver;
    use hex_literal::hex;
    use std::time::Instant;

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

    fn fast_options() -> MonitoringOptions {
        MonitoringOptions::default()
            .with_insertion_polling_cycle(Duration::from_millis(5))
            .with_removal_polling_cycle(Duration::from_millis(5))
    }

    fn observable_reader(driver: Arc<MockDriver>) -> ObservableReader {
        ObservableReader::new("plugin-1", driver, fast_options()).unwrap()
    }

    fn matching_scenario() -> CardSelectionScenario {
        let mut scenario = CardSelectionScenario::new(MultiSelectionProcessing::FirstMatch);
        scenario
            .prepare_selection(CardSelectionRequest::new(
                CardSelector::builder()
                    .filter_by_aid(hex!("A000000062").to_vec())
                    .build()
                    .unwrap(),
            ))
            .unwrap();
        scenario
    }

    fn wait_for_state(reader: &ObservableReader, expected: MonitoringState) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while reader.monitoring_state() != expected {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {expected:?}, stuck in {:?}",
                reader.monitoring_state()
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn expect_kind(events: &Receiver<ReaderEvent>, expected: ReaderEventKind) -> ReaderEvent {
        let event = events
            .recv_timeout(Duration::from_secs(2))
            .unwrap_or_else(|_| panic!("no {expected:?} event"));
        assert_eq!(event.kind(), expected);
        event
    }

    #[test]
    fn test_non_observable_driver_is_rejected() {
        let driver = Arc::new(MockDriver::new("reader-1"));
        let error =
            ObservableReader::new("plugin-1", driver, MonitoringOptions::default()).unwrap_err();
        assert!(matches!(error, Error::IllegalState(_)));
    }

    #[test]
    fn test_repeating_detection_cycle() {
        let driver = Arc::new(
            MockDriver::new("reader-1")
                .with_power_on_data(&hex!("3B00"))
                .observable(),
        );
        driver.set_card_present(false);
        driver.push_response(&hex!("AA9000"));

        let reader = observable_reader(driver.clone());
        let (observer, events) = RecordingObserver::create();
        reader.add_observer(observer);
        reader.schedule_selection_scenario(matching_scenario(), NotificationMode::MatchedOnly);

        reader.start_detection(DetectionMode::Repeating);
        wait_for_state(&reader, MonitoringState::WaitForCardInsertion);

        driver.set_card_present(true);
        let matched = expect_kind(&events, ReaderEventKind::CardMatched);
        let result = matched.selection_result().unwrap();
        assert_eq!(result.active_index(), Some(0));
        assert_eq!(
            result.active_smart_card().unwrap().fci_bytes(),
            Some(hex!("AA").as_slice())
        );
        wait_for_state(&reader, MonitoringState::WaitForCardProcessing);

        reader.finalize_card_processing();
        wait_for_state(&reader, MonitoringState::WaitForCardRemoval);

        driver.set_card_present(false);
        expect_kind(&events, ReaderEventKind::CardRemoved);
        wait_for_state(&reader, MonitoringState::WaitForCardInsertion);

        // The channel was closed on removal
        assert!(!driver.is_physical_channel_open());
        assert!(events.is_empty());
    }

    #[test]
    fn test_singleshot_detection_returns_to_idle() {
        let driver = Arc::new(
            MockDriver::new("reader-1")
                .with_power_on_data(&hex!("3B00"))
                .observable(),
        );
        driver.set_card_present(false);
        driver.push_response(&hex!("AA9000"));

        let reader = observable_reader(driver.clone());
        let (observer, events) = RecordingObserver::create();
        reader.add_observer(observer);
        reader.schedule_selection_scenario(matching_scenario(), NotificationMode::MatchedOnly);

        reader.start_detection(DetectionMode::Singleshot);
        wait_for_state(&reader, MonitoringState::WaitForCardInsertion);

        driver.set_card_present(true);
        expect_kind(&events, ReaderEventKind::CardMatched);
        reader.finalize_card_processing();
        wait_for_state(&reader, MonitoringState::WaitForCardRemoval);

        driver.set_card_present(false);
        expect_kind(&events, ReaderEventKind::CardRemoved);
        wait_for_state(&reader, MonitoringState::WaitForStartDetection);
    }

    #[test]
    fn test_insertion_without_scenario_notifies_card_inserted() {
        let driver = Arc::new(MockDriver::new("reader-1").observable());
        driver.set_card_present(false);

        let reader = observable_reader(driver.clone());
        let (observer, events) = RecordingObserver::create();
        reader.add_observer(observer);

        reader.start_detection(DetectionMode::Repeating);
        wait_for_state(&reader, MonitoringState::WaitForCardInsertion);

        driver.set_card_present(true);
        let event = expect_kind(&events, ReaderEventKind::CardInserted);
        assert!(event.selection_result().is_none());
        wait_for_state(&reader, MonitoringState::WaitForCardProcessing);
    }

    #[test]
    fn test_stop_detection_returns_to_idle() {
        let driver = Arc::new(MockDriver::new("reader-1").observable());
        driver.set_card_present(false);

        let reader = observable_reader(driver);
        reader.start_detection(DetectionMode::Repeating);
        wait_for_state(&reader, MonitoringState::WaitForCardInsertion);

        reader.stop_detection();
        wait_for_state(&reader, MonitoringState::WaitForStartDetection);
    }

    #[test]
    fn test_unmatched_card_stays_silent_and_rearms() {
        let driver = Arc::new(
            MockDriver::new("reader-1")
                .with_power_on_data(&hex!("3B00"))
                .with_default_response(&hex!("6A82"))
                .observable(),
        );
        driver.set_card_present(false);

        let reader = observable_reader(driver.clone());
        let (observer, events) = RecordingObserver::create();
        reader.add_observer(observer);
        reader.schedule_selection_scenario(matching_scenario(), NotificationMode::MatchedOnly);

        reader.start_detection(DetectionMode::Repeating);
        wait_for_state(&reader, MonitoringState::WaitForCardInsertion);

        driver.set_card_present(true);
        // Give the machine time to process at least one insertion
        thread::sleep(Duration::from_millis(50));
        assert!(events.is_empty());
        assert_eq!(
            reader.monitoring_state(),
            MonitoringState::WaitForCardInsertion
        );
    }

    #[test]
    fn test_observer_bookkeeping() {
        let driver = Arc::new(MockDriver::new("reader-1").observable());
        let reader = observable_reader(driver);

        let (observer, _events) = RecordingObserver::create();
        let observer_dyn: Arc<dyn ReaderObserver> = observer;
        reader.add_observer(observer_dyn.clone());
        assert_eq!(reader.count_observers(), 1);
        reader.remove_observer(&observer_dyn);
        assert_eq!(reader.count_observers(), 0);
    }
}
