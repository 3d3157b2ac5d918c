//! Card presence monitoring
//!
//! Background jobs watch one reader for card insertion and removal and feed
//! internal events to the reader's state machine. Exactly one job is active
//! per state that needs one; jobs are interchangeable so a reader uses the
//! best detection its driver offers and falls back to active polling.

pub(crate) mod jobs;
pub(crate) mod state;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use tracing::{trace, warn};

use crate::error::Error;
use crate::observation::{panic_message, ObservationRegistry};

/// The states of the reader monitoring state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringState {
    /// Idle, waiting for a start signal to enter card detection
    WaitForStartDetection,
    /// Detection running, waiting for a card to be presented
    WaitForCardInsertion,
    /// Waiting for the application to finish processing the card
    WaitForCardProcessing,
    /// Waiting for the card to be removed
    WaitForCardRemoval,
}

/// Behavior once a processed card is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Loop back and wait for the next card
    Repeating,
    /// Return to idle after one card
    Singleshot,
}

/// Notification policy for a scheduled selection scenario that matched
/// nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMode {
    /// Notify the insertion even when no selector matched
    Always,
    /// Stay silent unless a selector matched
    MatchedOnly,
}

/// Events exchanged between monitoring jobs and the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalEvent {
    StartDetect,
    StopDetect,
    CardInserted,
    CardProcessed,
    CardRemoved,
    TimeOut,
}

/// Messages consumed by a reader's monitor thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorMessage {
    Event(InternalEvent),
    Shutdown,
}

/// Environment handed to a running monitoring job
#[derive(Clone)]
pub(crate) struct JobContext {
    events: Sender<MonitorMessage>,
    observation: Arc<ObservationRegistry>,
    reader_name: String,
}

impl JobContext {
    pub(crate) fn new(
        events: Sender<MonitorMessage>,
        observation: Arc<ObservationRegistry>,
        reader_name: impl Into<String>,
    ) -> Self {
        Self {
            events,
            observation,
            reader_name: reader_name.into(),
        }
    }

    /// Post an internal event to the state machine
    pub(crate) fn emit(&self, event: InternalEvent) {
        trace!(reader = %self.reader_name, event = ?event, "monitoring event");
        let _ = self.events.send(MonitorMessage::Event(event));
    }

    /// Route a job failure to the observation error handler
    pub(crate) fn report_error(&self, error: Error) {
        self.observation.notify_error(error);
    }
}

/// A background task attached to one monitoring state.
///
/// `stop()` is idempotent and non-blocking; it eventually causes the job
/// thread to finish, bounding [`JobHandle::join`].
pub(crate) trait MonitoringJob: Send + Sync {
    /// Short job name, used for tracing
    fn name(&self) -> &'static str;

    /// Body of the job; runs on a dedicated thread
    fn run(&self, ctx: &JobContext);

    /// Request termination; safe to call at any time, any number of times
    fn stop(&self);
}

/// Owner of a spawned monitoring job thread
pub(crate) struct JobHandle {
    job: Arc<dyn MonitoringJob>,
    thread: Option<thread::JoinHandle<()>>,
}

impl JobHandle {
    /// Spawn the job on its own thread; panics inside the job are caught
    /// and routed to the observation error handler
    pub(crate) fn spawn(job: Arc<dyn MonitoringJob>, ctx: JobContext) -> Self {
        let runner = job.clone();
        let thread = thread::spawn(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| runner.run(&ctx))) {
                let message = panic_message(payload);
                warn!(
                    reader = %ctx.reader_name,
                    job = runner.name(),
                    panic = %message,
                    "monitoring job panicked"
                );
                ctx.report_error(Error::illegal_state(format!(
                    "monitoring job '{}' panicked: {message}",
                    runner.name()
                )));
            }
        });
        Self {
            job,
            thread: Some(thread),
        }
    }

    /// Ask the job to terminate; non-blocking
    pub(crate) fn stop(&self) {
        self.job.stop();
    }

    /// Wait for the job thread to finish
    pub(crate) fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
