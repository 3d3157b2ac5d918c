//! The monitoring job implementations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::monitoring::{InternalEvent, JobContext, MonitoringJob};
use crate::reader::driver::ReaderDriver;

/// Delay between presence probes when a driver offers no native detection
pub(crate) const DEFAULT_POLLING_CYCLE: Duration = Duration::from_millis(200);

/// Waits inside the driver's blocking insertion call
pub(crate) struct BlockingInsertionJob {
    driver: Arc<dyn ReaderDriver>,
    timeout: Option<Duration>,
    stopped: AtomicBool,
}

impl BlockingInsertionJob {
    pub(crate) fn new(driver: Arc<dyn ReaderDriver>, timeout: Option<Duration>) -> Self {
        Self {
            driver,
            timeout,
            stopped: AtomicBool::new(false),
        }
    }
}

impl MonitoringJob for BlockingInsertionJob {
    fn name(&self) -> &'static str {
        "insertion-wait"
    }

    fn run(&self, ctx: &JobContext) {
        debug!(reader = self.driver.name(), "waiting for card insertion");
        match self.driver.wait_for_card_insertion(self.timeout) {
            Ok(true) => ctx.emit(InternalEvent::CardInserted),
            Ok(false) => ctx.emit(InternalEvent::TimeOut),
            Err(error) => {
                // Interrupted waits are expected on deactivation
                if !self.stopped.load(Ordering::SeqCst) {
                    ctx.report_error(error);
                }
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.driver.interrupt_wait();
    }
}

/// Waits inside the driver's blocking removal call
pub(crate) struct BlockingRemovalJob {
    driver: Arc<dyn ReaderDriver>,
    timeout: Option<Duration>,
    stopped: AtomicBool,
}

impl BlockingRemovalJob {
    pub(crate) fn new(driver: Arc<dyn ReaderDriver>, timeout: Option<Duration>) -> Self {
        Self {
            driver,
            timeout,
            stopped: AtomicBool::new(false),
        }
    }
}

impl MonitoringJob for BlockingRemovalJob {
    fn name(&self) -> &'static str {
        "removal-wait"
    }

    fn run(&self, ctx: &JobContext) {
        debug!(reader = self.driver.name(), "waiting for card removal");
        match self.driver.wait_for_card_removal(self.timeout) {
            Ok(true) => ctx.emit(InternalEvent::CardRemoved),
            Ok(false) => ctx.emit(InternalEvent::TimeOut),
            Err(error) => {
                if !self.stopped.load(Ordering::SeqCst) {
                    ctx.report_error(error);
                }
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.driver.interrupt_wait();
    }
}

/// Probes card presence on a fixed cycle until a card shows up
pub(crate) struct PollingInsertionJob {
    driver: Arc<dyn ReaderDriver>,
    cycle: Duration,
    running: AtomicBool,
}

impl PollingInsertionJob {
    pub(crate) fn new(driver: Arc<dyn ReaderDriver>, cycle: Duration) -> Self {
        Self {
            driver,
            cycle,
            running: AtomicBool::new(false),
        }
    }
}

impl MonitoringJob for PollingInsertionJob {
    fn name(&self) -> &'static str {
        "insertion-polling"
    }

    fn run(&self, ctx: &JobContext) {
        // An earlier stop() must not prevent this run
        self.running.store(true, Ordering::SeqCst);
        debug!(reader = self.driver.name(), "polling for card insertion");
        while self.running.load(Ordering::SeqCst) {
            match self.driver.is_card_present() {
                Ok(true) => {
                    ctx.emit(InternalEvent::CardInserted);
                    return;
                }
                Ok(false) => {}
                Err(error) => {
                    ctx.report_error(error);
                    return;
                }
            }
            thread::sleep(self.cycle);
        }
        debug!(reader = self.driver.name(), "insertion polling stopped");
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Pings the card with a neutral APDU on a fixed cycle and reports removal
/// as soon as the card stops responding
pub(crate) struct PollingRemovalJob {
    driver: Arc<dyn ReaderDriver>,
    cycle: Duration,
    running: AtomicBool,
}

impl PollingRemovalJob {
    pub(crate) fn new(driver: Arc<dyn ReaderDriver>, cycle: Duration) -> Self {
        Self {
            driver,
            cycle,
            running: AtomicBool::new(false),
        }
    }
}

impl MonitoringJob for PollingRemovalJob {
    fn name(&self) -> &'static str {
        "removal-polling"
    }

    fn run(&self, ctx: &JobContext) {
        self.running.store(true, Ordering::SeqCst);
        debug!(reader = self.driver.name(), "polling card presence");
        let mut retries: u64 = 0;
        while self.running.load(Ordering::SeqCst) {
            if !self.driver.is_card_present_ping() {
                debug!(reader = self.driver.name(), "card stopped responding");
                ctx.emit(InternalEvent::CardRemoved);
                return;
            }
            retries += 1;
            trace!(reader = self.driver.name(), retries, "card still present");
            thread::sleep(self.cycle);
        }
        debug!(reader = self.driver.name(), "removal polling stopped");
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Registers a driver callback and lets the driver push insertions itself
pub(crate) struct PushInsertionJob {
    driver: Arc<dyn ReaderDriver>,
}

impl PushInsertionJob {
    pub(crate) fn new(driver: Arc<dyn ReaderDriver>) -> Self {
        Self { driver }
    }
}

impl MonitoringJob for PushInsertionJob {
    fn name(&self) -> &'static str {
        "insertion-callback"
    }

    fn run(&self, ctx: &JobContext) {
        debug!(reader = self.driver.name(), "registering insertion callback");
        let events = ctx.clone();
        self.driver
            .set_insertion_listener(Some(Box::new(move || {
                events.emit(InternalEvent::CardInserted);
            })));
    }

    fn stop(&self) {
        self.driver.set_insertion_listener(None);
    }
}
