//! Observable reader demo: scheduled selection and event dispatch
//!
//! A background thread simulates a card being presented and withdrawn
//! twice; the observer logs the matched selections and removals as they
//! are published. Runs against an in-memory card so no hardware is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cardium_core::prelude::*;
use cardium_core::Bytes;
use cardium_generic::GenericExtension;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct RemovableCard {
    present: AtomicBool,
    channel_open: AtomicBool,
}

impl RemovableCard {
    fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }
}

impl ReaderDriver for RemovableCard {
    fn name(&self) -> &str {
        "memory-reader"
    }

    fn is_card_present(&self) -> Result<bool> {
        Ok(self.present.load(Ordering::SeqCst))
    }

    fn is_card_present_ping(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    fn open_physical_channel(&self) -> Result<()> {
        self.channel_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close_physical_channel(&self) -> Result<()> {
        self.channel_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_physical_channel_open(&self) -> bool {
        self.channel_open.load(Ordering::SeqCst)
    }

    fn transmit_apdu(&self, apdu: &[u8]) -> Result<Bytes> {
        if !self.present.load(Ordering::SeqCst) {
            return Err(Error::card_communication("card removed"));
        }
        if apdu.len() >= 4 && apdu[1] == 0xA4 {
            return Ok(Bytes::from_static(&[0xCC, 0x90, 0x00]));
        }
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }

    fn power_on_data(&self) -> Bytes {
        Bytes::from_static(&[0x3B, 0x00])
    }

    fn activate_protocol(&self, _protocol: &str) -> Result<()> {
        Ok(())
    }

    fn deactivate_protocol(&self, _protocol: &str) -> Result<()> {
        Ok(())
    }

    fn observation_capabilities(&self) -> Option<ObservationCapabilities> {
        // No native detection: the reader falls back to active polling
        Some(ObservationCapabilities::default())
    }
}

struct MemoryPluginFactory {
    driver: Arc<RemovableCard>,
}

impl PluginFactory for MemoryPluginFactory {
    fn plugin_name(&self) -> String {
        "memory-plugin".to_string()
    }

    fn create_drivers(&self) -> Result<Vec<Arc<dyn ReaderDriver>>> {
        Ok(vec![self.driver.clone()])
    }
}

struct LoggingObserver;

impl ReaderObserver for LoggingObserver {
    fn on_reader_event(&self, event: &ReaderEvent) {
        match event.kind() {
            ReaderEventKind::CardMatched => {
                let fci = event
                    .selection_result()
                    .and_then(CardSelectionResult::active_smart_card)
                    .and_then(SmartCard::fci_bytes)
                    .map(hex::encode_upper);
                info!(
                    reader = event.reader_name(),
                    fci = fci.as_deref().unwrap_or("none"),
                    "card matched"
                );
            }
            kind => info!(reader = event.reader_name(), kind = ?kind, "reader event"),
        }
    }
}

struct LoggingErrorHandler;

impl ObservationErrorHandler for LoggingErrorHandler {
    fn on_reader_observation_error(&self, plugin_name: &str, reader_name: &str, error: Error) {
        warn!(plugin_name, reader_name, %error, "observation error");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let driver = Arc::new(RemovableCard::default());
    let service = SmartCardService::new();
    let plugin = service.register_plugin(&MemoryPluginFactory {
        driver: driver.clone(),
    })?;
    let reader = plugin.observable_reader("memory-reader")?;

    reader.add_observer(Arc::new(LoggingObserver));
    reader.set_observation_error_handler(Some(Arc::new(LoggingErrorHandler)));

    let extension = GenericExtension::new();
    let mut scenario = CardSelectionScenario::new(MultiSelectionProcessing::FirstMatch);
    scenario.prepare_selection(extension.create_card_selection(
        CardSelector::builder()
            .filter_by_aid(vec![0xA0, 0x00, 0x00, 0x00, 0x62])
            .build()?,
    )?)?;
    reader.schedule_selection_scenario(scenario, NotificationMode::MatchedOnly);

    reader.start_detection(DetectionMode::Repeating);
    info!("detection started, presenting cards");

    // Present and withdraw a card twice
    for _ in 0..2 {
        thread::sleep(Duration::from_millis(400));
        driver.set_present(true);
        thread::sleep(Duration::from_millis(400));
        reader.finalize_card_processing();
        thread::sleep(Duration::from_millis(400));
        driver.set_present(false);
    }

    thread::sleep(Duration::from_millis(400));
    reader.stop_detection();
    info!("detection stopped");

    Ok(())
}
