//! Grouped selection of two applications sharing one AID prefix
//!
//! Both applications are selected in a single scenario using the
//! first/next navigation options; the result holds one smart card per
//! matched selector. Runs against an in-memory card so no hardware is
//! needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cardium_core::prelude::*;
use cardium_core::Bytes;
use cardium_generic::GenericExtension;
use tracing::info;

/// A card hosting two applications under the AID `A000000062`
#[derive(Debug, Default)]
struct TwoApplicationCard {
    channel_open: AtomicBool,
}

impl ReaderDriver for TwoApplicationCard {
    fn name(&self) -> &str {
        "memory-reader"
    }

    fn is_card_present(&self) -> Result<bool> {
        Ok(true)
    }

    fn is_card_present_ping(&self) -> bool {
        true
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
        // Select-Application: P2 bit 2 distinguishes first from next
        if apdu.len() >= 4 && apdu[1] == 0xA4 {
            return match apdu[3] & 0x03 {
                0x00 => Ok(Bytes::from_static(&[0xAA, 0x90, 0x00])),
                0x02 => Ok(Bytes::from_static(&[0xBB, 0x90, 0x00])),
                _ => Ok(Bytes::from_static(&[0x6A, 0x82])),
            };
        }
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }

    fn power_on_data(&self) -> Bytes {
        Bytes::from_static(&[0x3B, 0x8F, 0x80, 0x01])
    }

    fn activate_protocol(&self, _protocol: &str) -> Result<()> {
        Ok(())
    }

    fn deactivate_protocol(&self, _protocol: &str) -> Result<()> {
        Ok(())
    }
}

struct MemoryPluginFactory;

impl PluginFactory for MemoryPluginFactory {
    fn plugin_name(&self) -> String {
        "memory-plugin".to_string()
    }

    fn create_drivers(&self) -> Result<Vec<Arc<dyn ReaderDriver>>> {
        Ok(vec![Arc::new(TwoApplicationCard::default())])
    }
}

const AID: [u8; 5] = [0xA0, 0x00, 0x00, 0x00, 0x62];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let service = SmartCardService::new();
    let plugin = service.register_plugin(&MemoryPluginFactory)?;
    let reader = plugin.reader("memory-reader")?;

    let extension = GenericExtension::new();
    service.check_card_extension(&extension)?;

    if !reader.is_card_present()? {
        return Err(Error::illegal_state("no card is present in the reader"));
    }

    // Two selections on the same AID: first occurrence, then next
    let mut scenario = CardSelectionScenario::new(MultiSelectionProcessing::ProcessAll);
    scenario.prepare_selection(extension.create_card_selection(
        CardSelector::builder()
            .filter_by_aid(AID.to_vec())
            .file_occurrence(FileOccurrence::First)
            .build()?,
    )?)?;
    scenario.prepare_selection(extension.create_card_selection(
        CardSelector::builder()
            .filter_by_aid(AID.to_vec())
            .file_occurrence(FileOccurrence::Next)
            .build()?,
    )?)?;
    scenario.prepare_release_channel();

    let result = scenario.process(&reader)?;

    for (index, card) in result.smart_cards() {
        info!(
            index,
            active = result.active_index() == Some(*index),
            power_on_data = card.power_on_data().unwrap_or("none"),
            fci = %card.fci_bytes().map(hex::encode_upper).unwrap_or_else(|| "none".to_string()),
            "selection result"
        );
    }

    Ok(())
}
