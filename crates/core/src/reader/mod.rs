//! Readers and their drivers
//!
//! A [`Reader`] pairs a [`ReaderDriver`] with the channel policy of the
//! terminal service. Observable readers additionally run the card detection
//! state machine; see [`ObservableReader`].

pub(crate) mod channel;
pub mod driver;
mod observable;

pub use driver::{InsertionListener, ObservationCapabilities, ReaderDriver};
pub use observable::{MonitoringOptions, ObservableReader};

use std::sync::Arc;

use crate::card::{CardRequest, CardResponse, ChannelControl};
use crate::error::Result;
use channel::ChannelController;

/// A smart-card reader as seen by application code.
///
/// The reader exclusively owns its driver handle. The selection pipeline
/// borrows a reader for the duration of one scenario and never retains it.
#[derive(Debug)]
pub struct Reader {
    plugin_name: String,
    name: String,
    driver: Arc<dyn ReaderDriver>,
    channel: ChannelController,
}

impl Reader {
    pub(crate) fn new(plugin_name: impl Into<String>, driver: Arc<dyn ReaderDriver>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            name: driver.name().to_string(),
            channel: ChannelController::new(driver.clone()),
            driver,
        }
    }

    /// Reader name, unique within its plugin
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the plugin that produced this reader
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Check whether a card is physically present
    pub fn is_card_present(&self) -> Result<bool> {
        self.driver.is_card_present()
    }

    /// Check whether the physical channel is open
    pub fn is_physical_channel_open(&self) -> bool {
        self.driver.is_physical_channel_open()
    }

    /// Hex-encoded power-on data of the current card; `None` when the card
    /// provides none (common for contactless readers)
    pub fn power_on_data(&self) -> Option<String> {
        let data = self.driver.power_on_data();
        if data.is_empty() {
            None
        } else {
            Some(hex::encode_upper(data))
        }
    }

    /// Activate a card protocol on the reader
    pub fn activate_protocol(&self, protocol: &str) -> Result<()> {
        self.driver.activate_protocol(protocol)
    }

    /// Deactivate a card protocol on the reader
    pub fn deactivate_protocol(&self, protocol: &str) -> Result<()> {
        self.driver.deactivate_protocol(protocol)
    }

    /// Execute a grouped APDU exchange under the given channel policy
    pub fn transmit_card_request(
        &self,
        request: &CardRequest,
        channel_control: ChannelControl,
    ) -> Result<CardResponse> {
        self.channel.transmit_card_request(request, channel_control)
    }

    /// Close the physical channel, ending the current card session
    pub fn release_channel(&self) -> Result<()> {
        self.channel.close_physical_channel()
    }

    pub(crate) fn channel(&self) -> &ChannelController {
        &self.channel
    }

    pub(crate) fn driver(&self) -> &Arc<dyn ReaderDriver> {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver::mock::MockDriver;
    use hex_literal::hex;

    #[test]
    fn test_power_on_data_hex_encoding() {
        let reader = Reader::new(
            "plugin-1",
            Arc::new(MockDriver::new("reader-1").with_power_on_data(&hex!("3B8F8001"))),
        );
        assert_eq!(reader.power_on_data().as_deref(), Some("3B8F8001"));
    }

    #[test]
    fn test_missing_power_on_data() {
        let reader = Reader::new("plugin-1", Arc::new(MockDriver::new("reader-1")));
        assert_eq!(reader.power_on_data(), None);
    }

    #[test]
    fn test_release_channel() {
        let reader = Reader::new("plugin-1", Arc::new(MockDriver::new("reader-1")));
        reader.channel().ensure_physical_channel().unwrap();
        assert!(reader.is_physical_channel_open());
        reader.release_channel().unwrap();
        assert!(!reader.is_physical_channel_open());
    }
}
