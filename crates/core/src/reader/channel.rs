//! Channel state tracking and card request execution
//!
//! The controller owns the channel policy for one reader: it lazily opens
//! the physical channel, tracks the logical channel flag, and runs grouped
//! APDU exchanges with early stop and close-after semantics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::apdu::ApduResponse;
use crate::card::{CardRequest, CardResponse, ChannelControl};
use crate::error::Result;
use crate::reader::driver::ReaderDriver;

#[derive(Debug)]
pub(crate) struct ChannelController {
    driver: Arc<dyn ReaderDriver>,
    logical_channel_open: AtomicBool,
}

impl ChannelController {
    pub(crate) fn new(driver: Arc<dyn ReaderDriver>) -> Self {
        Self {
            driver,
            logical_channel_open: AtomicBool::new(false),
        }
    }

    /// Open the physical channel if the driver reports it closed
    pub(crate) fn ensure_physical_channel(&self) -> Result<()> {
        if !self.driver.is_physical_channel_open() {
            debug!(reader = self.driver.name(), "opening physical channel");
            self.driver.open_physical_channel()?;
        }
        Ok(())
    }

    /// Close the physical channel; the logical channel flag is reset even
    /// when the driver reports a close failure
    pub(crate) fn close_physical_channel(&self) -> Result<()> {
        self.logical_channel_open.store(false, Ordering::SeqCst);
        if self.driver.is_physical_channel_open() {
            debug!(reader = self.driver.name(), "closing physical channel");
            self.driver.close_physical_channel()?;
        }
        Ok(())
    }

    pub(crate) fn is_logical_channel_open(&self) -> bool {
        self.logical_channel_open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_logical_channel_open(&self, open: bool) {
        self.logical_channel_open.store(open, Ordering::SeqCst);
    }

    /// Execute a card request.
    ///
    /// APDUs run in order; when an unaccepted status word arrives and the
    /// request asks for it, the exchange stops and the partial response is
    /// returned. With [`ChannelControl::CloseAfter`] the physical channel is
    /// closed on both the success and the failure path.
    pub(crate) fn transmit_card_request(
        &self,
        request: &CardRequest,
        channel_control: ChannelControl,
    ) -> Result<CardResponse> {
        self.ensure_physical_channel()?;

        let outcome = self.execute_apdus(request);

        if channel_control == ChannelControl::CloseAfter {
            let close_result = self.close_physical_channel();
            if outcome.is_ok() {
                close_result?;
            }
        }

        let apdu_responses = outcome?;
        Ok(CardResponse::new(
            apdu_responses,
            channel_control == ChannelControl::KeepOpen,
        ))
    }

    fn execute_apdus(&self, request: &CardRequest) -> Result<Vec<ApduResponse>> {
        let mut apdu_responses = Vec::with_capacity(request.apdu_requests().len());

        for apdu in request.apdu_requests() {
            trace!(
                reader = self.driver.name(),
                apdu = %hex::encode_upper(apdu.bytes()),
                info = apdu.info().unwrap_or(""),
                "transmitting APDU"
            );
            let raw = self.driver.transmit_apdu(apdu.bytes())?;
            let response = ApduResponse::from_bytes(raw)?;
            let status_word = response.status_word();
            trace!(
                reader = self.driver.name(),
                response = %hex::encode_upper(response.bytes()),
                "received APDU response"
            );

            let accepted = apdu.is_successful(status_word);
            apdu_responses.push(response);

            if !accepted && request.stop_on_unsuccessful_status_word() {
                debug!(
                    reader = self.driver.name(),
                    status_word = %status_word,
                    "stopping card request on unaccepted status word"
                );
                break;
            }
        }

        Ok(apdu_responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::ApduRequest;
    use crate::reader::driver::mock::MockDriver;
    use hex_literal::hex;

    fn controller_with(driver: MockDriver) -> (Arc<MockDriver>, ChannelController) {
        let driver = Arc::new(driver);
        let controller = ChannelController::new(driver.clone());
        (driver, controller)
    }

    fn request_of(apdus: &[&[u8]]) -> CardRequest {
        CardRequest::new(apdus.iter().map(|a| ApduRequest::new(a.to_vec())).collect())
    }

    #[test]
    fn test_opens_physical_channel_on_demand() {
        let (driver, controller) = controller_with(MockDriver::new("reader-1"));
        assert!(!driver.is_physical_channel_open());

        let request = request_of(&[&hex!("00B2014C00")]);
        controller
            .transmit_card_request(&request, ChannelControl::KeepOpen)
            .unwrap();

        assert!(driver.is_physical_channel_open());
    }

    #[test]
    fn test_close_after_on_success() {
        let (driver, controller) = controller_with(MockDriver::new("reader-1"));

        let request = request_of(&[&hex!("00B2014C00")]);
        let response = controller
            .transmit_card_request(&request, ChannelControl::CloseAfter)
            .unwrap();

        assert!(!driver.is_physical_channel_open());
        assert!(!response.is_logical_channel_open());
    }

    #[test]
    fn test_close_after_on_failure() {
        let (driver, controller) = controller_with(MockDriver::new("reader-1"));
        controller.ensure_physical_channel().unwrap();
        driver.set_fail_transmit(true);

        let request = request_of(&[&hex!("00B2014C00")]);
        let error = controller
            .transmit_card_request(&request, ChannelControl::CloseAfter)
            .unwrap_err();

        assert!(error.is_card_communication());
        assert!(!driver.is_physical_channel_open());
    }

    #[test]
    fn test_early_stop_returns_partial_response() {
        let (driver, controller) = controller_with(MockDriver::new("reader-1"));
        driver.push_response(&hex!("9000"));
        driver.push_response(&hex!("6A82"));
        driver.push_response(&hex!("9000"));

        let request = request_of(&[&hex!("00B2014C00"), &hex!("00B2024C00"), &hex!("00B2034C00")])
            .with_stop_on_unsuccessful_status_word(true);
        let response = controller
            .transmit_card_request(&request, ChannelControl::KeepOpen)
            .unwrap();

        assert_eq!(response.apdu_responses().len(), 2);
        assert_eq!(response.apdu_responses()[1].status_word().to_u16(), 0x6A82);
        assert!(response.is_logical_channel_open());
        assert_eq!(driver.transmitted_commands().len(), 2);
    }

    #[test]
    fn test_unaccepted_status_word_without_stop_flag() {
        let (driver, controller) = controller_with(MockDriver::new("reader-1"));
        driver.push_response(&hex!("6A82"));
        driver.push_response(&hex!("9000"));

        let request = request_of(&[&hex!("00B2014C00"), &hex!("00B2024C00")]);
        let response = controller
            .transmit_card_request(&request, ChannelControl::KeepOpen)
            .unwrap();

        assert_eq!(response.apdu_responses().len(), 2);
    }

    #[test]
    fn test_unusable_reader_error() {
        let (driver, controller) = controller_with(MockDriver::new("reader-1"));
        driver.set_fail_open(true);

        let request = request_of(&[&hex!("00B2014C00")]);
        let error = controller
            .transmit_card_request(&request, ChannelControl::KeepOpen)
            .unwrap_err();

        assert!(error.is_reader_communication());
    }

    #[test]
    fn test_logical_channel_reset_on_close() {
        let (_driver, controller) = controller_with(MockDriver::new("reader-1"));
        controller.set_logical_channel_open(true);
        assert!(controller.is_logical_channel_open());

        controller.close_physical_channel().unwrap();
        assert!(!controller.is_logical_channel_open());
    }
}
