//! Generic card extension for the cardium terminal service
//!
//! This extension covers cards with no dedicated extension: it turns a
//! [`CardSelector`] into a [`CardSelectionRequest`], optionally bundling raw
//! follow-up APDUs, and offers a [`CardTransaction`] helper to exchange
//! prepared APDUs with an already selected card.
//!
//! ## Example
//!
//! ```no_run
//! use cardium_core::prelude::*;
//! use cardium_generic::GenericCardSelection;
//! # fn reader() -> std::sync::Arc<cardium_core::reader::Reader> { unimplemented!() }
//!
//! # fn main() -> cardium_core::Result<()> {
//! let selector = CardSelector::builder()
//!     .filter_by_aid(vec![0xA0, 0x00, 0x00, 0x00, 0x62])
//!     .build()?;
//!
//! let mut scenario = CardSelectionScenario::new(MultiSelectionProcessing::FirstMatch);
//! scenario.prepare_selection(
//!     GenericCardSelection::new(selector)
//!         .prepare_apdu_hex("00B2014C00")?
//!         .into_selection_request(),
//! )?;
//!
//! let result = scenario.process(&reader())?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

use bytes::Bytes;
use tracing::debug;

use cardium_core::extension::{SERVICE_API_VERSION_MAJOR, SERVICE_API_VERSION_MINOR};
use cardium_core::prelude::*;
use cardium_core::reader::Reader;

/// The generic card extension
#[derive(Debug, Default)]
pub struct GenericExtension;

impl GenericExtension {
    /// Create the extension
    pub fn new() -> Self {
        Self
    }
}

impl CardExtension for GenericExtension {
    fn create_card_selection(&self, selector: CardSelector) -> Result<CardSelectionRequest> {
        Ok(CardSelectionRequest::new(selector))
    }

    fn check_service_version(&self, major: u16, minor: u16) -> Result<()> {
        if major != SERVICE_API_VERSION_MAJOR || minor < SERVICE_API_VERSION_MINOR {
            return Err(Error::illegal_state(format!(
                "service API {major}.{minor} is incompatible with extension API \
                 {SERVICE_API_VERSION_MAJOR}.{SERVICE_API_VERSION_MINOR}"
            )));
        }
        Ok(())
    }
}

/// Builder of a selection request with raw follow-up APDUs
#[derive(Debug)]
pub struct GenericCardSelection {
    selector: CardSelector,
    apdu_requests: Vec<ApduRequest>,
    stop_on_unsuccessful_status_word: bool,
}

impl GenericCardSelection {
    /// Start a selection for the given selector
    pub fn new(selector: CardSelector) -> Self {
        Self {
            selector,
            apdu_requests: Vec::new(),
            stop_on_unsuccessful_status_word: false,
        }
    }

    /// Append a raw APDU to send after a successful selection
    pub fn prepare_apdu(mut self, apdu: impl Into<Bytes>) -> Self {
        self.apdu_requests.push(ApduRequest::new(apdu.into()));
        self
    }

    /// Append a hex-encoded APDU to send after a successful selection
    pub fn prepare_apdu_hex(self, apdu: &str) -> Result<Self> {
        let bytes = hex::decode(apdu)
            .map_err(|e| Error::illegal_state(format!("invalid hex APDU '{apdu}': {e}")))?;
        Ok(self.prepare_apdu(bytes))
    }

    /// Stop the follow-up exchange on the first unaccepted status word
    pub const fn with_stop_on_unsuccessful_status_word(mut self, stop: bool) -> Self {
        self.stop_on_unsuccessful_status_word = stop;
        self
    }

    /// Build the selection request for the scenario
    pub fn into_selection_request(self) -> CardSelectionRequest {
        let request = CardSelectionRequest::new(self.selector);
        if self.apdu_requests.is_empty() {
            return request;
        }
        request.with_card_request(
            CardRequest::new(self.apdu_requests)
                .with_stop_on_unsuccessful_status_word(self.stop_on_unsuccessful_status_word),
        )
    }
}

/// Exchange of prepared APDUs with an already selected card.
///
/// In strict mode (the default) any response carrying an unaccepted status
/// word aborts the exchange with [`Error::UnexpectedStatusWord`].
#[derive(Debug)]
pub struct CardTransaction<'a> {
    reader: &'a Reader,
    apdu_requests: Vec<ApduRequest>,
    strict: bool,
}

impl<'a> CardTransaction<'a> {
    /// Start a transaction on the given reader
    pub fn new(reader: &'a Reader) -> Self {
        Self {
            reader,
            apdu_requests: Vec::new(),
            strict: true,
        }
    }

    /// Toggle strict status word checking
    pub const fn with_strict_status_check(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Queue a raw APDU
    pub fn prepare_apdu(&mut self, apdu: impl Into<Bytes>) -> &mut Self {
        self.apdu_requests.push(ApduRequest::new(apdu.into()));
        self
    }

    /// Queue a raw APDU with additional accepted status words
    pub fn prepare_apdu_request(&mut self, request: ApduRequest) -> &mut Self {
        self.apdu_requests.push(request);
        self
    }

    /// Queue a hex-encoded APDU
    pub fn prepare_apdu_hex(&mut self, apdu: &str) -> Result<&mut Self> {
        let bytes = hex::decode(apdu)
            .map_err(|e| Error::illegal_state(format!("invalid hex APDU '{apdu}': {e}")))?;
        Ok(self.prepare_apdu(bytes))
    }

    /// Send the queued APDUs and return their responses.
    ///
    /// The queue is drained whatever the outcome; the physical channel
    /// follows `channel_control`.
    pub fn process(&mut self, channel_control: ChannelControl) -> Result<Vec<ApduResponse>> {
        let requests = std::mem::take(&mut self.apdu_requests);
        if requests.is_empty() {
            return Err(Error::illegal_state("no APDU prepared in the transaction"));
        }

        debug!(
            reader = self.reader.name(),
            apdus = requests.len(),
            "processing card transaction"
        );
        let card_request = CardRequest::new(requests.clone())
            .with_stop_on_unsuccessful_status_word(self.strict);
        let card_response = self
            .reader
            .transmit_card_request(&card_request, channel_control)?;

        if self.strict {
            for (request, response) in requests.iter().zip(card_response.apdu_responses()) {
                let status_word = response.status_word();
                if !request.is_successful(status_word) {
                    return Err(Error::UnexpectedStatusWord(status_word.to_u16()));
                }
            }
        }

        Ok(card_response.apdu_responses().to_vec())
    }
}
