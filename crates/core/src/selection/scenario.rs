//! Selection scenario execution

use tracing::{debug, trace};

use crate::apdu::{ApduRequest, ApduResponse};
use crate::card::{CardRequest, CardResponse, ChannelControl};
use crate::error::{Error, Result};
use crate::reader::Reader;
use crate::selection::result::{CardSelectionResponse, CardSelectionResult};
use crate::selection::CardSelectionRequest;

/// How a scenario with several selectors walks its list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiSelectionProcessing {
    /// Stop at the first selector the card matches
    FirstMatch,
    /// Evaluate every selector regardless of earlier matches
    ProcessAll,
}

/// An ordered application-selection scenario.
///
/// Selectors are appended with [`prepare_selection`](Self::prepare_selection)
/// and evaluated in insertion order by [`process`](Self::process), which
/// consumes the scenario: a new one is built for each run. To run a scenario
/// automatically on card insertion, hand it to
/// [`ObservableReader::schedule_selection_scenario`](crate::reader::ObservableReader::schedule_selection_scenario)
/// instead.
#[derive(Debug)]
pub struct CardSelectionScenario {
    requests: Vec<CardSelectionRequest>,
    multi_selection_processing: MultiSelectionProcessing,
    release_channel: bool,
}

impl CardSelectionScenario {
    /// Create an empty scenario with the given processing mode
    pub fn new(multi_selection_processing: MultiSelectionProcessing) -> Self {
        Self {
            requests: Vec::new(),
            multi_selection_processing,
            release_channel: false,
        }
    }

    /// Append a selection request; returns the index identifying it in the
    /// scenario result
    pub fn prepare_selection(&mut self, request: CardSelectionRequest) -> Result<u8> {
        if self.requests.len() > usize::from(u8::MAX) {
            return Err(Error::illegal_state(
                "a selection scenario holds at most 256 selectors",
            ));
        }
        self.requests.push(request);
        Ok((self.requests.len() - 1) as u8)
    }

    /// Close the physical channel once the scenario completes
    pub fn prepare_release_channel(&mut self) {
        self.release_channel = true;
    }

    /// The configured processing mode
    pub const fn multi_selection_processing(&self) -> MultiSelectionProcessing {
        self.multi_selection_processing
    }

    /// Number of prepared selectors
    pub fn selection_count(&self) -> usize {
        self.requests.len()
    }

    /// Execute the scenario against a reader.
    ///
    /// Selectors run in insertion order over one physical exchange;
    /// non-matching selectors are recorded, not fatal. The physical channel
    /// is closed when release was requested or nothing matched.
    pub fn process(self, reader: &Reader) -> Result<CardSelectionResult> {
        self.execute(reader)
    }

    pub(crate) fn execute(&self, reader: &Reader) -> Result<CardSelectionResult> {
        if self.requests.is_empty() {
            return Err(Error::illegal_state("selection scenario is empty"));
        }
        if self.multi_selection_processing == MultiSelectionProcessing::ProcessAll
            && self.requests.iter().any(|r| r.selector().aid().is_none())
        {
            return Err(Error::illegal_state(
                "grouped selection requires AID-based selectors",
            ));
        }

        match self.run_selectors(reader) {
            Ok(responses) => {
                let matched_any = responses.iter().any(|(_, r)| r.has_matched());
                if self.release_channel || !matched_any {
                    reader.channel().close_physical_channel()?;
                }
                Ok(CardSelectionResult::from_responses(&responses))
            }
            Err(error) => {
                // Fatal to the scenario: leave no channel behind
                let _ = reader.channel().close_physical_channel();
                Err(error)
            }
        }
    }

    fn run_selectors(&self, reader: &Reader) -> Result<Vec<(u8, CardSelectionResponse)>> {
        reader.channel().ensure_physical_channel()?;

        let mut responses = Vec::with_capacity(self.requests.len());
        for (index, request) in self.requests.iter().enumerate() {
            let response = self.process_selection_request(reader, request)?;
            let matched = response.has_matched();
            trace!(
                reader = reader.name(),
                index,
                matched,
                "selector evaluated"
            );
            responses.push((index as u8, response));

            if matched && self.multi_selection_processing == MultiSelectionProcessing::FirstMatch {
                debug!(reader = reader.name(), index, "first match, stopping scenario");
                break;
            }
        }
        Ok(responses)
    }

    fn process_selection_request(
        &self,
        reader: &Reader,
        request: &CardSelectionRequest,
    ) -> Result<CardSelectionResponse> {
        let selector = request.selector();
        let power_on_data = reader.power_on_data();

        if let Some(protocol) = selector.card_protocol() {
            if !reader.driver().is_current_protocol(protocol) {
                debug!(reader = reader.name(), protocol, "card protocol mismatch");
                return Ok(CardSelectionResponse::not_matching(power_on_data));
            }
        }

        if !selector.matches_power_on_data(power_on_data.as_deref()) {
            debug!(
                reader = reader.name(),
                power_on_data = power_on_data.as_deref().unwrap_or(""),
                "power-on data mismatch"
            );
            return Ok(CardSelectionResponse::not_matching(power_on_data));
        }

        let select_response = match selector.select_application_request() {
            Some(select_apdu) => {
                match self.transmit_select(reader, select_apdu) {
                    Ok(response) => Some(response),
                    // A lost card is recoverable when the channel re-opens;
                    // the selector is then recorded as not matching
                    Err(error) if error.is_card_communication() => {
                        let _ = reader.channel().close_physical_channel();
                        return match reader.channel().ensure_physical_channel() {
                            Ok(()) => {
                                debug!(
                                    reader = reader.name(),
                                    "channel recovered after select failure"
                                );
                                Ok(CardSelectionResponse::not_matching(power_on_data))
                            }
                            Err(_) => Err(error),
                        };
                    }
                    Err(error) => return Err(error),
                }
            }
            None => None,
        };

        if let Some(select) = &select_response {
            let status_word = select.status_word().to_u16();
            if !selector.is_selection_successful(status_word) {
                return Ok(CardSelectionResponse::unsuccessful_selection(
                    power_on_data,
                    select.clone(),
                ));
            }
            reader.channel().set_logical_channel_open(true);
        }

        let card_response = match request.card_request() {
            Some(follow_up) => reader
                .channel()
                .transmit_card_request(follow_up, ChannelControl::KeepOpen)?,
            None => CardResponse::new(Vec::new(), true),
        };

        Ok(CardSelectionResponse::matching(
            power_on_data,
            select_response,
            card_response,
        ))
    }

    fn transmit_select(&self, reader: &Reader, select_apdu: ApduRequest) -> Result<ApduResponse> {
        let card_request = CardRequest::new(vec![select_apdu]);
        let card_response = reader
            .channel()
            .transmit_card_request(&card_request, ChannelControl::KeepOpen)?;
        card_response
            .apdu_responses()
            .first()
            .cloned()
            .ok_or_else(|| Error::card_communication("no response to Select Application"))
    }
}
