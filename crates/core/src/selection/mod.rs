//! Card selection: selectors, scenarios and their results
//!
//! A selection scenario is an ordered list of selectors, each optionally
//! followed by APDUs to run on the matched application. The scenario is
//! executed against a reader in one physical exchange; see
//! [`CardSelectionScenario`].

mod result;
mod scenario;
mod selector;

pub use result::{CardSelectionResponse, CardSelectionResult, SmartCard};
pub use scenario::{CardSelectionScenario, MultiSelectionProcessing};
pub use selector::{CardSelector, CardSelectorBuilder, FileControlInformation, FileOccurrence};

use crate::card::CardRequest;

/// One entry of a selection scenario: a selector plus optional follow-up
/// APDUs to run on the matched application.
///
/// Produced by a card extension from a [`CardSelector`] description.
#[derive(Debug, Clone)]
pub struct CardSelectionRequest {
    selector: CardSelector,
    card_request: Option<CardRequest>,
}

impl CardSelectionRequest {
    /// Create a selection request without follow-up APDUs
    pub fn new(selector: CardSelector) -> Self {
        Self {
            selector,
            card_request: None,
        }
    }

    /// Attach follow-up APDUs to run after a successful selection
    pub fn with_card_request(mut self, card_request: CardRequest) -> Self {
        self.card_request = Some(card_request);
        self
    }

    /// The selector to evaluate
    pub fn selector(&self) -> &CardSelector {
        &self.selector
    }

    /// Follow-up APDUs, if any
    pub fn card_request(&self) -> Option<&CardRequest> {
        self.card_request.as_ref()
    }
}
