//! Selection responses and their aggregation

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::apdu::ApduResponse;
use crate::card::CardResponse;

/// Outcome of evaluating one selector against the card
#[derive(Debug, Clone)]
pub struct CardSelectionResponse {
    power_on_data: Option<String>,
    select_application_response: Option<ApduResponse>,
    has_matched: bool,
    card_response: Option<CardResponse>,
}

impl CardSelectionResponse {
    pub(crate) fn not_matching(power_on_data: Option<String>) -> Self {
        Self {
            power_on_data,
            select_application_response: None,
            has_matched: false,
            card_response: None,
        }
    }

    pub(crate) fn unsuccessful_selection(
        power_on_data: Option<String>,
        select_application_response: ApduResponse,
    ) -> Self {
        Self {
            power_on_data,
            select_application_response: Some(select_application_response),
            has_matched: false,
            card_response: None,
        }
    }

    pub(crate) fn matching(
        power_on_data: Option<String>,
        select_application_response: Option<ApduResponse>,
        card_response: CardResponse,
    ) -> Self {
        Self {
            power_on_data,
            select_application_response,
            has_matched: true,
            card_response: Some(card_response),
        }
    }

    /// Hex-encoded power-on data, when the card provided any
    pub fn power_on_data(&self) -> Option<&str> {
        self.power_on_data.as_deref()
    }

    /// Response to the Select-Application command, when one was sent
    pub fn select_application_response(&self) -> Option<&ApduResponse> {
        self.select_application_response.as_ref()
    }

    /// Whether the card matched this selector
    pub const fn has_matched(&self) -> bool {
        self.has_matched
    }

    /// Responses to the follow-up APDUs, when the selector matched
    pub fn card_response(&self) -> Option<&CardResponse> {
        self.card_response.as_ref()
    }
}

/// Image of one selected application, detached from the reader.
///
/// Owns copies of the power-on data and the FCI; safe to keep after the
/// physical channel is gone.
#[derive(Debug, Clone)]
pub struct SmartCard {
    power_on_data: Option<String>,
    fci: Option<Bytes>,
    selection_status_word: u16,
}

impl SmartCard {
    fn from_response(response: &CardSelectionResponse) -> Self {
        let fci = response
            .select_application_response()
            .map(|r| Bytes::copy_from_slice(r.data()))
            .filter(|data| !data.is_empty());
        let selection_status_word = response
            .select_application_response()
            .map_or(0x9000, |r| r.status_word().to_u16());
        Self {
            power_on_data: response.power_on_data.clone(),
            fci,
            selection_status_word,
        }
    }

    /// Whether the card provided power-on data
    pub const fn has_power_on_data(&self) -> bool {
        self.power_on_data.is_some()
    }

    /// Hex-encoded power-on data
    pub fn power_on_data(&self) -> Option<&str> {
        self.power_on_data.as_deref()
    }

    /// Whether the selection returned file control information
    pub const fn has_fci(&self) -> bool {
        self.fci.is_some()
    }

    /// File control information returned by the Select-Application command
    pub fn fci_bytes(&self) -> Option<&[u8]> {
        self.fci.as_deref()
    }

    /// Status word of the selection that produced this card image
    pub const fn selection_status_word(&self) -> u16 {
        self.selection_status_word
    }
}

/// Aggregated outcome of a whole selection scenario.
///
/// Keys are the indices assigned by `prepare_selection`, so a scenario with
/// gaps (non-matching selectors) keeps its original numbering.
#[derive(Debug, Clone, Default)]
pub struct CardSelectionResult {
    smart_cards: BTreeMap<u8, SmartCard>,
    active_index: Option<u8>,
}

impl CardSelectionResult {
    pub(crate) fn from_responses(responses: &[(u8, CardSelectionResponse)]) -> Self {
        let mut smart_cards = BTreeMap::new();
        let mut active_index = None;

        for (index, response) in responses {
            if !response.has_matched() {
                continue;
            }
            smart_cards.insert(*index, SmartCard::from_response(response));
            let channel_open = response
                .card_response()
                .is_some_and(CardResponse::is_logical_channel_open);
            if active_index.is_none() && channel_open {
                active_index = Some(*index);
            }
        }

        Self {
            smart_cards,
            active_index,
        }
    }

    /// Matched applications, keyed by selection index
    pub const fn smart_cards(&self) -> &BTreeMap<u8, SmartCard> {
        &self.smart_cards
    }

    /// Index of the first matched selector whose logical channel stayed open
    pub const fn active_index(&self) -> Option<u8> {
        self.active_index
    }

    /// The smart card at the active index, if any
    pub fn active_smart_card(&self) -> Option<&SmartCard> {
        self.active_index.and_then(|i| self.smart_cards.get(&i))
    }

    /// Whether at least one selector matched
    pub fn has_match(&self) -> bool {
        !self.smart_cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn matching_response(fci_and_status: &[u8]) -> CardSelectionResponse {
        CardSelectionResponse::matching(
            Some("3B8F8001".to_string()),
            Some(ApduResponse::from_bytes(fci_and_status.to_vec()).unwrap()),
            CardResponse::new(Vec::new(), true),
        )
    }

    #[test]
    fn test_indices_preserved_with_gaps() {
        let responses = vec![
            (0, CardSelectionResponse::not_matching(None)),
            (1, matching_response(&hex!("AA9000"))),
            (3, matching_response(&hex!("BB9000"))),
        ];
        let result = CardSelectionResult::from_responses(&responses);

        assert_eq!(result.smart_cards().len(), 2);
        assert_eq!(
            result.smart_cards().keys().copied().collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(result.active_index(), Some(1));
        assert_eq!(
            result.active_smart_card().unwrap().fci_bytes(),
            Some(hex!("AA").as_slice())
        );
    }

    #[test]
    fn test_no_match_means_no_active_index() {
        let responses = vec![(0, CardSelectionResponse::not_matching(None))];
        let result = CardSelectionResult::from_responses(&responses);
        assert!(!result.has_match());
        assert_eq!(result.active_index(), None);
        assert!(result.active_smart_card().is_none());
    }

    #[test]
    fn test_closed_channel_match_is_not_active() {
        let closed = CardSelectionResponse::matching(
            None,
            Some(ApduResponse::from_bytes(hex!("AA9000").to_vec()).unwrap()),
            CardResponse::new(Vec::new(), false),
        );
        let open = matching_response(&hex!("BB9000"));
        let responses = vec![(0, closed), (1, open)];

        let result = CardSelectionResult::from_responses(&responses);
        assert_eq!(result.smart_cards().len(), 2);
        assert_eq!(result.active_index(), Some(1));
    }

    #[test]
    fn test_smart_card_owns_its_bytes() {
        let response = matching_response(&hex!("6F05840322AABB9000"));
        let result = CardSelectionResult::from_responses(&[(0, response)]);
        let card = result.active_smart_card().unwrap();

        assert!(card.has_power_on_data());
        assert_eq!(card.power_on_data(), Some("3B8F8001"));
        assert!(card.has_fci());
        assert_eq!(card.fci_bytes(), Some(hex!("6F05840322AABB").as_slice()));
        assert_eq!(card.selection_status_word(), 0x9000);
    }

    #[test]
    fn test_match_without_select_has_no_fci() {
        let response = CardSelectionResponse::matching(
            Some("3B00".to_string()),
            None,
            CardResponse::new(Vec::new(), true),
        );
        let result = CardSelectionResult::from_responses(&[(0, response)]);
        let card = result.active_smart_card().unwrap();
        assert!(!card.has_fci());
        assert_eq!(card.selection_status_word(), 0x9000);
    }
}
