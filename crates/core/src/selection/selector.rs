//! Card selector model and Select-Application APDU construction

use std::collections::HashSet;

use bytes::{BufMut, Bytes, BytesMut};
use regex::Regex;

use crate::apdu::ApduRequest;
use crate::error::{Error, Result};

/// Navigation option of the Select-Application command (ISO 7816-4 §7.1.1,
/// P2 bits b2-b1). The card interprets the occurrence; the terminal only
/// encodes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileOccurrence {
    /// First or only occurrence
    #[default]
    First,
    /// Last occurrence
    Last,
    /// Next occurrence
    Next,
    /// Previous occurrence
    Previous,
}

impl FileOccurrence {
    const fn p2_bits(self) -> u8 {
        match self {
            Self::First => 0x00,
            Self::Last => 0x01,
            Self::Next => 0x02,
            Self::Previous => 0x03,
        }
    }
}

/// Kind of template expected in the Select-Application response
/// (ISO 7816-4 §7.1.1, P2 bits b4-b3)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileControlInformation {
    /// File control information template
    #[default]
    Fci,
    /// File control parameters template
    Fcp,
    /// File management data template
    Fmd,
    /// No response data expected
    NoResponse,
}

impl FileControlInformation {
    const fn p2_bits(self) -> u8 {
        match self {
            Self::Fci => 0x00,
            Self::Fcp => 0x04,
            Self::Fmd => 0x08,
            Self::NoResponse => 0x0C,
        }
    }
}

/// Filters identifying one on-card application.
///
/// At least one of the AID or the power-on-data pattern should
/// discriminate; a selector with neither matches any card.
#[derive(Debug, Clone)]
pub struct CardSelector {
    card_protocol: Option<String>,
    power_on_data_regex: Option<Regex>,
    aid: Option<Bytes>,
    file_occurrence: FileOccurrence,
    file_control_information: FileControlInformation,
    successful_selection_status_words: HashSet<u16>,
}

impl CardSelector {
    /// Start building a selector
    pub fn builder() -> CardSelectorBuilder {
        CardSelectorBuilder::default()
    }

    /// Protocol the card must use, if filtered
    pub fn card_protocol(&self) -> Option<&str> {
        self.card_protocol.as_deref()
    }

    /// AID of the application to select, if any
    pub fn aid(&self) -> Option<&[u8]> {
        self.aid.as_deref()
    }

    /// Navigation option encoded into the select command
    pub const fn file_occurrence(&self) -> FileOccurrence {
        self.file_occurrence
    }

    /// Response template encoded into the select command
    pub const fn file_control_information(&self) -> FileControlInformation {
        self.file_control_information
    }

    /// Check the power-on data against the configured pattern; absent
    /// pattern accepts anything, absent data rejects a configured pattern
    pub fn matches_power_on_data(&self, power_on_data: Option<&str>) -> bool {
        match (&self.power_on_data_regex, power_on_data) {
            (None, _) => true,
            (Some(regex), Some(data)) => regex.is_match(data),
            (Some(_), None) => false,
        }
    }

    /// Build the Select-Application APDU for this selector, `None` when no
    /// AID is set (power-on-data-only selection)
    pub(crate) fn select_application_request(&self) -> Option<ApduRequest> {
        let aid = self.aid.as_ref()?;

        let mut apdu = BytesMut::with_capacity(6 + aid.len());
        apdu.put_u8(0x00); // CLA
        apdu.put_u8(0xA4); // INS: SELECT
        apdu.put_u8(0x04); // P1: select by DF name
        apdu.put_u8(self.file_occurrence.p2_bits() | self.file_control_information.p2_bits());
        apdu.put_u8(aid.len() as u8);
        apdu.put_slice(aid);
        if self.file_control_information != FileControlInformation::NoResponse {
            apdu.put_u8(0x00); // Le
        }

        Some(
            ApduRequest::new(apdu.freeze())
                .with_info("Select Application")
                .with_successful_status_words(
                    self.successful_selection_status_words.iter().copied(),
                ),
        )
    }

    /// Check a selection status word against the accepted set
    pub fn is_selection_successful(&self, status_word: u16) -> bool {
        status_word == 0x9000 || self.successful_selection_status_words.contains(&status_word)
    }
}

/// Builder for [`CardSelector`]; validation happens in [`build`](Self::build)
#[derive(Debug, Default)]
pub struct CardSelectorBuilder {
    card_protocol: Option<String>,
    power_on_data_regex: Option<String>,
    aid: Option<Vec<u8>>,
    file_occurrence: FileOccurrence,
    file_control_information: FileControlInformation,
    successful_selection_status_words: HashSet<u16>,
}

impl CardSelectorBuilder {
    /// Only match cards using the given protocol
    pub fn filter_by_card_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.card_protocol = Some(protocol.into());
        self
    }

    /// Only match cards whose hex-encoded power-on data matches the pattern
    pub fn filter_by_power_on_data(mut self, pattern: impl Into<String>) -> Self {
        self.power_on_data_regex = Some(pattern.into());
        self
    }

    /// Select the application identified by this AID (1 to 16 bytes)
    pub fn filter_by_aid(mut self, aid: impl Into<Vec<u8>>) -> Self {
        self.aid = Some(aid.into());
        self
    }

    /// Set the navigation option (default: first occurrence)
    pub const fn file_occurrence(mut self, occurrence: FileOccurrence) -> Self {
        self.file_occurrence = occurrence;
        self
    }

    /// Set the expected response template (default: FCI)
    pub const fn file_control_information(mut self, fci: FileControlInformation) -> Self {
        self.file_control_information = fci;
        self
    }

    /// Accept one more status word as a successful selection
    pub fn add_successful_selection_status_word(mut self, status_word: u16) -> Self {
        self.successful_selection_status_words.insert(status_word);
        self
    }

    /// Validate and build the selector
    pub fn build(self) -> Result<CardSelector> {
        let aid = match self.aid {
            Some(aid) => {
                if aid.is_empty() || aid.len() > 16 {
                    return Err(Error::illegal_state(format!(
                        "AID length must be 1 to 16 bytes, got {}",
                        aid.len()
                    )));
                }
                Some(Bytes::from(aid))
            }
            None => None,
        };

        let power_on_data_regex = match self.power_on_data_regex {
            Some(pattern) => Some(Regex::new(&pattern).map_err(|e| {
                Error::illegal_state(format!("invalid power-on data pattern: {e}"))
            })?),
            None => None,
        };

        Ok(CardSelector {
            card_protocol: self.card_protocol,
            power_on_data_regex,
            aid,
            file_occurrence: self.file_occurrence,
            file_control_information: self.file_control_information,
            successful_selection_status_words: self.successful_selection_status_words,
        })
    }
}
