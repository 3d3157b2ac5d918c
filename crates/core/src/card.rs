//! Grouped card requests and responses
//!
//! A [`CardRequest`] bundles an ordered APDU sequence for a single exchange
//! with a card; the matching [`CardResponse`] carries the responses actually
//! obtained, which may be fewer than requested when the exchange stops on an
//! unaccepted status word.

use crate::apdu::{ApduRequest, ApduResponse};

/// Policy applied to the physical channel once a card request completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelControl {
    /// Leave the channel open for further exchanges
    KeepOpen,
    /// Close the physical channel after the exchange, success or not
    CloseAfter,
}

/// An ordered sequence of APDUs to execute against a card
#[derive(Debug, Clone)]
pub struct CardRequest {
    apdu_requests: Vec<ApduRequest>,
    stop_on_unsuccessful_status_word: bool,
}

impl CardRequest {
    /// Create a card request from an APDU sequence
    pub fn new(apdu_requests: Vec<ApduRequest>) -> Self {
        Self {
            apdu_requests,
            stop_on_unsuccessful_status_word: false,
        }
    }

    /// Stop the exchange as soon as a response carries an unaccepted
    /// status word; the response sequence is then partial
    pub const fn with_stop_on_unsuccessful_status_word(mut self, stop: bool) -> Self {
        self.stop_on_unsuccessful_status_word = stop;
        self
    }

    /// The APDUs to execute, in order
    pub fn apdu_requests(&self) -> &[ApduRequest] {
        &self.apdu_requests
    }

    /// Whether the exchange stops on the first unaccepted status word
    pub const fn stop_on_unsuccessful_status_word(&self) -> bool {
        self.stop_on_unsuccessful_status_word
    }
}

/// The responses obtained from one card request
#[derive(Debug, Clone)]
pub struct CardResponse {
    apdu_responses: Vec<ApduResponse>,
    logical_channel_open: bool,
}

impl CardResponse {
    pub(crate) fn new(apdu_responses: Vec<ApduResponse>, logical_channel_open: bool) -> Self {
        Self {
            apdu_responses,
            logical_channel_open,
        }
    }

    /// The responses actually executed, in request order
    pub fn apdu_responses(&self) -> &[ApduResponse] {
        &self.apdu_responses
    }

    /// Whether the logical channel was still open when the exchange ended
    pub const fn is_logical_channel_open(&self) -> bool {
        self.logical_channel_open
    }
}
