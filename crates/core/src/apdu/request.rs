//! Single APDU request model

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;

use super::status::StatusWord;

/// An immutable APDU to be sent to a card, together with the set of status
/// words accepted as successful for this particular command.
///
/// `0x9000` is always implicitly accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduRequest {
    bytes: Bytes,
    info: Option<String>,
    successful_status_words: HashSet<u16>,
}

impl ApduRequest {
    /// Create a new APDU request from raw command bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            info: None,
            successful_status_words: HashSet::new(),
        }
    }

    /// Attach a short human-readable label, used in logs only
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    /// Replace the set of additionally accepted status words
    pub fn with_successful_status_words<I>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.successful_status_words = words.into_iter().collect();
        self
    }

    /// Accept one more status word as successful
    pub fn add_successful_status_word(mut self, status_word: u16) -> Self {
        self.successful_status_words.insert(status_word);
        self
    }

    /// Raw command bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Log label, if any
    pub fn info(&self) -> Option<&str> {
        self.info.as_deref()
    }

    /// Check whether a response status word is accepted for this command
    pub fn is_successful(&self, status_word: StatusWord) -> bool {
        status_word.is_success() || self.successful_status_words.contains(&status_word.to_u16())
    }
}

impl fmt::Display for ApduRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            Some(info) => write!(f, "{} ({})", hex::encode_upper(&self.bytes), info),
            None => write!(f, "{}", hex::encode_upper(&self.bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_success_always_accepted() {
        let request = ApduRequest::new(hex!("00A4040005A000000062").to_vec());
        assert!(request.is_successful(StatusWord::SUCCESS));
        assert!(!request.is_successful(StatusWord::new(0x6A, 0x82)));
    }

    #[test]
    fn test_additional_status_words() {
        let request = ApduRequest::new(hex!("00B2014C00").to_vec())
            .add_successful_status_word(0x6283);
        assert!(request.is_successful(StatusWord::from_u16(0x6283)));
        assert!(request.is_successful(StatusWord::SUCCESS));
        assert!(!request.is_successful(StatusWord::from_u16(0x6A83)));
    }

    #[test]
    fn test_display_with_info() {
        let request = ApduRequest::new(hex!("00A40400").to_vec()).with_info("Select Application");
        assert_eq!(request.to_string(), "00A40400 (Select Application)");
    }
}
