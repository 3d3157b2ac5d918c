//! Single APDU response model

use std::fmt;

use bytes::Bytes;

use super::status::StatusWord;
use crate::error::{Error, Result};

/// An immutable APDU response as returned by a card.
///
/// The last two bytes are the status word; anything before it is the data
/// field. Construction rejects buffers shorter than two bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    bytes: Bytes,
}

impl ApduResponse {
    /// Create a response from raw bytes received from the card
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < 2 {
            return Err(Error::card_communication(format!(
                "truncated APDU response ({} byte(s))",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// The complete response, data field and status word included
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The data field, without the trailing status word
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 2]
    }

    /// The status word carried by the last two bytes
    pub fn status_word(&self) -> StatusWord {
        let len = self.bytes.len();
        StatusWord::new(self.bytes[len - 2], self.bytes[len - 1])
    }
}

impl fmt::Display for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_data_and_status_word() {
        let response = ApduResponse::from_bytes(hex!("6F07840BAA9000").to_vec()).unwrap();
        assert_eq!(response.data(), hex!("6F07840BAA"));
        assert_eq!(response.status_word(), StatusWord::SUCCESS);
    }

    #[test]
    fn test_status_only() {
        let response = ApduResponse::from_bytes(hex!("6A82").to_vec()).unwrap();
        assert!(response.data().is_empty());
        assert_eq!(response.status_word().to_u16(), 0x6A82);
    }

    #[test]
    fn test_truncated_response_rejected() {
        let error = ApduResponse::from_bytes(vec![0x90]).unwrap_err();
        assert!(error.is_card_communication());
        assert!(ApduResponse::from_bytes(Vec::new()).is_err());
    }
}
