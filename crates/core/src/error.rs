//! Unified error type for the terminal service

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// Result type for terminal service operations
pub type Result<T> = core::result::Result<T, Error>;

/// The main error type for terminal service operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure between the reader and the card mid-APDU
    #[error("card communication failure: {0}")]
    CardCommunication(String),

    /// The reader driver or the underlying hardware is unusable
    #[error("reader communication failure: {0}")]
    ReaderCommunication(String),

    /// A response carried a status word outside the accepted set
    #[error("unexpected status word: {0:04X}")]
    UnexpectedStatusWord(u16),

    /// API misuse: empty scenario, unknown reader, observer on a
    /// non-observable reader
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Driver failure surfacing from the registry layer
    #[error("plugin failure: {0}")]
    Plugin(String),
}

impl Error {
    /// Create a new card communication error
    pub fn card_communication<S: Into<String>>(message: S) -> Self {
        Self::CardCommunication(message.into())
    }

    /// Create a new reader communication error
    pub fn reader_communication<S: Into<String>>(message: S) -> Self {
        Self::ReaderCommunication(message.into())
    }

    /// Create a new illegal state error
    pub fn illegal_state<S: Into<String>>(message: S) -> Self {
        Self::IllegalState(message.into())
    }

    /// Create a new plugin error
    pub fn plugin<S: Into<String>>(message: S) -> Self {
        Self::Plugin(message.into())
    }

    /// Check if this error reports a card-side transport failure
    pub const fn is_card_communication(&self) -> bool {
        matches!(self, Self::CardCommunication(_))
    }

    /// Check if this error reports an unusable reader
    pub const fn is_reader_communication(&self) -> bool {
        matches!(self, Self::ReaderCommunication(_))
    }
}

// The wire shape is `{"message": "<text>"}` only; variants and backtraces
// are never serialized.
impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Error", 1)?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::card_communication("card mute").to_string(),
            "card communication failure: card mute"
        );
        assert_eq!(
            Error::UnexpectedStatusWord(0x6A82).to_string(),
            "unexpected status word: 6A82"
        );
    }

    #[test]
    fn test_json_wire_shape() {
        let error = Error::reader_communication("reader unplugged");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message": "reader communication failure: reader unplugged"})
        );
        // The message is the only serialized field
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_classification_helpers() {
        assert!(Error::card_communication("x").is_card_communication());
        assert!(!Error::card_communication("x").is_reader_communication());
        assert!(Error::reader_communication("x").is_reader_communication());
    }
}
