//! Core terminal service for ISO 7816-4 smart cards
//!
//! This crate sits between application code and heterogeneous card reader
//! drivers and provides two main facilities:
//!
//! - A **card selection pipeline**: ordered AID-based selectors with
//!   first/next navigation, protocol and power-on-data filters, optional
//!   follow-up APDU sequences and channel-control policy, executed against
//!   a reader in a single physical exchange.
//! - A **reader observation state machine**: asynchronous tracking of card
//!   insertion, processing and removal on an observable reader, with
//!   interchangeable monitoring jobs and observer dispatch.
//!
//! Reader drivers implement the [`ReaderDriver`] trait and reach the
//! service through plugins registered with a [`SmartCardService`].
//!
//! ## Example
//!
//! ```no_run
//! use cardium_core::prelude::*;
//! # fn reader() -> std::sync::Arc<cardium_core::reader::Reader> { unimplemented!() }
//!
//! # fn main() -> cardium_core::Result<()> {
//! let reader = reader();
//!
//! let mut scenario = CardSelectionScenario::new(MultiSelectionProcessing::FirstMatch);
//! scenario.prepare_selection(CardSelectionRequest::new(
//!     CardSelector::builder()
//!         .filter_by_aid(vec![0xA0, 0x00, 0x00, 0x00, 0x62])
//!         .build()?,
//! ))?;
//! scenario.prepare_release_channel();
//!
//! let result = scenario.process(&reader)?;
//! if let Some(card) = result.active_smart_card() {
//!     println!("FCI: {:02X?}", card.fci_bytes());
//! }
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod apdu;
pub mod card;
pub mod error;
pub mod extension;
pub mod monitoring;
pub mod observation;
pub mod reader;
pub mod registry;
pub mod selection;

pub use apdu::{ApduRequest, ApduResponse, StatusWord};
pub use card::{CardRequest, CardResponse, ChannelControl};
pub use error::{Error, Result};
pub use extension::CardExtension;
pub use monitoring::{DetectionMode, MonitoringState, NotificationMode};
pub use observation::{
    ObservationErrorHandler, ReaderEvent, ReaderEventKind, ReaderObserver,
};
pub use reader::{
    MonitoringOptions, ObservableReader, ObservationCapabilities, Reader, ReaderDriver,
};
pub use registry::{Plugin, PluginFactory, SmartCardService};
pub use selection::{
    CardSelectionRequest, CardSelectionResult, CardSelectionScenario, CardSelector,
    FileControlInformation, FileOccurrence, MultiSelectionProcessing, SmartCard,
};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::apdu::{ApduRequest, ApduResponse, StatusWord};
    pub use crate::card::{CardRequest, CardResponse, ChannelControl};
    pub use crate::error::{Error, Result};
    pub use crate::extension::CardExtension;
    pub use crate::monitoring::{DetectionMode, MonitoringState, NotificationMode};
    pub use crate::observation::{
        ObservationErrorHandler, ReaderEvent, ReaderEventKind, ReaderObserver,
    };
    pub use crate::reader::{
        MonitoringOptions, ObservableReader, ObservationCapabilities, Reader, ReaderDriver,
    };
    pub use crate::registry::{Plugin, PluginFactory, SmartCardService};
    pub use crate::selection::{
        CardSelectionRequest, CardSelectionResult, CardSelectionScenario, CardSelector,
        FileControlInformation, FileOccurrence, MultiSelectionProcessing, SmartCard,
    };
}
