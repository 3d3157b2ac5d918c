//! Low-level reader driver contract
//!
//! A [`ReaderDriver`] is the transport primitive the terminal service is
//! built on: it opens and closes the physical channel, moves single APDUs
//! and reports card presence. Drivers are provided by plugins; the core
//! never implements one against real hardware.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Callback invoked by a driver when it natively detects a card insertion
pub type InsertionListener = Box<dyn Fn() + Send + Sync>;

/// What a driver can contribute to card presence monitoring.
///
/// Returned by [`ReaderDriver::observation_capabilities`]; `None` marks the
/// reader as non-observable. Every capability left `false` is covered by
/// active polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservationCapabilities {
    /// The driver implements a blocking [`ReaderDriver::wait_for_card_insertion`]
    pub blocking_insertion: bool,
    /// The driver implements a blocking [`ReaderDriver::wait_for_card_removal`]
    pub blocking_removal: bool,
    /// The driver pushes insertions through [`ReaderDriver::set_insertion_listener`]
    pub insertion_callback: bool,
}

/// Contract between the terminal service and a reader driver.
///
/// Implementations classify their own failures: a transport fault between
/// reader and card is reported as [`Error::CardCommunication`], an unusable
/// reader as [`Error::ReaderCommunication`]. Methods take `&self`; drivers
/// handle their own interior mutability since monitoring jobs and the
/// selection pipeline share the handle across threads.
pub trait ReaderDriver: Send + Sync + fmt::Debug {
    /// Reader name, unique within its plugin
    fn name(&self) -> &str;

    /// Check whether a card is physically present
    fn is_card_present(&self) -> Result<bool>;

    /// Probe the card with a neutral APDU; `false` when the card no longer
    /// responds
    fn is_card_present_ping(&self) -> bool;

    /// Open the physical channel
    fn open_physical_channel(&self) -> Result<()>;

    /// Close the physical channel
    fn close_physical_channel(&self) -> Result<()>;

    /// Check whether the physical channel is open
    fn is_physical_channel_open(&self) -> bool;

    /// Transmit one APDU and return the raw response, status word included
    fn transmit_apdu(&self, apdu: &[u8]) -> Result<Bytes>;

    /// Power-on data of the current card (ATR for contact cards); may be
    /// empty for contactless readers
    fn power_on_data(&self) -> Bytes;

    /// Activate a card protocol on the reader
    fn activate_protocol(&self, protocol: &str) -> Result<()>;

    /// Deactivate a card protocol on the reader
    fn deactivate_protocol(&self, protocol: &str) -> Result<()>;

    /// Check whether the current card uses the given protocol.
    ///
    /// Drivers without protocol introspection keep the default: a
    /// protocol-filtered selector then never matches on this reader.
    fn is_current_protocol(&self, _protocol: &str) -> bool {
        false
    }

    /// Monitoring capabilities; `None` marks the reader non-observable
    fn observation_capabilities(&self) -> Option<ObservationCapabilities> {
        None
    }

    /// Block until a card is inserted. Returns `Ok(true)` on insertion,
    /// `Ok(false)` on timeout.
    fn wait_for_card_insertion(&self, _timeout: Option<Duration>) -> Result<bool> {
        Err(Error::illegal_state(format!(
            "reader '{}' has no blocking insertion detection",
            self.name()
        )))
    }

    /// Block until the card is removed. Returns `Ok(true)` on removal,
    /// `Ok(false)` on timeout.
    fn wait_for_card_removal(&self, _timeout: Option<Duration>) -> Result<bool> {
        Err(Error::illegal_state(format!(
            "reader '{}' has no blocking removal detection",
            self.name()
        )))
    }

    /// Register (`Some`) or clear (`None`) the native insertion callback
    fn set_insertion_listener(&self, _listener: Option<InsertionListener>) {}

    /// Wake up any thread blocked in a `wait_for_*` call. Must be
    /// non-blocking and safe to call at any time.
    fn interrupt_wait(&self) {}

    /// Invoked when card detection starts on the reader
    fn on_start_detection(&self) {}

    /// Invoked when card detection stops on the reader
    fn on_stop_detection(&self) {}
}
