//! Card extension contract
//!
//! A card extension turns a high-level [`CardSelector`] description into a
//! [`CardSelectionRequest`], adding whatever domain-specific follow-up APDUs
//! it needs. The core invokes extensions as black-box factories.

use crate::error::Result;
use crate::selection::{CardSelectionRequest, CardSelector};

/// Major version of the service API exposed to card extensions
pub const SERVICE_API_VERSION_MAJOR: u16 = 2;
/// Minor version of the service API exposed to card extensions
pub const SERVICE_API_VERSION_MINOR: u16 = 0;

/// Factory contract implemented by card extensions
pub trait CardExtension {
    /// Build a selection request for the given selector
    fn create_card_selection(&self, selector: CardSelector) -> Result<CardSelectionRequest>;

    /// Verify that the extension was compiled against a compatible service
    /// API; `major`/`minor` are the versions of the running service
    fn check_service_version(&self, major: u16, minor: u16) -> Result<()>;
}
