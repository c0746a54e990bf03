//! castforge-common: shared types for the castforge broadcast server.
//!
//! - **Typed IDs**: [`SessionId`] for inbound broadcasts, [`JobId`] for
//!   supervised transcoder runs
//! - **Core enums**: [`StreamIdentifier`], [`StorageTier`], [`Placement`]
//! - **Errors**: the broadcast core's [`Error`] taxonomy and [`Result`] alias

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
