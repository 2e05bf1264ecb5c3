//! Vodforge-Common: shared identifiers, asset state types and errors.
//!
//! This crate provides the vocabulary used by every other vodforge crate:
//!
//! - **Typed IDs**: UUID newtypes for assets, renditions, users and jobs
//! - **Core Types**: asset states, failure kinds, container/storage kinds,
//!   job stage classes
//! - **Error Handling**: the common error taxonomy and result alias
//!
//! # Examples
//!
//! ```
//! use vodforge_common::{AssetId, AssetState, Error, Result};
//!
//! let asset_id = AssetId::new();
//! assert!(AssetState::ToExternalStorage.is_move_state());
//!
//! fn lookup(id: AssetId) -> Result<()> {
//!     Err(Error::not_found(format!("asset {id}")))
//! }
//! # assert!(lookup(asset_id).is_err());
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
