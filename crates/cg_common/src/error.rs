//! Error type shared by helpers contained in this crate.
//!
//! NB: the enum is kept deliberately small; specialised subsystems should
//! create their own error enums and simply `#[from]` this one where needed.

use thiserror::Error;

/// Result alias pre-filled with [`CgCommonError`].
pub type Result<T, E = CgCommonError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CgCommonError {
    /// UUID parsing failure.
    #[error(transparent)]
    Uuid(#[from] uuid::Error),
}
