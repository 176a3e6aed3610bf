//! Error types for tg-core
//!
//! Re-exported from tg-error so every crate shares one error enum.

pub use tg_error::{GovernorError, Result};
