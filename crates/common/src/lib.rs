//! Common types for the track fetch workspace

mod credential;
mod error;

pub use credential::Credential;
pub use error::{Error, Result};
