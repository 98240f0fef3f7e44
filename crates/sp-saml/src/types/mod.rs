//! Core SAML types shared across the library.

mod constants;
mod name_id;

pub use constants::*;
pub use name_id::*;
