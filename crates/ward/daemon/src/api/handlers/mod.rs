//! API request handlers

mod breakers;
mod errors;
mod health;

pub use breakers::*;
pub use errors::*;
pub use health::*;
