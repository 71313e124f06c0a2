//! Shared foundation for the touchgrass daemon, wrapper, and CLI:
//! the `TOUCHGRASS_HOME` paths bundle, JSON config, channel addresses,
//! pairing codes, and the common error type.

pub mod address;
pub mod config;
pub mod error;
pub mod pairing;
pub mod paths;

pub use error::{Error, Result};
