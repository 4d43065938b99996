//! # Nimbus common library (nimbus-common)
//!
//! Plumbing shared by the Nimbus cloud-streaming client components:
//! configuration loading, logging initialization, and the common
//! error type.

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
