//! Shared identifiers, error definitions, and helpers used across the trawl crates.

pub mod error;
pub mod id;

pub use {
    error::{Error, FromMessage, Result},
    id::JobId,
};
