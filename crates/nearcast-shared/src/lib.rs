//! Shared data model and wire protocol for the Nearcast workspace.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;
