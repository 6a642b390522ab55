//! Core domain library for the media viewer server.
//!
//! This crate owns everything that touches the media tree or the catalogue
//! database: filesystem resilience, the catalogue store, the memory
//! governor, the indexer, the thumbnail engine, and the session/password/
//! WebAuthn domain logic. The HTTP surface, streaming writer, and process
//! wiring live in `viewer-server` and depend on this crate rather than the
//! other way around.

pub mod error;
pub mod fs_resilience;
pub mod indexer;
pub mod memory;
pub mod metrics;
pub mod session;
pub mod store;
pub mod thumbnail;

pub use error::{ViewerError, ViewerResult};
