//! Identity types for devrelay.
//!
//! Nothing in here performs I/O apart from drawing bytes from the OS random
//! source, so every type can be built and tested without a network.

/// Device keys and the generator that produces them.
pub mod key;

/// Process-unique identifiers for individual connections.
pub mod connection_id;
