//! Application layer for piano-server.
//!
//! Holds the request router.  Everything here works on byte payloads and
//! typed values; the network layer owns the sockets and the framing.

pub mod autocomplete;

pub use autocomplete::{AutocompleteService, AutocompleteSettings, RouterError};
