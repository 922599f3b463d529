//! Infrastructure layer for piano-server.
//!
//! Everything that touches the outside world lives here.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and spawning one task per connection
//! - Reading and writing length-prefixed frames
//! - Running the predictor (in-process or as an external command)
//! - Loading the TOML configuration file
//!
//! # What does NOT belong here?
//!
//! - Envelope routing and the encode → predict → decode pipeline (that is
//!   the application layer)

pub mod network;
pub mod predictor;
pub mod storage;

pub use network::{AutocompleteServer, ServerError, ServerSettings};
