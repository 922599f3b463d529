//! piano-server library crate.
//!
//! Accepts framed JSON requests over TCP, turns the notes into tokens, asks
//! a sequence model to continue them, and replies with the decoded notes.
//!
//! # Architecture
//!
//! ```text
//! Front end ([len:4 LE][JSON] over TCP)
//!         ↕
//! [piano-server]
//!   ├── application/      Request routing: envelope → codec → predictor → codec
//!   └── infrastructure/
//!         ├── network/    TCP accept loop and per-connection tasks
//!         ├── predictor/  Predictor adapters (identity, external command)
//!         └── storage/    TOML configuration
//! ```
//!
//! # Layer rules
//!
//! - `application` depends on `piano-core` only; it never touches sockets,
//!   files or processes.
//! - `infrastructure` depends on `application` plus `tokio` and `toml`.

/// Application layer: request routing.
pub mod application;

/// Infrastructure layer: network server, predictor adapters, configuration.
pub mod infrastructure;
