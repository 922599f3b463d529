//! Network infrastructure: the TCP listener and per-connection tasks.

pub mod server;

pub use server::{
    run_connection, AutocompleteServer, ConnectionError, ConnectionFailure, ConnectionOutcome,
    ConnectionState, ServerError, ServerSettings,
};
