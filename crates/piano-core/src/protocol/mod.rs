//! Wire protocol: length-prefixed frames carrying JSON envelopes.

pub mod envelope;
pub mod frame;

pub use envelope::{triples_to_events, EnvelopeError, Request, Response};
pub use frame::{read_frame, receive_exact, write_frame, FrameError, ReceivePolicy};
