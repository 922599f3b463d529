//! # piano-core
//!
//! Shared library for PianoML autocomplete containing the note event model,
//! the token codec, the wire protocol and the predictor seam.
//!
//! This crate is used by both the server and the command-line client.  It
//! never opens sockets or loads models; streams and predictors are passed in.
//!
//! # Architecture overview
//!
//! A front end records notes and asks the server to continue them.  The
//! server turns the notes into a flat token sequence, hands it to a
//! sequence model, and turns the model's tokens back into notes:
//!
//! ```text
//! notes ──encode──▶ tokens ──predict──▶ tokens ──decode──▶ notes
//! ```
//!
//! - **`event`** – The [`AbsMessage`] value object: pitch, velocity and
//!   absolute start/end times.
//!
//! - **`codec`** – [`TokenCodec`], the lossy, drift-corrected mapping between
//!   events and tokens, parameterised by [`CodecConfig`].
//!
//! - **`protocol`** – How requests travel: a 4-byte little-endian length
//!   prefix followed by a UTF-8 JSON envelope.
//!
//! - **`predictor`** – The [`Predictor`] trait the model sits behind.
//!
//! - **`event_file`** – Loading and saving note lists on disk.

pub mod codec;
pub mod event;
pub mod event_file;
pub mod predictor;
pub mod protocol;

pub use codec::{CodecConfig, CodecError, PendingPolicy, Token, TokenCodec, TokenKind};
pub use event::{sort_by_start, AbsMessage, EventError, NoteTriple};
pub use event_file::{EventFileError, EventSink, EventSource, NoteListFile};
pub use predictor::{check_compatibility, Predictor, PredictorError, Serialized};
pub use protocol::{EnvelopeError, FrameError, ReceivePolicy, Request, Response};
