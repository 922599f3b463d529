//! AutocompleteService: turns one request payload into one response.
//!
//! ```text
//! payload ─parse─▶ Request ─encode─▶ tokens ─predict─▶ tokens ─decode─▶ Response
//! ```
//!
//! The service is synchronous because the predictor is a blocking call; the
//! network layer runs [`AutocompleteService::handle`] on the blocking pool.
//! One instance is shared by every connection through an `Arc`.

use std::sync::Arc;

use piano_core::protocol::envelope::triples_to_events;
use piano_core::{
    CodecError, EnvelopeError, PendingPolicy, Predictor, PredictorError, Request, Response,
    TokenCodec,
};
use thiserror::Error;
use tracing::{debug, info};

/// Velocity assigned to incoming notes; the front end never sends one.
pub const DEFAULT_VELOCITY: f64 = 0.8;

/// Tokens the model is asked to generate per request.
pub const DEFAULT_GENERATE_COUNT: usize = 20;

/// Error type for request handling.  Every variant fails one request and
/// closes its connection; none of them stop the server.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed request: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("predictor error: {0}")]
    Predictor(#[from] PredictorError),
}

/// Tunables applied to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutocompleteSettings {
    pub default_velocity: f64,
    pub generate_count: usize,
    /// Notes the model leaves sounding are closed at the end of its output
    /// by default, so an unfinished continuation is still returned.
    pub pending_policy: PendingPolicy,
}

impl Default for AutocompleteSettings {
    fn default() -> Self {
        Self {
            default_velocity: DEFAULT_VELOCITY,
            generate_count: DEFAULT_GENERATE_COUNT,
            pending_policy: PendingPolicy::Flush,
        }
    }
}

/// The request router.
pub struct AutocompleteService {
    codec: TokenCodec,
    predictor: Arc<dyn Predictor>,
    settings: AutocompleteSettings,
}

impl AutocompleteService {
    pub fn new(
        codec: TokenCodec,
        predictor: Arc<dyn Predictor>,
        settings: AutocompleteSettings,
    ) -> Self {
        Self {
            codec,
            predictor,
            settings,
        }
    }

    /// Handles one request payload.
    ///
    /// Returns `Ok(None)` for a well-formed envelope whose `type` is not
    /// `autocomplete`; the caller closes the connection without replying.
    ///
    /// # Errors
    ///
    /// - [`RouterError::Envelope`] for payloads that are not a valid envelope
    ///   or carry notes outside the event model.
    /// - [`RouterError::Codec`] when the notes cannot be encoded or the model
    ///   returns a token outside the vocabulary.
    /// - [`RouterError::Predictor`] when the model itself fails.
    pub fn handle(&self, payload: &[u8]) -> Result<Option<Response>, RouterError> {
        let notes = match Request::parse(payload)? {
            Request::Autocomplete(notes) => notes,
            Request::Unknown(kind) => {
                debug!(kind = %kind, "ignoring request of unknown type");
                return Ok(None);
            }
        };

        let events = triples_to_events(&notes, self.settings.default_velocity)?;
        let tokens = self.codec.encode(&events)?;
        debug!(notes = events.len(), tokens = tokens.len(), "encoded request");

        let output = self
            .predictor
            .predict(&tokens, self.settings.generate_count)?;
        debug!(tokens = output.len(), "predictor returned");

        let decoded = self.codec.decode(&output, self.settings.pending_policy)?;
        info!(
            notes_in = events.len(),
            notes_out = decoded.len(),
            "autocomplete request served"
        );
        Ok(Some(Response::from_events(&decoded)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
