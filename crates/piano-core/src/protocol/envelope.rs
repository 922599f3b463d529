//! JSON envelopes carried inside one frame.
//!
//! ```json
//! {"type": "autocomplete", "data": [[60, 0.0, 0.5], [64, 0.5, 1.0]]}   // request
//! {"data": [[60, 0.0, 0.5], [64, 0.5, 1.0]]}                           // response
//! ```
//!
//! Parsing produces a closed [`Request`] enum; any `type` other than
//! `"autocomplete"` becomes [`Request::Unknown`] so callers never see the
//! raw JSON shape.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{AbsMessage, EventError, NoteTriple};

/// The only request type the protocol defines.
pub const AUTOCOMPLETE: &str = "autocomplete";

/// A payload that is not a well-formed envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not a valid envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope is missing the `{0}` field")]
    MissingField(&'static str),

    #[error("note #{index} is invalid: {source}")]
    InvalidNote {
        index: usize,
        #[source]
        source: EventError,
    },
}

/// Shape of an incoming request before the `type` is interpreted.
#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OutgoingRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a [NoteTriple],
}

/// A parsed request envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Continue the given notes.
    Autocomplete(Vec<NoteTriple>),
    /// A recognised envelope with a `type` this side does not handle.
    Unknown(String),
}

impl Request {
    /// Parses a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if the payload is not UTF-8 JSON, lacks a
    /// `type`, or (for `autocomplete`) lacks a `data` list of
    /// `[pitch, start, end]` triples.
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(payload)?;
        let raw: RawRequest = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            AUTOCOMPLETE => {
                let data = raw.data.ok_or(EnvelopeError::MissingField("data"))?;
                let notes: Vec<NoteTriple> = serde_json::from_value(data)?;
                Ok(Request::Autocomplete(notes))
            }
            other => Ok(Request::Unknown(other.to_string())),
        }
    }

    /// Builds an autocomplete request from events (velocity is not sent).
    pub fn autocomplete(events: &[AbsMessage]) -> Self {
        Request::Autocomplete(events.iter().map(AbsMessage::to_triple).collect())
    }

    /// Serializes the request to its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        let (kind, data): (&str, &[NoteTriple]) = match self {
            Request::Autocomplete(notes) => (AUTOCOMPLETE, notes),
            Request::Unknown(kind) => (kind, &[]),
        };
        Ok(serde_json::to_vec(&OutgoingRequest { kind, data })?)
    }
}

/// The reply to an autocomplete request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub data: Vec<NoteTriple>,
}

impl Response {
    pub fn from_events(events: &[AbsMessage]) -> Self {
        Self {
            data: events.iter().map(AbsMessage::to_triple).collect(),
        }
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if the payload is not a `{"data": [...]}` object.
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    ///
    /// Returns [`EnvelopeError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Turns the triples back into events carrying `velocity`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidNote`] for the first triple that
    /// violates the event model.
    pub fn into_events(self, velocity: f64) -> Result<Vec<AbsMessage>, EnvelopeError> {
        triples_to_events(&self.data, velocity)
    }
}

/// Converts wire triples into validated events.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidNote`] with the offending index.
pub fn triples_to_events(
    triples: &[NoteTriple],
    velocity: f64,
) -> Result<Vec<AbsMessage>, EnvelopeError> {
    triples
        .iter()
        .enumerate()
        .map(|(index, &triple)| {
            AbsMessage::from_triple(triple, velocity)
                .map_err(|source| EnvelopeError::InvalidNote { index, source })
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
