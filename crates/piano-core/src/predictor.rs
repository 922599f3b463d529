//! The seam between the request path and the sequence model.
//!
//! A [`Predictor`] takes a token sequence and returns a token sequence the
//! codec will decode.  Implementations live outside this crate (a loaded
//! model, an external process, a test double); the core only fixes the
//! contract and the start-up compatibility check.
//!
//! # Concurrency
//!
//! The trait requires `Send + Sync` and takes `&self`, so one instance is
//! shared by every in-flight request.  A predictor with internal mutable
//! state that is unsafe to call concurrently should be wrapped in
//! [`Serialized`], which runs calls one at a time.

use std::sync::Mutex;

use thiserror::Error;
use tracing::{info, warn};

use crate::codec::{CodecConfig, CodecError, Token};

/// Errors a predictor can report.  All of them fail the current request
/// only; the server keeps running.
#[derive(Debug, Error)]
pub enum PredictorError {
    /// The model ran but reported failure.
    #[error("predictor failed: {0}")]
    Failed(String),

    /// The model could not be reached or started.
    #[error("predictor I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The model produced output that is not a token sequence.
    #[error("predictor produced unusable output: {0}")]
    BadOutput(String),

    /// A previous call panicked while holding the serialization lock.
    #[error("predictor lock poisoned by an earlier panic")]
    Poisoned,
}

/// A sequence model: tokens in, tokens out.
pub trait Predictor: Send + Sync {
    /// Produces the token sequence the caller will decode.
    ///
    /// `generate_count` is how many new tokens the model is asked to append.
    /// The returned sequence may contain any tokens, including ones outside
    /// the vocabulary; the caller validates them.
    fn predict(&self, tokens: &[Token], generate_count: usize)
        -> Result<Vec<Token>, PredictorError>;

    /// The codec constants the model was trained with, if it knows them.
    fn codec_config(&self) -> Option<CodecConfig> {
        None
    }
}

impl<P: Predictor + ?Sized> Predictor for Box<P> {
    fn predict(
        &self,
        tokens: &[Token],
        generate_count: usize,
    ) -> Result<Vec<Token>, PredictorError> {
        (**self).predict(tokens, generate_count)
    }

    fn codec_config(&self) -> Option<CodecConfig> {
        (**self).codec_config()
    }
}

/// Verifies that `predictor` was trained on the vocabulary `codec` produces.
///
/// A predictor that declares no configuration is accepted with a warning.
///
/// # Errors
///
/// Returns [`CodecError::ConfigMismatch`] when the declared configuration
/// differs from `codec`.
pub fn check_compatibility(
    codec: &CodecConfig,
    predictor: &dyn Predictor,
) -> Result<(), CodecError> {
    match predictor.codec_config() {
        Some(declared) if codec.is_compatible_with(&declared) => {
            info!(vocabulary = codec.vocabulary_size(), "predictor codec configuration matches");
            Ok(())
        }
        Some(declared) => Err(CodecError::ConfigMismatch {
            codec: *codec,
            predictor: declared,
        }),
        None => {
            warn!("predictor does not declare its codec configuration; assuming it matches");
            Ok(())
        }
    }
}

// ── Serialized ────────────────────────────────────────────────────────────────

/// Runs every call of the inner predictor under one lock.
pub struct Serialized<P> {
    inner: Mutex<P>,
    declared: Option<CodecConfig>,
}

impl<P: Predictor> Serialized<P> {
    pub fn new(inner: P) -> Self {
        let declared = inner.codec_config();
        Self {
            inner: Mutex::new(inner),
            declared,
        }
    }
}

impl<P: Predictor> Predictor for Serialized<P> {
    fn predict(
        &self,
        tokens: &[Token],
        generate_count: usize,
    ) -> Result<Vec<Token>, PredictorError> {
        let guard = self.inner.lock().map_err(|_| PredictorError::Poisoned)?;
        guard.predict(tokens, generate_count)
    }

    fn codec_config(&self) -> Option<CodecConfig> {
        self.declared
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
