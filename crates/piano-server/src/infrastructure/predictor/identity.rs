//! A predictor that returns its input unchanged.
//!
//! Useful for smoke-testing a deployment end to end without a model: the
//! response is the request notes after one trip through the codec.

use piano_core::{CodecConfig, Predictor, PredictorError, Token};

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPredictor {
    declared: Option<CodecConfig>,
}

impl IdentityPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the codec configuration the echoed tokens belong to.
    pub fn with_codec_config(config: CodecConfig) -> Self {
        Self {
            declared: Some(config),
        }
    }
}

impl Predictor for IdentityPredictor {
    fn predict(&self, tokens: &[Token], _generate_count: usize) -> Result<Vec<Token>, PredictorError> {
        Ok(tokens.to_vec())
    }

    fn codec_config(&self) -> Option<CodecConfig> {
        self.declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_returns_input() {
        let tokens = [381, 60, 305, 188];
        assert_eq!(IdentityPredictor::new().predict(&tokens, 20).unwrap(), tokens);
    }

    #[test]
    fn test_identity_declares_only_when_told() {
        assert_eq!(IdentityPredictor::new().codec_config(), None);
        let declared = IdentityPredictor::with_codec_config(CodecConfig::default());
        assert_eq!(declared.codec_config(), Some(CodecConfig::default()));
    }
}
