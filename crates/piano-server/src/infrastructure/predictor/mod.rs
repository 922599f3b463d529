//! Predictor adapters and the factory that picks one from configuration.

pub mod command;
pub mod identity;

use std::sync::Arc;

use piano_core::{Predictor, Serialized};
use thiserror::Error;
use tracing::info;

pub use command::CommandPredictor;
pub use identity::IdentityPredictor;

use crate::infrastructure::storage::config::{PredictorConfig, PredictorKind};

#[derive(Debug, Error)]
pub enum PredictorSetupError {
    #[error("predictor kind `command` requires `program`")]
    MissingProgram,
}

/// Builds the predictor described by `config`.
///
/// # Errors
///
/// Returns [`PredictorSetupError::MissingProgram`] when a command predictor
/// has no program configured.
pub fn build_predictor(config: &PredictorConfig) -> Result<Arc<dyn Predictor>, PredictorSetupError> {
    let predictor: Arc<dyn Predictor> = match config.kind {
        PredictorKind::Identity => {
            let identity = match config.codec {
                Some(declared) => IdentityPredictor::with_codec_config(declared),
                None => IdentityPredictor::new(),
            };
            Arc::new(identity)
        }
        PredictorKind::Command => {
            let program = config
                .program
                .clone()
                .ok_or(PredictorSetupError::MissingProgram)?;
            let mut command = CommandPredictor::new(program, config.args.clone());
            if let Some(declared) = config.codec {
                command = command.with_codec_config(declared);
            }
            if config.serialize_calls {
                Arc::new(Serialized::new(command))
            } else {
                Arc::new(command)
            }
        }
    };
    info!(kind = ?config.kind, serialized = config.serialize_calls, "predictor ready");
    Ok(predictor)
}
