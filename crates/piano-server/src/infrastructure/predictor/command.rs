//! A predictor backed by an external model process.
//!
//! The process is started once per request.  It receives two lines on stdin:
//!
//! ```text
//! 20
//! 381 60 305 188 64 305 192
//! ```
//!
//! (the number of tokens to generate, then the space-separated input tokens)
//! and must print the resulting token ids, whitespace-separated, on stdout
//! before exiting with status 0.  Anything written to stderr is logged.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use piano_core::{CodecConfig, Predictor, PredictorError, Token};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CommandPredictor {
    program: PathBuf,
    args: Vec<String>,
    declared: Option<CodecConfig>,
}

impl CommandPredictor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            declared: None,
        }
    }

    /// Records the codec configuration the model was trained with so it can
    /// be checked at start-up.
    pub fn with_codec_config(mut self, config: CodecConfig) -> Self {
        self.declared = Some(config);
        self
    }
}

impl Predictor for CommandPredictor {
    fn predict(&self, tokens: &[Token], generate_count: usize) -> Result<Vec<Token>, PredictorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut input = format!("{generate_count}\n");
        let joined: Vec<String> = tokens.iter().map(Token::to_string).collect();
        input.push_str(&joined.join(" "));
        input.push('\n');

        // The prompt is written from its own thread while `wait_with_output`
        // drains stdout and stderr; a model that logs before reading its
        // input would otherwise fill a pipe and stall both sides.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(input.as_bytes()))
        });

        let output = child.wait_with_output()?;
        if let Some(writer) = writer {
            let written = writer
                .join()
                .map_err(|_| PredictorError::Failed("stdin writer panicked".to_string()))?;
            match written {
                Ok(()) => {}
                // The model exited without reading everything; its exit
                // status decides the outcome.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(program = %self.program.display(), "model closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(program = %self.program.display(), stderr = %stderr.trim(), "model stderr");
        }
        if !output.status.success() {
            warn!(program = %self.program.display(), status = %output.status, "model process failed");
            return Err(PredictorError::Failed(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        parse_tokens(&output.stdout)
    }

    fn codec_config(&self) -> Option<CodecConfig> {
        self.declared
    }
}

fn parse_tokens(stdout: &[u8]) -> Result<Vec<Token>, PredictorError> {
    let text = std::str::from_utf8(stdout)
        .map_err(|e| PredictorError::BadOutput(format!("stdout is not UTF-8: {e}")))?;
    text.split_whitespace()
        .map(|word| {
            word.parse::<Token>()
                .map_err(|_| PredictorError::BadOutput(format!("`{word}` is not a token id")))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
