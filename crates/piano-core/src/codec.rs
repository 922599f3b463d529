//! Token codec: absolute-time note events ⇄ flat integer token sequences.
//!
//! Vocabulary layout (`T` = time-shift buckets, `V` = velocity buckets):
//! ```text
//! [0, 127]              note-on  for pitch t
//! [128, 255]            note-off for pitch t - 128
//! [256, 256+T-1]        time-shift of (t - 256 + 1) * INC seconds
//! [256+T, 256+T+V-1]    set current velocity to (t - 256 - T) / V
//! ```
//! Vocabulary size is `256 + T + V`.
//!
//! Encoding is lossy: velocity is quantized to `V` buckets and time to
//! multiples of `INC`.  Each gap is measured against the running encoded
//! clock rather than the previous raw timestamp, so rounding error never
//! accumulates.  A single gap longer than `T * INC` is truncated to `T`
//! steps.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::event::{sort_by_start, AbsMessage, EventError, MAX_PITCH, PITCH_COUNT};

/// A single vocabulary symbol.
pub type Token = u32;

/// First note-off token.
pub const NOTE_OFF_BASE: Token = 128;

/// First time-shift token.
pub const TIME_SHIFT_BASE: Token = 256;

/// Slack, in bucket units, applied before flooring so values sitting exactly
/// on a grid point are not pushed one bucket down by float representation.
const GRID_EPSILON: f64 = 1e-6;

/// Upper bound on `T` and `V`; keeps every token comfortably inside `u32`.
const MAX_BUCKET_COUNT: u32 = 1 << 20;

/// Errors raised by the token codec.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The codec constants are unusable (zero buckets, non-positive increment, ...).
    #[error("invalid codec configuration: {0}")]
    InvalidConfig(String),

    /// A token lies outside `[0, vocabulary_size)`.  Never clamped.
    #[error("token {token} is outside the vocabulary of {vocabulary_size} tokens")]
    InvalidToken { token: Token, vocabulary_size: u32 },

    /// An input event violates the event model.
    #[error("event #{index} is invalid: {source}")]
    InvalidEvent {
        index: usize,
        #[source]
        source: EventError,
    },

    /// Two input events start the same pitch at the same instant.
    #[error("pitch {pitch} has two notes starting at {start}s")]
    DuplicateOnset { pitch: u8, start: f64 },

    /// The codec and the predictor were built with different constants.
    #[error("codec configuration {codec:?} does not match predictor configuration {predictor:?}")]
    ConfigMismatch {
        codec: CodecConfig,
        predictor: CodecConfig,
    },
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// The constants shared by the codec and any predictor trained on its tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Seconds per time-shift bucket (`INC`).
    #[serde(default = "default_time_shift_increment")]
    pub time_shift_increment: f64,
    /// Number of time-shift buckets (`T`).
    #[serde(default = "default_time_shift_count")]
    pub time_shift_count: u32,
    /// Number of velocity buckets (`V`).
    #[serde(default = "default_velocity_count")]
    pub velocity_count: u32,
}

fn default_time_shift_increment() -> f64 {
    0.01
}
fn default_time_shift_count() -> u32 {
    100
}
fn default_velocity_count() -> u32 {
    32
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            time_shift_increment: default_time_shift_increment(),
            time_shift_count: default_time_shift_count(),
            velocity_count: default_velocity_count(),
        }
    }
}

/// Decoded meaning of one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    NoteOn(u8),
    NoteOff(u8),
    /// Advance the clock by this many steps (`1..=T`).
    TimeShift(u32),
    /// Velocity bucket (`0..V`).
    Velocity(u32),
}

impl CodecConfig {
    /// Checks that the constants describe a usable vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidConfig`] when the increment is not a
    /// positive finite number or a bucket count is zero or absurdly large.
    pub fn validate(&self) -> Result<(), CodecError> {
        if !self.time_shift_increment.is_finite() || self.time_shift_increment <= 0.0 {
            return Err(CodecError::InvalidConfig(format!(
                "time_shift_increment must be positive, got {}",
                self.time_shift_increment
            )));
        }
        for (name, count) in [
            ("time_shift_count", self.time_shift_count),
            ("velocity_count", self.velocity_count),
        ] {
            if count == 0 || count > MAX_BUCKET_COUNT {
                return Err(CodecError::InvalidConfig(format!(
                    "{name} must be in 1..={MAX_BUCKET_COUNT}, got {count}"
                )));
            }
        }
        Ok(())
    }

    /// Total number of distinct tokens: `256 + T + V`.
    pub fn vocabulary_size(&self) -> u32 {
        TIME_SHIFT_BASE + self.time_shift_count + self.velocity_count
    }

    /// First velocity-set token.
    pub fn velocity_base(&self) -> Token {
        TIME_SHIFT_BASE + self.time_shift_count
    }

    /// Longest gap a single time-shift token can express, in seconds.
    pub fn max_time_shift(&self) -> f64 {
        f64::from(self.time_shift_count) * self.time_shift_increment
    }

    /// Returns `true` if a predictor trained with `other` understands tokens
    /// produced with `self`.
    pub fn is_compatible_with(&self, other: &CodecConfig) -> bool {
        self.time_shift_count == other.time_shift_count
            && self.velocity_count == other.velocity_count
            && (self.time_shift_increment - other.time_shift_increment).abs() < 1e-9
    }

    /// Decodes the meaning of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidToken`] for tokens outside the vocabulary.
    pub fn classify(&self, token: Token) -> Result<TokenKind, CodecError> {
        let kind = if token < NOTE_OFF_BASE {
            TokenKind::NoteOn(token as u8)
        } else if token < TIME_SHIFT_BASE {
            TokenKind::NoteOff((token - NOTE_OFF_BASE) as u8)
        } else if token < self.velocity_base() {
            TokenKind::TimeShift(token - TIME_SHIFT_BASE + 1)
        } else if token < self.vocabulary_size() {
            TokenKind::Velocity(token - self.velocity_base())
        } else {
            return Err(CodecError::InvalidToken {
                token,
                vocabulary_size: self.vocabulary_size(),
            });
        };
        Ok(kind)
    }

    pub fn note_on(&self, pitch: u8) -> Token {
        debug_assert!(pitch <= MAX_PITCH);
        Token::from(pitch)
    }

    pub fn note_off(&self, pitch: u8) -> Token {
        debug_assert!(pitch <= MAX_PITCH);
        NOTE_OFF_BASE + Token::from(pitch)
    }

    /// Token advancing the clock by `steps` buckets, `1..=T`.
    pub fn time_shift(&self, steps: u32) -> Token {
        debug_assert!((1..=self.time_shift_count).contains(&steps));
        TIME_SHIFT_BASE + steps - 1
    }

    /// Token selecting velocity `bucket`, `0..V`.
    pub fn velocity(&self, bucket: u32) -> Token {
        debug_assert!(bucket < self.velocity_count);
        self.velocity_base() + bucket
    }

    /// Quantizes a normalised velocity: `floor(v * V)` clamped to `[0, V-1]`.
    pub fn velocity_bucket(&self, velocity: f64) -> u32 {
        let scaled = velocity * f64::from(self.velocity_count);
        (floor_on_grid(scaled) as u32).min(self.velocity_count - 1)
    }

    /// The velocity a decoder assigns to `bucket`.
    pub fn bucket_velocity(&self, bucket: u32) -> f64 {
        f64::from(bucket) / f64::from(self.velocity_count)
    }
}

/// `floor(x)` with [`GRID_EPSILON`] slack; negative and NaN inputs give 0,
/// huge inputs saturate.
fn floor_on_grid(x: f64) -> u64 {
    if x.is_nan() || x <= 0.0 {
        return 0;
    }
    (x + GRID_EPSILON).floor() as u64
}

// ── Pending-note policy ───────────────────────────────────────────────────────

/// What [`TokenCodec::decode`] does with notes still pending at end of stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Discard notes that never received a note-off.
    #[default]
    Drop,
    /// Close them at the final clock value.
    Flush,
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Encoder/decoder bound to one [`CodecConfig`].
///
/// # Examples
///
/// ```rust
/// use piano_core::{AbsMessage, PendingPolicy, TokenCodec};
///
/// let codec = TokenCodec::default();
/// let events = vec![
///     AbsMessage::new(60, 0.8, 0.0, 0.5).unwrap(),
///     AbsMessage::new(64, 0.8, 0.5, 1.0).unwrap(),
/// ];
/// let tokens = codec.encode(&events).unwrap();
/// let decoded = codec.decode(&tokens, PendingPolicy::Drop).unwrap();
/// assert_eq!(decoded.len(), 2);
/// assert_eq!(decoded[1].start, 0.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TokenCodec {
    config: CodecConfig,
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    On { velocity_bucket: u32 },
    Off,
}

/// One half of an input event, placed on the timeline.
#[derive(Debug, Clone, Copy)]
struct SubEvent {
    time: f64,
    pitch: u8,
    edge: Edge,
}

impl TokenCodec {
    /// Creates a codec after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidConfig`] if the constants are unusable.
    pub fn new(config: CodecConfig) -> Result<Self, CodecError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encodes an unordered list of events into tokens.
    ///
    /// Events are first ordered by start (then pitch); input order carries
    /// no meaning.  Each event contributes a note-on at `start` and a
    /// note-off at `end`, and the sub-events are stable-sorted by time, so at
    /// equal timestamps an event's own on precedes its off and the off of an
    /// earlier-starting note precedes the on of a later one.  The first
    /// sub-event defines time zero.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidEvent`] for events violating the event
    /// model and [`CodecError::DuplicateOnset`] when two events share
    /// `(pitch, start)`.
    pub fn encode(&self, events: &[AbsMessage]) -> Result<Vec<Token>, CodecError> {
        check_events(events)?;

        let mut ordered = events.to_vec();
        sort_by_start(&mut ordered);

        let mut timeline = Vec::with_capacity(ordered.len() * 2);
        for event in &ordered {
            timeline.push(SubEvent {
                time: event.start,
                pitch: event.pitch,
                edge: Edge::On {
                    velocity_bucket: self.config.velocity_bucket(event.velocity),
                },
            });
            timeline.push(SubEvent {
                time: event.end,
                pitch: event.pitch,
                edge: Edge::Off,
            });
        }
        // `sort_by` is stable; ties keep onset order.
        timeline.sort_by(|a, b| a.time.total_cmp(&b.time));

        let Some(origin) = timeline.first().map(|s| s.time) else {
            return Ok(Vec::new());
        };

        let inc = self.config.time_shift_increment;
        let max_steps = u64::from(self.config.time_shift_count);
        let mut clock_steps: u64 = 0;
        let mut current_velocity: Option<u32> = None;
        let mut tokens = Vec::with_capacity(timeline.len() * 2);

        for sub in &timeline {
            let encoded_time = origin + clock_steps as f64 * inc;
            let wanted = floor_on_grid((sub.time - encoded_time) / inc);
            let mult = wanted.min(max_steps);
            if wanted > max_steps {
                debug!(
                    gap = sub.time - encoded_time,
                    max = self.config.max_time_shift(),
                    "time gap exceeds one time-shift token; truncating"
                );
            }
            if mult > 0 {
                tokens.push(self.config.time_shift(mult as u32));
                clock_steps += mult;
            }

            match sub.edge {
                Edge::On { velocity_bucket } => {
                    if current_velocity != Some(velocity_bucket) {
                        tokens.push(self.config.velocity(velocity_bucket));
                        current_velocity = Some(velocity_bucket);
                    }
                    tokens.push(self.config.note_on(sub.pitch));
                }
                Edge::Off => tokens.push(self.config.note_off(sub.pitch)),
            }
        }

        trace!(events = events.len(), tokens = tokens.len(), "encoded events");
        Ok(tokens)
    }

    /// Decodes tokens back into events sorted by start time.
    ///
    /// A second note-on for a pitch that is already sounding replaces the
    /// pending note; the replaced one is never emitted.  A note-off with no
    /// pending note is ignored.  Notes still pending at the end are handled
    /// according to `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidToken`] on the first token outside the
    /// vocabulary.
    pub fn decode(
        &self,
        tokens: &[Token],
        policy: PendingPolicy,
    ) -> Result<Vec<AbsMessage>, CodecError> {
        let inc = self.config.time_shift_increment;
        let mut clock_steps: u64 = 0;
        let mut current_velocity = 0.0;
        let mut pitches = PitchTable::new();
        let mut decoded = Vec::new();

        for &token in tokens {
            match self.config.classify(token)? {
                TokenKind::TimeShift(steps) => clock_steps += u64::from(steps),
                TokenKind::Velocity(bucket) => {
                    current_velocity = self.config.bucket_velocity(bucket);
                }
                TokenKind::NoteOn(pitch) => {
                    pitches.press(pitch, clock_steps, current_velocity);
                }
                TokenKind::NoteOff(pitch) => {
                    if let Some(note) = pitches.release(pitch) {
                        decoded.push(note.finish(pitch, clock_steps, inc));
                    }
                }
            }
        }

        if policy == PendingPolicy::Flush {
            for (pitch, note) in pitches.drain() {
                decoded.push(note.finish(pitch, clock_steps, inc));
            }
        }

        sort_by_start(&mut decoded);
        Ok(decoded)
    }
}

fn check_events(events: &[AbsMessage]) -> Result<(), CodecError> {
    let mut onsets = HashSet::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        event
            .validate()
            .map_err(|source| CodecError::InvalidEvent { index, source })?;
        if !onsets.insert((event.pitch, event.start.to_bits())) {
            return Err(CodecError::DuplicateOnset {
                pitch: event.pitch,
                start: event.start,
            });
        }
    }
    Ok(())
}

// ── Pitch-state table ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PendingNote {
    start_steps: u64,
    velocity: f64,
}

impl PendingNote {
    fn finish(self, pitch: u8, end_steps: u64, inc: f64) -> AbsMessage {
        AbsMessage {
            pitch,
            velocity: self.velocity,
            start: self.start_steps as f64 * inc,
            end: end_steps as f64 * inc,
        }
    }
}

/// At most one pending note per pitch.
struct PitchTable {
    slots: [Option<PendingNote>; PITCH_COUNT],
}

impl PitchTable {
    fn new() -> Self {
        Self {
            slots: [None; PITCH_COUNT],
        }
    }

    fn press(&mut self, pitch: u8, start_steps: u64, velocity: f64) {
        let replaced = self.slots[usize::from(pitch)].replace(PendingNote {
            start_steps,
            velocity,
        });
        if replaced.is_some() {
            trace!(pitch, "note-on for a sounding pitch; earlier note dropped");
        }
    }

    fn release(&mut self, pitch: u8) -> Option<PendingNote> {
        self.slots[usize::from(pitch)].take()
    }

    fn drain(&mut self) -> impl Iterator<Item = (u8, PendingNote)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(pitch, slot)| slot.take().map(|note| (pitch as u8, note)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
