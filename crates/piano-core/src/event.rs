//! The absolute-time note event exchanged between every component.
//!
//! An [`AbsMessage`] is a plain value object: a MIDI pitch, a normalised
//! velocity, and absolute start/end timestamps in seconds.  Lists of events
//! carry no meaningful insertion order; every consumer sorts by start time
//! before processing.

use thiserror::Error;

/// Highest valid MIDI pitch.
pub const MAX_PITCH: u8 = 127;

/// Number of distinct MIDI pitches (size of the per-pitch state tables).
pub const PITCH_COUNT: usize = MAX_PITCH as usize + 1;

/// Wire representation of a note: `(pitch, start, end)`.
///
/// The front end never transmits velocity, so it is absent here.
pub type NoteTriple = (u8, f64, f64);

/// Reasons an event is rejected by [`AbsMessage::new`] or by the codec.
#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("pitch {0} is outside 0..=127")]
    PitchOutOfRange(u8),

    #[error("velocity {0} is not a finite value")]
    InvalidVelocity(f64),

    #[error("timestamp {0} is negative or not finite")]
    InvalidTime(f64),

    #[error("note ends at {end} before it starts at {start}")]
    EndBeforeStart { start: f64, end: f64 },
}

/// A note with absolute start and end times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsMessage {
    /// MIDI pitch, `0..=127`.
    pub pitch: u8,
    /// Normalised velocity in `[0, 1]`.
    pub velocity: f64,
    /// Absolute start time in seconds.
    pub start: f64,
    /// Absolute end time in seconds, never before `start`.
    pub end: f64,
}

impl AbsMessage {
    /// Builds a validated event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if the pitch is above 127, the velocity is not
    /// finite, either timestamp is negative or not finite, or `end < start`.
    pub fn new(pitch: u8, velocity: f64, start: f64, end: f64) -> Result<Self, EventError> {
        let msg = Self {
            pitch,
            velocity,
            start,
            end,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Checks the data-model invariants of an event built by struct literal.
    ///
    /// # Errors
    ///
    /// See [`AbsMessage::new`].
    pub fn validate(&self) -> Result<(), EventError> {
        if self.pitch > MAX_PITCH {
            return Err(EventError::PitchOutOfRange(self.pitch));
        }
        if !self.velocity.is_finite() {
            return Err(EventError::InvalidVelocity(self.velocity));
        }
        for t in [self.start, self.end] {
            if !t.is_finite() || t < 0.0 {
                return Err(EventError::InvalidTime(t));
            }
        }
        if self.end < self.start {
            return Err(EventError::EndBeforeStart {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Builds an event from its wire triple, supplying the missing velocity.
    ///
    /// # Errors
    ///
    /// See [`AbsMessage::new`].
    pub fn from_triple(triple: NoteTriple, velocity: f64) -> Result<Self, EventError> {
        let (pitch, start, end) = triple;
        Self::new(pitch, velocity, start, end)
    }

    /// Drops the velocity and returns the wire triple.
    pub fn to_triple(&self) -> NoteTriple {
        (self.pitch, self.start, self.end)
    }

    /// Length of the note in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Returns `true` if both notes share a pitch and their sounding
    /// intervals intersect.  Touching intervals (`a.end == b.start`) do not
    /// overlap.
    pub fn overlaps(&self, other: &AbsMessage) -> bool {
        self.pitch == other.pitch && self.start < other.end && other.start < self.end
    }
}

/// Stable sort by start time, then by pitch so equal onsets come out in a
/// deterministic order.
pub fn sort_by_start(events: &mut [AbsMessage]) {
    events.sort_by(|a, b| {
        a.start
            .total_cmp(&b.start)
            .then_with(|| a.pitch.cmp(&b.pitch))
    });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
