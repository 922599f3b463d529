//! Reading and writing event lists on disk.
//!
//! [`EventSource`] and [`EventSink`] are the seams a MIDI reader or writer
//! plugs into.  The one implementation shipped here, [`NoteListFile`], is a
//! plain-text note list with one `<pitch> <start> <end>` line per note:
//!
//! ```text
//! 60 0.0 0.5
//! 64 0.5 1.0
//! ```
//!
//! Velocity is not stored; it is supplied by the reader.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::event::{AbsMessage, EventError};

/// Velocity given to notes read from a file that does not store one.
pub const DEFAULT_FILE_VELOCITY: f64 = 0.8;

#[derive(Debug, Error)]
pub enum EventFileError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("line {line}: {source}")]
    InvalidEvent {
        line: usize,
        #[source]
        source: EventError,
    },
}

/// Something events can be loaded from.
pub trait EventSource {
    fn read_events(&self, path: &Path) -> Result<Vec<AbsMessage>, EventFileError>;
}

/// Something events can be saved to.
pub trait EventSink {
    fn write_events(&self, path: &Path, events: &[AbsMessage]) -> Result<(), EventFileError>;
}

/// The whitespace-separated note-list format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteListFile {
    pub default_velocity: f64,
}

impl Default for NoteListFile {
    fn default() -> Self {
        Self {
            default_velocity: DEFAULT_FILE_VELOCITY,
        }
    }
}

impl EventSource for NoteListFile {
    fn read_events(&self, path: &Path) -> Result<Vec<AbsMessage>, EventFileError> {
        let text = fs::read_to_string(path).map_err(|source| EventFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let events = parse_note_list(&text, self.default_velocity)?;
        debug!(path = %path.display(), count = events.len(), "read note list");
        Ok(events)
    }
}

impl EventSink for NoteListFile {
    fn write_events(&self, path: &Path, events: &[AbsMessage]) -> Result<(), EventFileError> {
        fs::write(path, format_note_list(events)).map_err(|source| EventFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), count = events.len(), "wrote note list");
        Ok(())
    }
}

/// Parses note-list text.  Blank lines and surrounding whitespace are
/// ignored; line numbers in errors are 1-based.
///
/// # Errors
///
/// Returns [`EventFileError::Parse`] for a line that is not three numbers and
/// [`EventFileError::InvalidEvent`] for one that violates the event model.
pub fn parse_note_list(text: &str, velocity: f64) -> Result<Vec<AbsMessage>, EventFileError> {
    let mut events = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let &[pitch, start, end] = fields.as_slice() else {
            return Err(EventFileError::Parse {
                line,
                reason: format!("expected 3 fields, found {}", fields.len()),
            });
        };
        let pitch: u8 = pitch.parse().map_err(|_| EventFileError::Parse {
            line,
            reason: format!("`{pitch}` is not a pitch"),
        })?;
        let start = parse_seconds(start, line)?;
        let end = parse_seconds(end, line)?;
        let event = AbsMessage::new(pitch, velocity, start, end)
            .map_err(|source| EventFileError::InvalidEvent { line, source })?;
        events.push(event);
    }
    Ok(events)
}

fn parse_seconds(field: &str, line: usize) -> Result<f64, EventFileError> {
    field.parse().map_err(|_| EventFileError::Parse {
        line,
        reason: format!("`{field}` is not a time in seconds"),
    })
}

/// Formats events as note-list text, one line per event in the given order.
pub fn format_note_list(events: &[AbsMessage]) -> String {
    let mut out = String::with_capacity(events.len() * 16);
    for event in events {
        // `{:?}` keeps the decimal point on whole seconds ("1.0", not "1").
        let _ = writeln!(out, "{} {:?} {:?}", event.pitch, event.start, event.end);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_list_reads_triples() {
        let events = parse_note_list("60 0 0.5\n64 0.5 1.0\n", 0.8).unwrap();
        assert_eq!(
            events,
            vec![
                AbsMessage::new(60, 0.8, 0.0, 0.5).unwrap(),
                AbsMessage::new(64, 0.8, 0.5, 1.0).unwrap(),
            ]
        );
    }

    #[test]
    fn test_parse_note_list_skips_blank_lines_and_extra_spaces() {
        let events = parse_note_list("\n  60   0.0\t0.5  \n\n", 0.5).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].velocity, 0.5);
    }

    #[test]
    fn test_parse_note_list_reports_line_of_bad_field_count() {
        let err = parse_note_list("60 0 0.5\n64 0.5\n", 0.8).unwrap_err();
        assert!(matches!(err, EventFileError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_parse_note_list_rejects_non_numeric_fields() {
        assert!(matches!(
            parse_note_list("C4 0 1", 0.8),
            Err(EventFileError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse_note_list("60 zero 1", 0.8),
            Err(EventFileError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_note_list_rejects_invalid_events() {
        let err = parse_note_list("60 1.0 0.5", 0.8).unwrap_err();
        assert!(matches!(
            err,
            EventFileError::InvalidEvent {
                line: 1,
                source: EventError::EndBeforeStart { .. }
            }
        ));
    }

    #[test]
    fn test_format_note_list_keeps_decimal_point() {
        let events = vec![AbsMessage::new(60, 0.8, 0.0, 1.0).unwrap()];
        assert_eq!(format_note_list(&events), "60 0.0 1.0\n");
    }

    #[test]
    fn test_note_list_file_write_then_read() {
        // Arrange
        let path = std::env::temp_dir().join(format!(
            "piano-core-notes-{}.txt",
            std::process::id()
        ));
        let file = NoteListFile::default();
        let events = vec![
            AbsMessage::new(60, 0.8, 0.0, 0.5).unwrap(),
            AbsMessage::new(67, 0.8, 0.25, 1.75).unwrap(),
        ];

        // Act
        file.write_events(&path, &events).unwrap();
        let read_back = file.read_events(&path).unwrap();
        let _ = fs::remove_file(&path);

        // Assert
        assert_eq!(read_back, events);
    }

    #[test]
    fn test_read_missing_file_reports_path() {
        let path = Path::new("/definitely/not/here/notes.txt");
        let err = NoteListFile::default().read_events(path).unwrap_err();
        match err {
            EventFileError::Io { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
