//! Musical note data shared between rolls and the scheduler.
//!
//! All positions and durations are expressed in quarter notes. Conversion
//! to seconds happens in [`crate::timing`] once the tempo is known.

use serde::{Deserialize, Serialize};

/// Highest valid MIDI pitch / velocity value.
pub const MIDI_MAX: u8 = 127;

/// Velocity used when a note does not specify one.
pub const DEFAULT_VELOCITY: u8 = 100;

/// A single note owned by a roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub id: String,
    /// MIDI pitch (0-127)
    pub pitch: u8,
    /// Start position in quarter notes
    pub position: f64,
    /// Length in quarter notes
    pub duration: f64,
    /// MIDI velocity (0-127)
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

fn default_velocity() -> u8 {
    DEFAULT_VELOCITY
}

impl Note {
    pub fn new(pitch: u8, position: f64, duration: f64) -> Self {
        Self {
            id: String::new(),
            pitch,
            position,
            duration,
            velocity: DEFAULT_VELOCITY,
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity;
        self
    }

    /// Position where the note stops sounding, in quarter notes.
    pub fn end(&self) -> f64 {
        self.position + self.duration
    }

    /// Velocity scaled to 0.0-1.0 for instruments.
    pub fn normalized_velocity(&self) -> f32 {
        (self.velocity as f32 / MIDI_MAX as f32).clamp(0.0, 1.0)
    }
}

/// Convert a MIDI pitch to scientific pitch notation (60 = "C4").
pub fn pitch_name(pitch: u8) -> String {
    let names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (pitch / 12) as i8 - 1;
    let name = names[(pitch % 12) as usize];
    format!("{}{}", name, octave)
}

/// Parse scientific pitch notation back to a MIDI pitch ("C#4" = 61).
///
/// Accepts sharps (`#`) and flats (`b`); returns `None` outside 0-127.
pub fn parse_pitch_name(name: &str) -> Option<u8> {
    let mut chars = name.chars();
    let base: i32 = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next()? {
        '#' => (1, &rest[1..]),
        'b' => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;
    let pitch = (octave + 1) * 12 + base + accidental;
    u8::try_from(pitch).ok().filter(|p| *p <= MIDI_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Grid settings of a roll's editor.
///
/// The coordinator never edits these; they are exposed so hosts can relate
/// playhead positions to bars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// Visible length of the roll in quarter notes
    pub max_length: f64,
    #[serde(default)]
    pub time_signature: TimeSignature,
    /// Grid divisions per quarter note
    pub subdivision: u32,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            max_length: 16.0,
            time_signature: TimeSignature::default(),
            subdivision: 4,
        }
    }
}

impl Grid {
    /// Length of one bar in quarter notes.
    pub fn quarters_per_bar(&self) -> f64 {
        let ts = self.time_signature;
        ts.numerator as f64 * 4.0 / ts.denominator.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_names() {
        assert_eq!(pitch_name(60), "C4");
        assert_eq!(pitch_name(61), "C#4");
        assert_eq!(pitch_name(36), "C2");
        assert_eq!(pitch_name(0), "C-1");
        assert_eq!(pitch_name(127), "G9");
    }

    #[test]
    fn test_parse_pitch_names() {
        for pitch in 0..=MIDI_MAX {
            assert_eq!(parse_pitch_name(&pitch_name(pitch)), Some(pitch));
        }
        assert_eq!(parse_pitch_name("Db4"), Some(61));
        assert_eq!(parse_pitch_name("H4"), None);
        assert_eq!(parse_pitch_name("G#9"), None);
        assert_eq!(parse_pitch_name(""), None);
    }

    #[test]
    fn test_normalized_velocity() {
        assert_eq!(Note::new(60, 0.0, 1.0).with_velocity(127).normalized_velocity(), 1.0);
        assert_eq!(Note::new(60, 0.0, 1.0).with_velocity(0).normalized_velocity(), 0.0);
        let default = Note::new(60, 0.0, 1.0).normalized_velocity();
        assert!((default - 100.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_velocity_defaults_when_missing() {
        let note: Note = serde_yaml::from_str("{ pitch: 38, position: 1.0, duration: 0.5 }").unwrap();
        assert_eq!(note.velocity, DEFAULT_VELOCITY);
        assert_eq!(note.end(), 1.5);
    }

    #[test]
    fn test_quarters_per_bar() {
        assert_eq!(Grid::default().quarters_per_bar(), 4.0);
        let grid = Grid {
            time_signature: TimeSignature {
                numerator: 6,
                denominator: 8,
            },
            ..Grid::default()
        };
        assert_eq!(grid.quarters_per_bar(), 3.0);
    }
}
