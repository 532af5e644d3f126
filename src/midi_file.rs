//! Standard MIDI File import.
//!
//! Turns note-on/note-off pairs into [`Note`]s measured in quarter notes,
//! so a roll can be seeded from a `.mid` file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use midly::{MidiMessage, Smf, Timing, TrackEventKind};

use crate::note::Note;

/// Load notes from a MIDI file on disk.
pub fn notes_from_midi_file<P: AsRef<Path>>(path: P) -> Result<Vec<Note>> {
    let path = path.as_ref();
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    notes_from_smf_bytes(&data).with_context(|| format!("Failed to import {}", path.display()))
}

/// Parse an in-memory Standard MIDI File.
///
/// Notes from every track and channel are merged and sorted by position.
/// A note-on without a matching note-off is dropped.
pub fn notes_from_smf_bytes(data: &[u8]) -> Result<Vec<Note>> {
    let smf = Smf::parse(data).context("Failed to parse MIDI")?;

    let ppq = match smf.header.timing {
        Timing::Metrical(ppq) => ppq.as_int() as f64,
        Timing::Timecode(_, _) => bail!("Timecode-based MIDI files not supported"),
    };

    let mut notes = Vec::new();

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        // (channel, key) -> note-on ticks and velocities still sounding
        let mut open: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

        for event in track.iter() {
            tick += event.delta.as_int() as u64;

            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();

            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    open.entry((channel, key.as_int()))
                        .or_default()
                        .push((tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let started = open
                        .get_mut(&(channel, key.as_int()))
                        .and_then(|stack| (!stack.is_empty()).then(|| stack.remove(0)));

                    if let Some((start, velocity)) = started {
                        let mut note = Note::new(
                            key.as_int(),
                            start as f64 / ppq,
                            (tick - start) as f64 / ppq,
                        )
                        .with_velocity(velocity);
                        note.id = format!("t{}-{}", track_idx, notes.len());
                        notes.push(note);
                    }
                }
                _ => {}
            }
        }
    }

    notes.retain(|n| n.duration > 0.0);
    notes.sort_by(|a, b| a.position.total_cmp(&b.position).then(a.pitch.cmp(&b.pitch)));
    Ok(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u28, u4, u7};
    use midly::{Format, Header, MetaMessage, Track, TrackEvent};

    fn midi_event(delta: u32, message: MidiMessage) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message,
            },
        }
    }

    fn on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        midi_event(
            delta,
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            },
        )
    }

    fn off(delta: u32, key: u8) -> TrackEvent<'static> {
        midi_event(
            delta,
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            },
        )
    }

    fn encode(timing: Timing, mut track: Track<'static>) -> Vec<u8> {
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        let smf = Smf {
            header: Header::new(Format::SingleTrack, timing),
            tracks: vec![track],
        };
        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_notes_in_quarter_units() {
        // 480 ppq: C4 for one beat, then E4 for half a beat
        let track = vec![on(0, 60, 100), off(480, 60), on(0, 64, 90), off(240, 64)];
        let bytes = encode(Timing::Metrical(u15::new(480)), track);

        let notes = notes_from_smf_bytes(&bytes).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].pitch, notes[0].position, notes[0].duration), (60, 0.0, 1.0));
        assert_eq!((notes[1].pitch, notes[1].position, notes[1].duration), (64, 1.0, 0.5));
        assert_eq!(notes[1].velocity, 90);
    }

    #[test]
    fn test_zero_velocity_note_on_ends_note() {
        let track = vec![on(96, 36, 110), on(96, 36, 0)];
        let bytes = encode(Timing::Metrical(u15::new(96)), track);

        let notes = notes_from_smf_bytes(&bytes).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].position, 1.0);
        assert_eq!(notes[0].duration, 1.0);
    }

    #[test]
    fn test_unterminated_note_dropped() {
        let track = vec![on(0, 60, 100), on(0, 62, 100), off(96, 62)];
        let bytes = encode(Timing::Metrical(u15::new(96)), track);

        let notes = notes_from_smf_bytes(&bytes).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 62);
    }

    #[test]
    fn test_timecode_rejected() {
        let track = vec![on(0, 60, 100), off(10, 60)];
        let bytes = encode(Timing::Timecode(midly::Fps::Fps25, 40), track);
        assert!(notes_from_smf_bytes(&bytes).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(notes_from_smf_bytes(b"not a midi file").is_err());
    }
}
