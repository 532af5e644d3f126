//! Loop and timing arithmetic for a playback session.
//!
//! Everything here is pure: given a roll's notes, its queue start and the
//! tempo, compute the events to schedule, the loop length, how many times
//! the roll repeats and when the session must stop.
//!
//! Positions are quarter notes, times are seconds from the moment the
//! transport starts.

use serde::{Deserialize, Serialize};

use crate::note::Note;

/// Grace period after the last event of a non-looping roll.
pub const STOP_GRACE_SECONDS: f64 = 0.1;

/// Tail allowed after the last event of a looping roll.
pub const LOOP_TAIL_SECONDS: f64 = 0.02;

/// Keeps a looping roll's stop strictly before its final loop boundary.
pub const LOOP_BOUNDARY_GUARD_SECONDS: f64 = 0.001;

/// Hard ceiling on repetitions for a roll played as part of a queue.
pub const QUEUE_LOOP_CEILING: u32 = 10;

/// How many times a looping roll repeats.
///
/// Written in config as a bare count (`3`) or `infinite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LoopCountRepr", into = "LoopCountRepr")]
pub enum LoopCount {
    Times(u32),
    Infinite,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LoopCountRepr {
    Times(u32),
    Word(String),
}

impl TryFrom<LoopCountRepr> for LoopCount {
    type Error = String;

    fn try_from(repr: LoopCountRepr) -> Result<Self, Self::Error> {
        match repr {
            LoopCountRepr::Times(n) => Ok(LoopCount::Times(n)),
            LoopCountRepr::Word(word) => match word.as_str() {
                "infinite" | "inf" | "∞" => Ok(LoopCount::Infinite),
                other => Err(format!("Invalid loop count '{}', expected a number or 'infinite'", other)),
            },
        }
    }
}

impl From<LoopCount> for LoopCountRepr {
    fn from(count: LoopCount) -> Self {
        match count {
            LoopCount::Times(n) => LoopCountRepr::Times(n),
            LoopCount::Infinite => LoopCountRepr::Word("infinite".to_string()),
        }
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Times(1)
    }
}

/// Per-roll loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub count: LoopCount,
}

impl LoopConfig {
    pub fn times(count: u32) -> Self {
        Self {
            enabled: true,
            count: LoopCount::Times(count),
        }
    }

    pub fn infinite() -> Self {
        Self {
            enabled: true,
            count: LoopCount::Infinite,
        }
    }
}

/// Repetitions actually used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveLoops {
    Finite(u32),
    Infinite,
}

impl EffectiveLoops {
    /// True when the event batch has to repeat.
    pub fn repeats(&self) -> bool {
        match self {
            EffectiveLoops::Finite(n) => *n > 1,
            EffectiveLoops::Infinite => true,
        }
    }
}

/// One note converted to seconds, relative to the start of playback.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub pitch: u8,
    pub time_offset: f64,
    pub duration: f64,
    /// Velocity in 0.0-1.0
    pub velocity: f32,
}

impl ScheduledEvent {
    pub fn end(&self) -> f64 {
        self.time_offset + self.duration
    }
}

/// Seconds per quarter note at the given tempo.
pub fn quarter_seconds(bpm: f64) -> f64 {
    60.0 / bpm
}

/// A note is heard when it ends after the playback start.
pub fn is_active(note: &Note, playback_start: f64) -> bool {
    note.end() > playback_start
}

/// Offset of a note from the playback start, in seconds.
///
/// Notes that began before the start sound immediately.
pub fn event_offset(note: &Note, playback_start: f64, quarter_seconds: f64) -> f64 {
    (note.position - playback_start).max(0.0) * quarter_seconds
}

/// Build the ordered event list for every active note.
///
/// A note crossing the playback start is shortened to the part that lies
/// after the start.
pub fn active_events(notes: &[Note], playback_start: f64, quarter_seconds: f64) -> Vec<ScheduledEvent> {
    let mut events: Vec<ScheduledEvent> = notes
        .iter()
        .filter(|n| is_active(n, playback_start))
        .map(|n| ScheduledEvent {
            pitch: n.pitch,
            time_offset: event_offset(n, playback_start, quarter_seconds),
            duration: (n.end() - n.position.max(playback_start)) * quarter_seconds,
            velocity: n.normalized_velocity(),
        })
        .collect();

    events.sort_by(|a, b| a.time_offset.total_cmp(&b.time_offset));
    events
}

/// Loop length in whole quarter notes, never less than one.
pub fn loop_length_quarters(notes: &[Note], playback_start: f64) -> f64 {
    let max_end = notes
        .iter()
        .filter(|n| is_active(n, playback_start))
        .map(Note::end)
        .fold(f64::NEG_INFINITY, f64::max);

    if max_end.is_finite() {
        (max_end - playback_start).ceil().max(1.0)
    } else {
        1.0
    }
}

/// Resolve the configured loop count for a session.
///
/// Queue playback clamps every count, infinite included, to
/// [`QUEUE_LOOP_CEILING`]. A count of zero is treated as one.
pub fn effective_loop_count(config: &LoopConfig, queue_mode: bool) -> EffectiveLoops {
    if !config.enabled {
        return EffectiveLoops::Finite(1);
    }
    match (config.count, queue_mode) {
        (LoopCount::Infinite, true) => EffectiveLoops::Finite(QUEUE_LOOP_CEILING),
        (LoopCount::Infinite, false) => EffectiveLoops::Infinite,
        (LoopCount::Times(n), true) => EffectiveLoops::Finite(n.clamp(1, QUEUE_LOOP_CEILING)),
        (LoopCount::Times(n), false) => EffectiveLoops::Finite(n.max(1)),
    }
}

/// End of the latest-ending event, in seconds.
pub fn last_event_end(events: &[ScheduledEvent]) -> f64 {
    events.iter().map(ScheduledEvent::end).fold(0.0, f64::max)
}

/// Seconds after playback start at which the session must stop.
///
/// `None` means the roll loops forever and only stops on request.
///
/// A looping roll stops at `last_event_end + (count - 1) * loop_length + 0.02`,
/// clamped just before the final loop boundary. The formula is what counts:
/// three repetitions of a 0.5 s loop whose only event ends at 0.25 s stop at
/// 1.27 s, not at the 0.27 s sometimes quoted for that example.
pub fn stop_deadline(
    last_event_end: f64,
    loop_length_seconds: f64,
    looping: bool,
    loops: EffectiveLoops,
) -> Option<f64> {
    if !looping {
        return Some(last_event_end + STOP_GRACE_SECONDS);
    }

    let count = match loops {
        EffectiveLoops::Finite(n) => n as f64,
        EffectiveLoops::Infinite => return None,
    };

    let content_end = last_event_end + (count - 1.0) * loop_length_seconds;
    let total_duration = loop_length_seconds * count;
    Some((content_end + LOOP_TAIL_SECONDS).min(total_duration - LOOP_BOUNDARY_GUARD_SECONDS))
}

/// Playhead position inside a loop that started at `playback_start`.
pub fn wrapped_position(playback_start: f64, elapsed_quarters: f64, loop_length_quarters: f64) -> f64 {
    playback_start + elapsed_quarters.rem_euclid(loop_length_quarters)
}

/// Everything needed to schedule one roll.
#[derive(Debug, Clone)]
pub struct RollPlan {
    pub queue_start: f64,
    pub quarter_seconds: f64,
    pub events: Vec<ScheduledEvent>,
    pub loop_length_quarters: f64,
    pub looping: bool,
    pub loops: EffectiveLoops,
}

impl RollPlan {
    pub fn build(notes: &[Note], queue_start: f64, bpm: f64, loop_config: &LoopConfig, queue_mode: bool) -> Self {
        let quarter_seconds = quarter_seconds(bpm);
        Self {
            queue_start,
            quarter_seconds,
            events: active_events(notes, queue_start, quarter_seconds),
            loop_length_quarters: loop_length_quarters(notes, queue_start),
            looping: loop_config.enabled,
            loops: effective_loop_count(loop_config, queue_mode),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn loop_length_seconds(&self) -> f64 {
        self.loop_length_quarters * self.quarter_seconds
    }

    pub fn quarters_per_second(&self) -> f64 {
        1.0 / self.quarter_seconds
    }

    pub fn stop_deadline(&self) -> Option<f64> {
        stop_deadline(
            last_event_end(&self.events),
            self.loop_length_seconds(),
            self.looping,
            self.loops,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_active_filter_excludes_notes_ending_at_start() {
        let notes = vec![Note::new(60, 0.0, 1.0), Note::new(62, 1.0, 1.0)];
        assert!(!is_active(&notes[0], 1.0));
        assert!(is_active(&notes[1], 1.0));
        assert_eq!(active_events(&notes, 1.0, 0.5).len(), 1);
    }

    #[test]
    fn test_note_crossing_start_is_trimmed() {
        let notes = vec![Note::new(60, 0.0, 4.0)];
        let events = active_events(&notes, 3.0, 0.5);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time_offset, 0.0);
        assert!(approx(events[0].duration, 0.5));
    }

    #[test]
    fn test_events_sorted_by_offset() {
        let notes = vec![Note::new(64, 2.0, 1.0), Note::new(60, 0.0, 1.0), Note::new(62, 1.0, 1.0)];
        let pitches: Vec<u8> = active_events(&notes, 0.0, 0.5).iter().map(|e| e.pitch).collect();
        assert_eq!(pitches, vec![60, 62, 64]);
    }

    #[test]
    fn test_loop_length_minimum_one() {
        let notes = vec![Note::new(60, 0.0, 0.25)];
        assert_eq!(loop_length_quarters(&notes, 0.0), 1.0);
        assert_eq!(loop_length_quarters(&[], 0.0), 1.0);
    }

    #[test]
    fn test_loop_length_rounds_up_from_start() {
        let notes = vec![Note::new(60, 2.0, 1.0), Note::new(62, 4.0, 1.5)];
        assert_eq!(loop_length_quarters(&notes, 2.0), 4.0);
    }

    #[test]
    fn test_effective_loop_count() {
        assert_eq!(effective_loop_count(&LoopConfig::default(), false), EffectiveLoops::Finite(1));
        assert_eq!(effective_loop_count(&LoopConfig::times(4), false), EffectiveLoops::Finite(4));
        assert_eq!(effective_loop_count(&LoopConfig::times(40), false), EffectiveLoops::Finite(40));
        assert_eq!(effective_loop_count(&LoopConfig::times(40), true), EffectiveLoops::Finite(10));
        assert_eq!(effective_loop_count(&LoopConfig::infinite(), false), EffectiveLoops::Infinite);
        assert_eq!(effective_loop_count(&LoopConfig::infinite(), true), EffectiveLoops::Finite(10));
        assert_eq!(effective_loop_count(&LoopConfig::times(0), false), EffectiveLoops::Finite(1));

        let disabled = LoopConfig {
            enabled: false,
            count: LoopCount::Times(5),
        };
        assert_eq!(effective_loop_count(&disabled, true), EffectiveLoops::Finite(1));
    }

    #[test]
    fn test_stop_deadline_without_loop() {
        // Two quarter notes at 120 BPM end at 1.0s
        let notes = vec![Note::new(36, 0.0, 1.0), Note::new(38, 1.0, 1.0)];
        let plan = RollPlan::build(&notes, 0.0, 120.0, &LoopConfig::default(), false);
        assert!(approx(plan.stop_deadline().unwrap(), 2.0 * 0.5 + STOP_GRACE_SECONDS));
    }

    #[test]
    fn test_stop_deadline_looping_three_times() {
        let notes = vec![Note::new(60, 0.0, 0.5)];
        let plan = RollPlan::build(&notes, 0.0, 120.0, &LoopConfig::times(3), false);
        assert_eq!(plan.loop_length_quarters, 1.0);
        assert!(approx(plan.loop_length_seconds(), 0.5));
        // content end 0.25 + 2 * 0.5, well before the 1.5s boundary
        assert!(approx(plan.stop_deadline().unwrap(), 1.27));
    }

    #[test]
    fn test_stop_deadline_clamped_before_boundary() {
        // Note fills the whole loop, so the tail would cross the boundary
        let deadline = stop_deadline(1.0, 1.0, true, EffectiveLoops::Finite(2)).unwrap();
        assert!(approx(deadline, 2.0 - LOOP_BOUNDARY_GUARD_SECONDS));
    }

    #[test]
    fn test_stop_deadline_infinite() {
        assert_eq!(stop_deadline(1.0, 1.0, true, EffectiveLoops::Infinite), None);
    }

    #[test]
    fn test_loop_count_yaml_forms() {
        assert_eq!(serde_yaml::from_str::<LoopCount>("3").unwrap(), LoopCount::Times(3));
        assert_eq!(serde_yaml::from_str::<LoopCount>("infinite").unwrap(), LoopCount::Infinite);
        assert_eq!(serde_yaml::from_str::<LoopCount>("∞").unwrap(), LoopCount::Infinite);
        assert!(serde_yaml::from_str::<LoopCount>("often").is_err());
        assert!(serde_yaml::from_str::<LoopCount>("{ times: 3 }").is_err());

        assert_eq!(serde_yaml::to_string(&LoopCount::Times(3)).unwrap().trim(), "3");
        assert_eq!(serde_yaml::to_string(&LoopCount::Infinite).unwrap().trim(), "infinite");
    }

    #[test]
    fn test_loop_config_yaml_round_trip() {
        for config in [LoopConfig::times(4), LoopConfig::infinite(), LoopConfig::default()] {
            let yaml = serde_yaml::to_string(&config).unwrap();
            assert_eq!(serde_yaml::from_str::<LoopConfig>(&yaml).unwrap(), config);
        }

        let parsed: LoopConfig = serde_yaml::from_str("enabled: true\ncount: 2").unwrap();
        assert_eq!(parsed, LoopConfig::times(2));
    }

    #[test]
    fn test_wrapped_position() {
        assert!(approx(wrapped_position(4.0, 0.5, 2.0), 4.5));
        assert!(approx(wrapped_position(4.0, 2.5, 2.0), 4.5));
        assert!(approx(wrapped_position(4.0, 6.0, 2.0), 4.0));
    }

    #[test]
    fn test_empty_plan() {
        let notes = vec![Note::new(60, 0.0, 1.0)];
        let plan = RollPlan::build(&notes, 8.0, 120.0, &LoopConfig::default(), false);
        assert!(plan.is_empty());
    }
}
