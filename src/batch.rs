//! Event batches: one roll's scheduled events bound to the transport.
//!
//! A batch remembers how far along the transport it has already fired, so
//! each tick only hands out the triggers that became due since the previous
//! one. Looping batches repeat their events every loop length for a finite
//! or unbounded number of iterations.

use crate::timing::{EffectiveLoops, ScheduledEvent};

/// Loop settings of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchLoop {
    /// Length of one repetition in seconds
    pub length: f64,
    /// `None` repeats until the batch is disposed
    pub iterations: Option<u32>,
}

/// An event resolved to an absolute transport time.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub pitch: u8,
    pub duration: f64,
    pub time: f64,
    pub velocity: f32,
}

#[derive(Debug, Clone)]
pub struct EventBatch {
    roll_id: String,
    events: Vec<ScheduledEvent>,
    looping: Option<BatchLoop>,
    /// Transport time up to which triggers were handed out (exclusive)
    fired_until: f64,
}

impl EventBatch {
    pub fn new(roll_id: impl Into<String>, events: Vec<ScheduledEvent>) -> Self {
        Self {
            roll_id: roll_id.into(),
            events,
            looping: None,
            fired_until: 0.0,
        }
    }

    /// Repeat the batch. Only takes effect when `loops` actually repeats.
    pub fn set_loop(&mut self, length: f64, loops: EffectiveLoops) {
        if length <= 0.0 || !loops.repeats() {
            self.looping = None;
            return;
        }
        self.looping = Some(BatchLoop {
            length,
            iterations: match loops {
                EffectiveLoops::Finite(n) => Some(n),
                EffectiveLoops::Infinite => None,
            },
        });
    }

    pub fn roll_id(&self) -> &str {
        &self.roll_id
    }

    pub fn looping(&self) -> Option<BatchLoop> {
        self.looping
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every trigger with a time in `[fired_until, until)`.
    pub fn due(&mut self, until: f64) -> Vec<Trigger> {
        let from = self.fired_until;
        if until <= from {
            return Vec::new();
        }
        self.fired_until = until;

        let mut triggers = Vec::new();
        match self.looping {
            None => {
                for event in &self.events {
                    push_if_due(&mut triggers, event, event.time_offset, from, until);
                }
            }
            Some(BatchLoop { length, iterations }) => {
                let first = (from / length).floor() as u64;
                let mut last = (until / length).floor() as u64;
                if let Some(n) = iterations {
                    if n == 0 {
                        return triggers;
                    }
                    last = last.min(n as u64 - 1);
                }
                for k in first..=last {
                    let base = k as f64 * length;
                    for event in self.events.iter().filter(|e| e.time_offset < length) {
                        push_if_due(&mut triggers, event, base + event.time_offset, from, until);
                    }
                }
            }
        }
        triggers
    }
}

fn push_if_due(triggers: &mut Vec<Trigger>, event: &ScheduledEvent, time: f64, from: f64, until: f64) {
    if time >= from && time < until {
        triggers.push(Trigger {
            pitch: event.pitch,
            duration: event.duration,
            time,
            velocity: event.velocity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pitch: u8, offset: f64) -> ScheduledEvent {
        ScheduledEvent {
            pitch,
            time_offset: offset,
            duration: 0.25,
            velocity: 0.8,
        }
    }

    fn times(triggers: &[Trigger]) -> Vec<f64> {
        triggers.iter().map(|t| t.time).collect()
    }

    #[test]
    fn test_fires_each_event_once() {
        let mut batch = EventBatch::new("a", vec![event(60, 0.0), event(62, 0.5), event(64, 1.0)]);

        assert_eq!(times(&batch.due(0.1)), vec![0.0]);
        assert!(batch.due(0.1).is_empty());
        assert_eq!(times(&batch.due(0.6)), vec![0.5]);
        assert_eq!(times(&batch.due(5.0)), vec![1.0]);
        assert!(batch.due(10.0).is_empty());
    }

    #[test]
    fn test_set_loop_ignored_for_single_pass() {
        let mut batch = EventBatch::new("a", vec![event(60, 0.0)]);
        batch.set_loop(0.5, EffectiveLoops::Finite(1));
        assert!(batch.looping().is_none());
    }

    #[test]
    fn test_finite_loop_repeats_and_stops() {
        let mut batch = EventBatch::new("a", vec![event(60, 0.0), event(62, 0.25)]);
        batch.set_loop(0.5, EffectiveLoops::Finite(3));

        let all = batch.due(10.0);
        assert_eq!(times(&all), vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.25]);
    }

    #[test]
    fn test_infinite_loop_keeps_going() {
        let mut batch = EventBatch::new("a", vec![event(60, 0.0)]);
        batch.set_loop(1.0, EffectiveLoops::Infinite);

        assert_eq!(times(&batch.due(2.5)), vec![0.0, 1.0, 2.0]);
        assert_eq!(times(&batch.due(100.5)).len(), 98);
    }

    #[test]
    fn test_loop_window_split_across_ticks() {
        let mut batch = EventBatch::new("a", vec![event(60, 0.25)]);
        batch.set_loop(0.5, EffectiveLoops::Finite(4));

        assert!(batch.due(0.2).is_empty());
        assert_eq!(times(&batch.due(0.8)), vec![0.25, 0.75]);
        assert_eq!(times(&batch.due(1.3)), vec![1.25]);
        assert_eq!(times(&batch.due(9.0)), vec![1.75]);
    }
}
