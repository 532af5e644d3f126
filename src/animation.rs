//! Live playhead animation.
//!
//! One task per playing roll turns elapsed transport time into a playhead
//! position. Tasks are polled once per host frame and cancel themselves as
//! soon as the session stops or their roll leaves the active set.

use std::collections::HashMap;

use crate::timing::wrapped_position;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationTask {
    /// Playhead position when the transport is at 0
    pub start_position: f64,
    pub quarters_per_second: f64,
    /// Loop length in quarter notes when the roll loops
    pub loop_length: Option<f64>,
}

impl AnimationTask {
    /// Playhead position after `elapsed_seconds` of transport time.
    pub fn position(&self, elapsed_seconds: f64) -> f64 {
        let elapsed_quarters = elapsed_seconds * self.quarters_per_second;
        match self.loop_length {
            Some(length) if length > 0.0 => wrapped_position(self.start_position, elapsed_quarters, length),
            _ => self.start_position + elapsed_quarters,
        }
    }
}

#[derive(Debug, Default)]
pub struct Animator {
    tasks: HashMap<String, AnimationTask>,
}

impl Animator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start animating a roll, replacing any task it already had.
    pub fn start(&mut self, roll_id: &str, task: AnimationTask) {
        self.tasks.insert(roll_id.to_string(), task);
    }

    pub fn cancel(&mut self, roll_id: &str) -> bool {
        self.tasks.remove(roll_id).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.tasks.clear();
    }

    pub fn is_animating(&self, roll_id: &str) -> bool {
        self.tasks.contains_key(roll_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run one frame and return the position of every task still alive.
    ///
    /// A task whose roll is no longer active, or any task while not playing,
    /// is dropped without producing a position.
    pub fn frame(
        &mut self,
        playing: bool,
        elapsed_seconds: f64,
        is_active: impl Fn(&str) -> bool,
    ) -> Vec<(String, f64)> {
        if !playing {
            self.tasks.clear();
            return Vec::new();
        }

        self.tasks.retain(|id, _| is_active(id));
        self.tasks
            .iter()
            .map(|(id, task)| (id.clone(), task.position(elapsed_seconds)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(start: f64, loop_length: Option<f64>) -> AnimationTask {
        AnimationTask {
            start_position: start,
            quarters_per_second: 2.0, // 120 BPM
            loop_length,
        }
    }

    #[test]
    fn test_linear_position() {
        assert_eq!(task(4.0, None).position(0.0), 4.0);
        assert_eq!(task(4.0, None).position(1.5), 7.0);
    }

    #[test]
    fn test_looped_position_wraps() {
        let t = task(4.0, Some(2.0));
        assert_eq!(t.position(0.5), 5.0);
        assert_eq!(t.position(1.0), 4.0);
        assert_eq!(t.position(1.25), 4.5);
    }

    #[test]
    fn test_frame_cancels_inactive_rolls() {
        let mut animator = Animator::new();
        animator.start("a", task(0.0, None));
        animator.start("b", task(8.0, None));

        let positions = animator.frame(true, 0.5, |id| id == "b");
        assert_eq!(positions, vec![("b".to_string(), 9.0)]);
        assert!(!animator.is_animating("a"));
        assert!(animator.is_animating("b"));
    }

    #[test]
    fn test_frame_stops_everything_when_not_playing() {
        let mut animator = Animator::new();
        animator.start("a", task(0.0, None));

        assert!(animator.frame(false, 0.5, |_| true).is_empty());
        assert!(animator.is_empty());
    }

    #[test]
    fn test_one_task_per_roll() {
        let mut animator = Animator::new();
        animator.start("a", task(0.0, None));
        animator.start("a", task(2.0, None));
        assert_eq!(animator.len(), 1);
        assert_eq!(animator.frame(true, 0.0, |_| true), vec![("a".to_string(), 2.0)]);

        assert!(animator.cancel("a"));
        assert!(!animator.cancel("a"));
    }
}
