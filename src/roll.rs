//! Roll owner interface.
//!
//! A roll is an independently editable note sequence. The editor that owns
//! it implements [`Roll`]; the coordinator only reads copies of its notes
//! and pushes live playhead positions back.

use std::cell::Cell;
use std::rc::Rc;

use crate::note::{Grid, Note};

pub trait Roll {
    /// Current notes, copied.
    fn notes(&self) -> Vec<Note>;

    /// Quarter-note position playback begins from.
    fn queue_start(&self) -> f64;

    /// Receive the live playhead position in quarter notes.
    fn set_live_playhead(&mut self, position: f64);

    fn grid(&self) -> Grid;
}

/// Shared view of a roll's live playhead.
///
/// Clones observe the same position, so a host keeps one while the roll
/// itself is owned by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct Playhead(Rc<Cell<f64>>);

impl Playhead {
    pub fn get(&self) -> f64 {
        self.0.get()
    }

    pub fn set(&self, position: f64) {
        self.0.set(position);
    }
}

/// A roll with fixed content.
#[derive(Debug, Clone, Default)]
pub struct StaticRoll {
    pub notes: Vec<Note>,
    pub queue_start: f64,
    pub grid: Grid,
    playhead: Playhead,
}

impl StaticRoll {
    pub fn new(notes: Vec<Note>) -> Self {
        Self {
            notes,
            ..Self::default()
        }
    }

    pub fn with_queue_start(mut self, queue_start: f64) -> Self {
        self.queue_start = queue_start;
        self.playhead.set(queue_start);
        self
    }

    pub fn with_grid(mut self, grid: Grid) -> Self {
        self.grid = grid;
        self
    }

    pub fn playhead(&self) -> Playhead {
        self.playhead.clone()
    }
}

impl Roll for StaticRoll {
    fn notes(&self) -> Vec<Note> {
        self.notes.clone()
    }

    fn queue_start(&self) -> f64 {
        self.queue_start
    }

    fn set_live_playhead(&mut self, position: f64) {
        self.playhead.set(position);
    }

    fn grid(&self) -> Grid {
        self.grid
    }
}
