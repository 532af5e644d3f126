//! Playback coordinator for piano-roll editors.
//!
//! Converts the notes of independently edited rolls into timed triggers on
//! one shared transport. Rolls play alone, together as a queue, or looped,
//! and their live playheads follow the transport while they sound.

pub mod animation;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod instrument;
pub mod midi;
pub mod midi_file;
pub mod note;
pub mod registry;
pub mod roll;
pub mod timing;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorSettings, PlayError, PlaybackMode, Registration};
pub use instrument::{Instrument, InstrumentFactory, InstrumentKind};
pub use note::Note;
pub use roll::{Roll, StaticRoll};
pub use timing::{LoopConfig, LoopCount};
pub use transport::{ManualTransport, SystemTransport, Transport};
