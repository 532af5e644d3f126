//! Session configuration persistence.
//!
//! Saves and loads a playback session (tempo, MIDI output, rolls and the
//! queue order) to/from YAML files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::instrument::InstrumentKind;
use crate::midi_file::notes_from_midi_file;
use crate::note::{Grid, Note};
use crate::roll::StaticRoll;
use crate::timing::LoopConfig;

/// Configuration for a single roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RollConfig {
    /// Inline notes, used when no MIDI file is given
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    /// MIDI file to import notes from (relative to the session file or absolute)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_file: Option<String>,
    /// Quarter-note position playback begins from
    #[serde(default)]
    pub queue_start: f64,
    #[serde(default, rename = "loop")]
    pub loop_config: LoopConfig,
    /// Instrument kind (session default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentKind>,
    #[serde(default)]
    pub grid: Grid,
}

impl RollConfig {
    /// Build the roll, importing the MIDI file if one is configured.
    ///
    /// `base_dir` resolves relative MIDI file paths.
    pub fn build_roll(&self, base_dir: &Path) -> Result<StaticRoll> {
        let notes = match &self.midi_file {
            Some(file) => notes_from_midi_file(base_dir.join(file))?,
            None => self.notes.clone(),
        };
        Ok(StaticRoll::new(notes)
            .with_queue_start(self.queue_start)
            .with_grid(self.grid))
    }
}

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_tempo")]
    pub tempo_bpm: f64,
    /// Delay between transport start and the first event
    #[serde(default = "default_lead_in_ms")]
    pub lead_in_ms: u64,
    /// How early triggers are handed to instruments
    #[serde(default = "default_lookahead_ms")]
    pub lookahead_ms: u64,
    /// Host frame interval driving ticks and playhead animation
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub default_instrument: InstrumentKind,
    /// MIDI output device name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// First MIDI output channel (1-16, stored as 1-indexed for human readability)
    #[serde(default = "default_channel")]
    pub output_channel: u8,
    /// Rolls keyed by id
    #[serde(default)]
    pub rolls: BTreeMap<String, RollConfig>,
    /// Roll ids played together when no single roll is requested
    #[serde(default)]
    pub queue: Vec<String>,
}

fn default_tempo() -> f64 {
    120.0
}

fn default_lead_in_ms() -> u64 {
    100
}

fn default_lookahead_ms() -> u64 {
    50
}

fn default_frame_interval_ms() -> u64 {
    16
}

fn default_channel() -> u8 {
    1 // 1-indexed for YAML readability
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tempo_bpm: default_tempo(),
            lead_in_ms: default_lead_in_ms(),
            lookahead_ms: default_lookahead_ms(),
            frame_interval_ms: default_frame_interval_ms(),
            default_instrument: InstrumentKind::default(),
            output_device: None,
            output_channel: default_channel(),
            rolls: BTreeMap::new(),
            queue: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a YAML file. A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse a session and check its tempo.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Invalid session YAML")?;
        if !(config.tempo_bpm.is_finite() && config.tempo_bpm > 0.0) {
            bail!("tempo_bpm must be positive, got {}", config.tempo_bpm);
        }
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize session")?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            lead_in: Duration::from_millis(self.lead_in_ms),
            lookahead: self.lookahead_ms as f64 / 1000.0,
            default_instrument: self.default_instrument,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// 0-indexed channel for the MIDI layer.
    pub fn midi_channel(&self) -> u8 {
        self.output_channel.clamp(1, 16) - 1
    }
}
