//! MIDI output backend for rolls.
//!
//! Each roll instrument becomes a MIDI channel on a shared output port.
//! Triggers arrive slightly ahead of time (the coordinator schedules with a
//! lookahead), so [`MidiInstrument`] queues note-on/note-off messages at
//! their transport time and sends them from [`Instrument::advance`].

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info, warn};
use midir::{MidiOutput, MidiOutputConnection};
use tokio::time::Instant;

use crate::instrument::{Instrument, InstrumentFactory, InstrumentKind, LoadState, Readiness};
use crate::note::parse_pitch_name;

/// Note Off - status high nibble
pub const NOTE_OFF: u8 = 0x80;

/// Note On - status high nibble
pub const NOTE_ON: u8 = 0x90;

/// Control Change - status high nibble
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Program Change - status high nibble
pub const PROGRAM_CHANGE: u8 = 0xC0;

/// Channel mode message silencing every sounding note
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// General MIDI percussion channel (0-indexed), never assigned to rolls
pub const DRUM_CHANNEL: u8 = 9;

/// Anything that accepts raw MIDI messages.
pub trait MidiSink {
    fn send(&mut self, message: &[u8]) -> Result<(), String>;
}

/// Wrapper for MIDI output connection.
pub struct MidiOut {
    connection: MidiOutputConnection,
    pub port_name: String,
}

/// Pick the output port for a session.
///
/// A configured device must exist: an exact name match wins, then a
/// case-insensitive substring match. Without a configured device the IAC
/// Driver is preferred, then the first port.
pub fn choose_port(names: &[String], device: Option<&str>) -> Result<usize, String> {
    if names.is_empty() {
        return Err("No MIDI output ports found".to_string());
    }

    let Some(device) = device else {
        return Ok(names.iter().position(|n| n.contains("IAC")).unwrap_or(0));
    };

    let wanted = device.to_lowercase();
    names
        .iter()
        .position(|n| n == device)
        .or_else(|| names.iter().position(|n| n.to_lowercase().contains(&wanted)))
        .ok_or_else(|| format!("MIDI output '{}' not found (available: {})", device, names.join(", ")))
}

impl MidiOut {
    /// Connect to the port [`choose_port`] selects for `device`.
    pub fn new(device: Option<&str>) -> Result<Self, String> {
        let midi_out = MidiOutput::new("rollplay-out")
            .map_err(|e| format!("Failed to create MIDI output: {}", e))?;

        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_else(|_| "Unknown".to_string()))
            .collect();
        let index = choose_port(&names, device)?;

        let port_name = names[index].clone();
        let connection = midi_out
            .connect(&ports[index], "rollplay-out")
            .map_err(|e| format!("Failed to connect MIDI output '{}': {}", port_name, e))?;

        info!("MIDI output connected to: {}", port_name);
        Ok(Self {
            connection,
            port_name,
        })
    }
}

impl MidiSink for MidiOut {
    fn send(&mut self, message: &[u8]) -> Result<(), String> {
        self.connection
            .send(message)
            .map_err(|e| format!("Failed to send MIDI: {}", e))
    }
}

/// General MIDI program used to voice each kind.
pub fn gm_program(kind: InstrumentKind) -> u8 {
    match kind {
        InstrumentKind::PolySynth => 81, // Lead 2 (sawtooth)
        InstrumentKind::FmSynth => 5,    // Electric Piano 2
        InstrumentKind::AmSynth => 89,   // Pad 2 (warm)
        InstrumentKind::MonoSynth => 38, // Synth Bass 1
        InstrumentKind::Piano => 0,      // Acoustic Grand Piano
    }
}

/// Time a sampled kind needs after its program change before it plays cleanly.
pub const SAMPLED_SETTLE: Duration = Duration::from_millis(50);

pub type SharedSink = Rc<RefCell<dyn MidiSink>>;

/// An instrument playing on one channel of a MIDI output.
pub struct MidiInstrument {
    kind: InstrumentKind,
    channel: u8,
    sink: SharedSink,
    /// Messages waiting for their transport time, sorted by time
    pending: Vec<(f64, [u8; 3])>,
    state: LoadState,
    ready_at: Instant,
}

impl MidiInstrument {
    /// Select the kind's program on `channel`.
    ///
    /// The instrument is ready once the program change went out, sampled
    /// kinds only after [`SAMPLED_SETTLE`]. A send failure leaves it failed.
    pub fn new(kind: InstrumentKind, channel: u8, sink: SharedSink) -> Self {
        let channel = channel & 0x0F;
        let state = match sink
            .borrow_mut()
            .send(&[PROGRAM_CHANGE | channel, gm_program(kind)])
        {
            Ok(()) => LoadState::Ready,
            Err(e) => LoadState::Failed(e),
        };
        let ready_at = if kind.is_sampled() {
            Instant::now() + SAMPLED_SETTLE
        } else {
            Instant::now()
        };
        Self {
            kind,
            channel,
            sink,
            pending: Vec::new(),
            state,
            ready_at,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    fn queue(&mut self, time: f64, message: [u8; 3]) {
        let idx = self.pending.partition_point(|(t, _)| *t <= time);
        self.pending.insert(idx, (time, message));
    }

    fn send(&self, message: &[u8]) {
        if let Err(e) = self.sink.borrow_mut().send(message) {
            warn!("channel {}: {}", self.channel + 1, e);
        }
    }
}

impl Instrument for MidiInstrument {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn readiness(&self) -> Readiness {
        match &self.state {
            LoadState::Ready if self.kind.is_sampled() => Readiness::settling(self.kind, self.ready_at),
            LoadState::Ready => Readiness::ready(self.kind),
            other => {
                let (tx, readiness) = Readiness::loading(self.kind);
                let _ = tx.send(other.clone());
                readiness
            }
        }
    }

    fn trigger(&mut self, pitch: &str, duration: f64, time: f64, velocity: f32) {
        let Some(key) = parse_pitch_name(pitch) else {
            warn!("Ignoring unparsable pitch {:?}", pitch);
            return;
        };
        let vel = ((velocity.clamp(0.0, 1.0) * 127.0).round() as u8).max(1);
        self.queue(time, [NOTE_ON | self.channel, key, vel]);
        self.queue(time + duration, [NOTE_OFF | self.channel, key, 0]);
    }

    fn advance(&mut self, now: f64) {
        let due = self.pending.partition_point(|(t, _)| *t <= now);
        let ready: Vec<(f64, [u8; 3])> = self.pending.drain(..due).collect();
        for (_, message) in ready {
            self.send(&message);
        }
    }

    fn release_all(&mut self) {
        // Note-offs still matter for notes already started; pending note-ons are dropped
        let offs: Vec<[u8; 3]> = self
            .pending
            .drain(..)
            .map(|(_, m)| m)
            .filter(|m| m[0] & 0xF0 == NOTE_OFF)
            .collect();
        for message in offs {
            self.send(&message);
        }
        self.send(&[CONTROL_CHANGE | self.channel, CC_ALL_NOTES_OFF, 0]);
    }

    fn dispose(&mut self) {
        self.release_all();
        debug!("MIDI channel {} released", self.channel + 1);
    }
}

/// Hands out one MIDI channel per instrument, skipping the drum channel.
pub struct MidiInstrumentFactory {
    sink: SharedSink,
    next_channel: u8,
}

impl MidiInstrumentFactory {
    /// `first_channel` is 0-indexed.
    pub fn new(sink: SharedSink, first_channel: u8) -> Self {
        Self {
            sink,
            next_channel: first_channel & 0x0F,
        }
    }

    fn allocate_channel(&mut self) -> u8 {
        if self.next_channel == DRUM_CHANNEL {
            self.next_channel += 1;
        }
        let channel = self.next_channel;
        self.next_channel = (self.next_channel + 1) % 16;
        channel
    }
}

impl InstrumentFactory for MidiInstrumentFactory {
    fn create(&mut self, kind: InstrumentKind) -> Box<dyn Instrument> {
        let channel = self.allocate_channel();
        Box::new(MidiInstrument::new(kind, channel, self.sink.clone()))
    }
}
