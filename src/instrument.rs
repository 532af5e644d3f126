//! Instrument capability and load readiness.
//!
//! An instrument is the sound generator bound to a roll. The coordinator
//! creates them through an [`InstrumentFactory`], owns them exclusively and
//! is the only place that disposes them.
//!
//! Some instruments load asynchronously (sample-based pianos). Their
//! [`Readiness`] is awaited once before a play operation schedules
//! anything.

use std::fmt;
use std::str::FromStr;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Closed set of instrument kinds a roll can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstrumentKind {
    PolySynth,
    FmSynth,
    AmSynth,
    MonoSynth,
    /// Sample-based piano
    #[default]
    Piano,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 5] = [
        InstrumentKind::PolySynth,
        InstrumentKind::FmSynth,
        InstrumentKind::AmSynth,
        InstrumentKind::MonoSynth,
        InstrumentKind::Piano,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InstrumentKind::PolySynth => "poly-synth",
            InstrumentKind::FmSynth => "fm-synth",
            InstrumentKind::AmSynth => "am-synth",
            InstrumentKind::MonoSynth => "mono-synth",
            InstrumentKind::Piano => "piano",
        }
    }

    /// Whether the kind has to load before it can play.
    pub fn is_sampled(&self) -> bool {
        matches!(self, InstrumentKind::Piano)
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstrumentKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("Unknown instrument kind: {}", s))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstrumentError {
    #[error("Failed to load {kind} instrument: {reason}")]
    LoadFailed { kind: InstrumentKind, reason: String },
}

/// Load progress of an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

/// Awaitable view of an instrument's load state.
///
/// Cheap to clone and `Send + 'static`, so several can be awaited
/// concurrently on a `JoinSet`.
#[derive(Debug, Clone)]
pub struct Readiness {
    kind: InstrumentKind,
    rx: watch::Receiver<LoadState>,
    /// Earliest instant a ready instrument may be played
    settle_at: Option<Instant>,
}

impl Readiness {
    /// Readiness of an instrument that needs no loading.
    pub fn ready(kind: InstrumentKind) -> Self {
        let (_tx, rx) = watch::channel(LoadState::Ready);
        Self {
            kind,
            rx,
            settle_at: None,
        }
    }

    /// Readiness of an instrument that is loaded but only usable from `at`.
    pub fn settling(kind: InstrumentKind, at: Instant) -> Self {
        Self {
            settle_at: Some(at),
            ..Self::ready(kind)
        }
    }

    /// Create a readiness that starts out loading, with the sender used to
    /// report the outcome.
    pub fn loading(kind: InstrumentKind) -> (watch::Sender<LoadState>, Self) {
        let (tx, rx) = watch::channel(LoadState::Loading);
        (
            tx,
            Self {
                kind,
                rx,
                settle_at: None,
            },
        )
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn state(&self) -> LoadState {
        self.rx.borrow().clone()
    }

    /// Wait until loading finished.
    pub async fn wait(mut self) -> Result<(), InstrumentError> {
        let state = match self.rx.wait_for(|s| *s != LoadState::Loading).await {
            Ok(state) => state.clone(),
            Err(_) => LoadState::Failed("loader dropped before finishing".to_string()),
        };

        if let LoadState::Failed(reason) = state {
            return Err(InstrumentError::LoadFailed {
                kind: self.kind,
                reason,
            });
        }
        if let Some(at) = self.settle_at {
            sleep_until(at).await;
        }
        Ok(())
    }
}

/// Sound generator bound to one roll.
pub trait Instrument {
    fn kind(&self) -> InstrumentKind;

    fn readiness(&self) -> Readiness;

    /// Play `pitch` (e.g. "C4") for `duration` seconds at transport time `time`.
    fn trigger(&mut self, pitch: &str, duration: f64, time: f64, velocity: f32);

    /// Called on every coordinator tick with the current transport time.
    fn advance(&mut self, _now: f64) {}

    /// Silence everything that is still sounding.
    fn release_all(&mut self) {}

    fn dispose(&mut self);
}

/// Creates instruments of a requested kind.
pub trait InstrumentFactory {
    fn create(&mut self, kind: InstrumentKind) -> Box<dyn Instrument>;
}

/// Instrument that only logs what it is asked to play.
///
/// Used when no audio or MIDI backend is available.
pub struct LogInstrument {
    kind: InstrumentKind,
    label: String,
    triggers: usize,
}

impl LogInstrument {
    pub fn new(kind: InstrumentKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            triggers: 0,
        }
    }

    pub fn triggers(&self) -> usize {
        self.triggers
    }
}

impl Instrument for LogInstrument {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn readiness(&self) -> Readiness {
        Readiness::ready(self.kind)
    }

    fn trigger(&mut self, pitch: &str, duration: f64, time: f64, velocity: f32) {
        self.triggers += 1;
        info!(
            "[{}] {} {:>4} @ {:.3}s for {:.3}s vel {:.2}",
            self.label, self.kind, pitch, time, duration, velocity
        );
    }

    fn dispose(&mut self) {
        debug!("[{}] disposed after {} triggers", self.label, self.triggers);
    }
}

#[derive(Default)]
pub struct LogInstrumentFactory {
    created: usize,
}

impl InstrumentFactory for LogInstrumentFactory {
    fn create(&mut self, kind: InstrumentKind) -> Box<dyn Instrument> {
        self.created += 1;
        Box::new(LogInstrument::new(kind, format!("inst{}", self.created)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_name() {
        for kind in InstrumentKind::ALL {
            assert_eq!(kind.name().parse::<InstrumentKind>(), Ok(kind));
        }
        assert!("theremin".parse::<InstrumentKind>().is_err());
    }

    #[test]
    fn test_default_kind_is_sampled_piano() {
        assert_eq!(InstrumentKind::default(), InstrumentKind::Piano);
        assert!(InstrumentKind::default().is_sampled());
        assert!(!InstrumentKind::FmSynth.is_sampled());
    }

    #[tokio::test]
    async fn test_ready_resolves_immediately() {
        let readiness = Readiness::ready(InstrumentKind::PolySynth);
        assert_eq!(readiness.state(), LoadState::Ready);
        assert!(readiness.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_loading_resolves_when_sender_reports() {
        let (tx, readiness) = Readiness::loading(InstrumentKind::Piano);
        let waiter = tokio::spawn(readiness.wait());
        tx.send(LoadState::Ready).unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failed_load_is_reported() {
        let (tx, readiness) = Readiness::loading(InstrumentKind::Piano);
        tx.send(LoadState::Failed("missing samples".to_string())).unwrap();
        let err = readiness.wait().await.unwrap_err();
        assert_eq!(
            err,
            InstrumentError::LoadFailed {
                kind: InstrumentKind::Piano,
                reason: "missing samples".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_settling_waits_until_instant() {
        let at = Instant::now() + std::time::Duration::from_millis(20);
        let readiness = Readiness::settling(InstrumentKind::Piano, at);
        assert_eq!(readiness.state(), LoadState::Ready);
        readiness.wait().await.unwrap();
        assert!(Instant::now() >= at);
    }

    #[tokio::test]
    async fn test_dropped_loader_is_a_failure() {
        let (tx, readiness) = Readiness::loading(InstrumentKind::Piano);
        drop(tx);
        assert!(readiness.wait().await.is_err());
    }

    #[test]
    fn test_log_instrument_counts_triggers() {
        let mut inst = LogInstrument::new(InstrumentKind::MonoSynth, "test");
        inst.trigger("C4", 0.5, 0.0, 0.8);
        inst.trigger("D4", 0.5, 0.5, 0.8);
        assert_eq!(inst.triggers(), 2);
    }
}
