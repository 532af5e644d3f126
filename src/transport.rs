//! Transport clock capability.
//!
//! The coordinator never reads a system clock directly. It talks to a
//! [`Transport`], which provides:
//! - Tempo and elapsed transport seconds
//! - Start (after a lead-in), stop and rewind
//! - One-shot timers at absolute transport times, and cancelling all of them
//!
//! Timers do not carry callbacks. The owner polls [`Transport::take_due`]
//! from its periodic tick and dispatches on the returned ids, which keeps
//! every mutation on the caller's thread.
//!
//! Two implementations are provided: [`SystemTransport`] follows the wall
//! clock, [`ManualTransport`] only moves when told to and is what tests use.

use std::time::{Duration, Instant};

/// Identifies a one-shot timer scheduled on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Process-wide clock shared by every roll.
pub trait Transport {
    /// Tempo in quarter notes per minute.
    fn bpm(&self) -> f64;

    fn set_bpm(&mut self, bpm: f64);

    /// Seconds elapsed since the transport started.
    ///
    /// Reads 0 while stopped and while the lead-in is still pending.
    fn seconds(&self) -> f64;

    fn is_running(&self) -> bool;

    /// True once running and past the lead-in, i.e. position 0 was reached.
    fn has_started(&self) -> bool;

    /// Start the transport once `lead_in` has passed.
    fn start(&mut self, lead_in: Duration);

    /// Halt the transport, keeping its position.
    fn stop(&mut self);

    /// Move the position back to 0.
    fn rewind(&mut self);

    /// Schedule a one-shot timer at an absolute transport time.
    fn schedule_once(&mut self, at_seconds: f64) -> TimerId;

    /// Drop every pending timer.
    fn cancel_all(&mut self);

    /// Remove and return the timers whose time has been reached, earliest first.
    fn take_due(&mut self) -> Vec<TimerId>;
}

/// Pending one-shot timers, shared by the transport implementations.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    pending: Vec<(f64, TimerId)>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at_seconds: f64) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.push((at_seconds, id));
        id
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn take_due(&mut self, now: f64) -> Vec<TimerId> {
        let mut due: Vec<(f64, TimerId)> = Vec::new();
        self.pending.retain(|&(at, id)| {
            if at <= now {
                due.push((at, id));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.0.total_cmp(&b.0));
        due.into_iter().map(|(_, id)| id).collect()
    }
}

/// Transport driven by the wall clock.
pub struct SystemTransport {
    bpm: f64,
    /// Instant the transport (will) reach position 0, set while running
    started_at: Option<Instant>,
    /// Position kept across stop/start
    offset: f64,
    timers: TimerQueue,
}

impl SystemTransport {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            started_at: None,
            offset: 0.0,
            timers: TimerQueue::new(),
        }
    }

    fn seconds_at(&self, now: Instant) -> f64 {
        match self.started_at {
            Some(start) if now > start => self.offset + now.duration_since(start).as_secs_f64(),
            _ => self.offset,
        }
    }
}

impl Transport for SystemTransport {
    fn bpm(&self) -> f64 {
        self.bpm
    }

    fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    fn seconds(&self) -> f64 {
        self.seconds_at(Instant::now())
    }

    fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    fn has_started(&self) -> bool {
        self.started_at.is_some_and(|start| Instant::now() >= start)
    }

    fn start(&mut self, lead_in: Duration) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now() + lead_in);
        }
    }

    fn stop(&mut self) {
        self.offset = self.seconds();
        self.started_at = None;
    }

    fn rewind(&mut self) {
        self.offset = 0.0;
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    fn schedule_once(&mut self, at_seconds: f64) -> TimerId {
        self.timers.schedule(at_seconds)
    }

    fn cancel_all(&mut self) {
        self.timers.clear();
    }

    fn take_due(&mut self) -> Vec<TimerId> {
        if !self.is_running() {
            return Vec::new();
        }
        let now = self.seconds();
        self.timers.take_due(now)
    }
}

/// Deterministic transport that advances only through [`ManualTransport::advance`].
///
/// Wall time passed to `advance` is consumed by the lead-in first, then moves
/// the transport position.
#[derive(Debug)]
pub struct ManualTransport {
    bpm: f64,
    running: bool,
    position: f64,
    pending_lead_in: f64,
    timers: TimerQueue,
    /// Number of start/stop/rewind/cancel calls, for asserting on idle stops
    mutations: usize,
}

impl ManualTransport {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm,
            running: false,
            position: 0.0,
            pending_lead_in: 0.0,
            timers: TimerQueue::new(),
            mutations: 0,
        }
    }

    /// Let `seconds` of wall time pass.
    pub fn advance(&mut self, seconds: f64) {
        if !self.running {
            return;
        }
        let consumed = seconds.min(self.pending_lead_in);
        self.pending_lead_in -= consumed;
        if self.pending_lead_in < 1e-12 {
            self.pending_lead_in = 0.0;
        }
        self.position += seconds - consumed;
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn mutations(&self) -> usize {
        self.mutations
    }
}

impl Transport for ManualTransport {
    fn bpm(&self) -> f64 {
        self.bpm
    }

    fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    fn seconds(&self) -> f64 {
        self.position
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn has_started(&self) -> bool {
        self.running && self.pending_lead_in == 0.0
    }

    fn start(&mut self, lead_in: Duration) {
        self.mutations += 1;
        if !self.running {
            self.running = true;
            self.pending_lead_in = lead_in.as_secs_f64();
        }
    }

    fn stop(&mut self) {
        self.mutations += 1;
        self.running = false;
        self.pending_lead_in = 0.0;
    }

    fn rewind(&mut self) {
        self.mutations += 1;
        self.position = 0.0;
    }

    fn schedule_once(&mut self, at_seconds: f64) -> TimerId {
        self.timers.schedule(at_seconds)
    }

    fn cancel_all(&mut self) {
        self.mutations += 1;
        self.timers.clear();
    }

    fn take_due(&mut self) -> Vec<TimerId> {
        if !self.running {
            return Vec::new();
        }
        self.timers.take_due(self.position)
    }
}
