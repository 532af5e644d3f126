//! Playback coordinator.
//!
//! Turns the notes of registered rolls into triggers on one shared
//! transport and keeps every playing roll's live playhead moving.
//!
//! Three ways to play:
//! - [`Coordinator::play_roll`]: one roll, optionally looping forever
//! - [`Coordinator::play_queue`]: several rolls started together, stopping
//!   at the latest of their individual deadlines
//! - per-roll looping via [`Coordinator::set_loop`], honored by both
//!
//! # Driving the coordinator
//! The host calls [`Coordinator::tick`] once per frame. A tick delivers due
//! transport timers (the stop deadline), hands due triggers to instruments,
//! and runs the playhead animation. Nothing happens between ticks.
//!
//! # Sessions
//! At most one session is active. Starting a new one first tears down the
//! previous one completely, before any new event is built.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::animation::{AnimationTask, Animator};
use crate::batch::EventBatch;
use crate::instrument::{InstrumentError, InstrumentFactory, InstrumentKind};
use crate::note::pitch_name;
use crate::registry::{RegisterError, RollRegistry};
use crate::roll::Roll;
use crate::timing::{LoopConfig, RollPlan};
use crate::transport::{TimerId, Transport};

/// Delay between starting the transport and position 0.
pub const DEFAULT_LEAD_IN: Duration = Duration::from_millis(100);

/// How far ahead of the transport triggers are handed to instruments.
pub const DEFAULT_LOOKAHEAD_SECONDS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorSettings {
    pub lead_in: Duration,
    pub lookahead: f64,
    /// Kind given to every newly registered roll
    pub default_instrument: InstrumentKind,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            lead_in: DEFAULT_LEAD_IN,
            lookahead: DEFAULT_LOOKAHEAD_SECONDS,
            default_instrument: InstrumentKind::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlayError {
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Single,
    Queue,
}

#[derive(Debug)]
struct Session {
    mode: PlaybackMode,
    active_roll_ids: Vec<String>,
    stop_timer: Option<TimerId>,
    stop_deadline: Option<f64>,
}

/// Proof of registration; hand it back to remove the roll.
#[derive(Debug)]
#[must_use = "dropping a Registration leaves the roll registered"]
pub struct Registration {
    id: String,
}

impl Registration {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unregister<T: Transport>(self, coordinator: &mut Coordinator<T>) -> bool {
        coordinator.unregister_roll(&self.id)
    }
}

pub struct Coordinator<T: Transport> {
    registry: RollRegistry,
    transport: T,
    settings: CoordinatorSettings,
    session: Option<Session>,
    batches: Vec<EventBatch>,
    animator: Animator,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(transport: T, factory: Box<dyn InstrumentFactory>, settings: CoordinatorSettings) -> Self {
        Self {
            registry: RollRegistry::new(factory, settings.default_instrument),
            transport,
            settings,
            session: None,
            batches: Vec::new(),
            animator: Animator::new(),
        }
    }

    // ============ Registry ============

    /// Register a roll under a unique id with the default instrument.
    pub fn register_roll(&mut self, id: &str, roll: Box<dyn Roll>) -> Result<Registration, RegisterError> {
        self.registry.register(id, roll)?;
        Ok(Registration { id: id.to_string() })
    }

    /// Remove a roll and dispose its instrument.
    ///
    /// A session the roll is part of is stopped first.
    pub fn unregister_roll(&mut self, id: &str) -> bool {
        if self.active_roll_ids().iter().any(|r| r == id) {
            self.stop();
        }
        self.registry.unregister(id)
    }

    /// Swap a roll's instrument. Unknown ids are ignored.
    pub fn set_instrument(&mut self, id: &str, kind: InstrumentKind) -> bool {
        self.registry.set_instrument(id, kind)
    }

    /// Replace a roll's loop settings. Unknown ids are ignored.
    pub fn set_loop(&mut self, id: &str, config: LoopConfig) -> bool {
        self.registry.set_loop(id, config)
    }

    /// Tempo used by the next play operation. Non-positive tempos are ignored.
    pub fn set_bpm(&mut self, bpm: f64) {
        if !(bpm.is_finite() && bpm > 0.0) {
            warn!("Ignoring invalid tempo {} BPM", bpm);
            return;
        }
        self.transport.set_bpm(bpm);
    }

    pub fn registry(&self) -> &RollRegistry {
        &self.registry
    }

    // ============ Observable state ============

    pub fn is_playing(&self) -> bool {
        self.session.is_some()
    }

    pub fn mode(&self) -> Option<PlaybackMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    /// The roll being played alone, if any. `None` in queue mode.
    pub fn current_roll_id(&self) -> Option<&str> {
        match &self.session {
            Some(Session {
                mode: PlaybackMode::Single,
                active_roll_ids,
                ..
            }) => active_roll_ids.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn active_roll_ids(&self) -> &[String] {
        self.session
            .as_ref()
            .map(|s| s.active_roll_ids.as_slice())
            .unwrap_or(&[])
    }

    /// Transport time at which the current session stops on its own.
    pub fn stop_deadline(&self) -> Option<f64> {
        self.session.as_ref().and_then(|s| s.stop_deadline)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ============ Playback ============

    /// Play one roll from its queue start.
    ///
    /// Waits for the roll's instrument to finish loading; a load failure is
    /// returned and nothing starts. Unknown ids and rolls without audible
    /// notes do not start a session. Must be awaited inside a Tokio runtime.
    pub async fn play_roll(&mut self, id: &str) -> Result<(), PlayError> {
        self.stop_with(false);

        let Some(entry) = self.registry.get(id) else {
            debug!("play_roll: unknown roll '{}'", id);
            return Ok(());
        };

        if let Err(e) = entry.instrument.readiness().wait().await {
            warn!("Roll '{}' cannot play: {}", id, e);
            return Err(e.into());
        }

        let Some(plan) = self.plan(id, false) else {
            return Ok(());
        };
        if plan.is_empty() {
            debug!("Roll '{}' has no notes after {}", id, plan.queue_start);
            self.set_playhead(id, plan.queue_start);
            return Ok(());
        }

        self.batches.push(Self::build_batch(id, &plan));
        let deadline = plan.stop_deadline();

        self.start_transport();
        self.session = Some(Session {
            mode: PlaybackMode::Single,
            active_roll_ids: vec![id.to_string()],
            stop_timer: None,
            stop_deadline: deadline,
        });
        self.set_playhead(id, plan.queue_start);
        self.animator.start(id, Self::animation_task(&plan));
        self.schedule_stop(deadline);

        info!(
            "Playing roll '{}' from {} ({} events, {:?})",
            id,
            plan.queue_start,
            plan.events.len(),
            plan.loops
        );
        Ok(())
    }

    /// Play several rolls together, each from its own queue start.
    ///
    /// Unknown ids are dropped, as are rolls whose instrument fails to
    /// load. Loop counts are clamped for queue playback, so the session
    /// always ends at the latest member deadline. Must be awaited inside a
    /// Tokio runtime.
    pub async fn play_queue<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<(), PlayError> {
        self.stop_with(false);

        let mut members: Vec<String> = Vec::new();
        for id in ids.iter().map(|id| id.as_ref()) {
            if self.registry.contains(id) && !members.iter().any(|m| m == id) {
                members.push(id.to_string());
            }
        }
        if members.is_empty() {
            debug!("play_queue: no registered rolls");
            return Ok(());
        }

        let ready = self.wait_ready(&members).await;
        members.retain(|id| ready.contains(id));

        let mut active = Vec::new();
        let mut joint_deadline: Option<f64> = None;
        for id in &members {
            let Some(plan) = self.plan(id, true) else {
                continue;
            };
            if plan.is_empty() {
                self.set_playhead(id, plan.queue_start);
                continue;
            }

            if let Some(deadline) = plan.stop_deadline() {
                joint_deadline = Some(joint_deadline.map_or(deadline, |d| d.max(deadline)));
            }
            self.batches.push(Self::build_batch(id, &plan));
            active.push((id.clone(), plan));
        }

        if active.is_empty() {
            debug!("play_queue: nothing audible");
            return Ok(());
        }

        self.start_transport();
        self.session = Some(Session {
            mode: PlaybackMode::Queue,
            active_roll_ids: active.iter().map(|(id, _)| id.clone()).collect(),
            stop_timer: None,
            stop_deadline: joint_deadline,
        });
        for (id, plan) in &active {
            self.set_playhead(id, plan.queue_start);
            self.animator.start(id, Self::animation_task(plan));
        }
        self.schedule_stop(joint_deadline);

        info!("Playing queue of {} rolls, stop at {:?}s", active.len(), joint_deadline);
        Ok(())
    }

    /// Stop the current session and put every roll's playhead back on its
    /// queue start. Does nothing when idle.
    pub fn stop(&mut self) {
        self.stop_with(true);
    }

    /// Stop, dispose every instrument and forget every roll.
    pub fn dispose(&mut self) {
        self.stop();
        self.registry.clear();
        info!("Coordinator disposed");
    }

    /// Host frame callback.
    pub fn tick(&mut self) {
        for timer in self.transport.take_due() {
            let is_stop = self
                .session
                .as_ref()
                .is_some_and(|s| s.stop_timer == Some(timer));
            if is_stop {
                info!("Session reached its stop deadline");
                self.stop_with(true);
            }
        }

        let now = self.transport.seconds();

        // Nothing is handed out or sent while the lead-in is still running
        if self.transport.has_started() {
            if self.session.is_some() {
                let horizon = now + self.settings.lookahead;
                for batch in &mut self.batches {
                    let triggers = batch.due(horizon);
                    if triggers.is_empty() {
                        continue;
                    }
                    let Some(entry) = self.registry.get_mut(batch.roll_id()) else {
                        continue;
                    };
                    for t in triggers {
                        entry
                            .instrument
                            .trigger(&pitch_name(t.pitch), t.duration, t.time, t.velocity);
                    }
                }
            }

            for (_, entry) in self.registry.entries_mut() {
                entry.instrument.advance(now);
            }
        }

        let playing = self.session.is_some();
        let positions = {
            let active: HashSet<&str> = self
                .session
                .as_ref()
                .map(|s| s.active_roll_ids.iter().map(String::as_str).collect())
                .unwrap_or_default();
            self.animator.frame(playing, now, |id| active.contains(id))
        };
        for (id, position) in positions {
            self.set_playhead(&id, position);
        }
    }

    // ============ Internals ============

    fn plan(&self, id: &str, queue_mode: bool) -> Option<RollPlan> {
        let entry = self.registry.get(id)?;
        Some(RollPlan::build(
            &entry.roll.notes(),
            entry.roll.queue_start(),
            self.transport.bpm(),
            &entry.loop_config,
            queue_mode,
        ))
    }

    fn build_batch(id: &str, plan: &RollPlan) -> EventBatch {
        let mut batch = EventBatch::new(id, plan.events.clone());
        batch.set_loop(plan.loop_length_seconds(), plan.loops);
        batch
    }

    fn animation_task(plan: &RollPlan) -> AnimationTask {
        AnimationTask {
            start_position: plan.queue_start,
            quarters_per_second: plan.quarters_per_second(),
            loop_length: plan.loops.repeats().then_some(plan.loop_length_quarters),
        }
    }

    /// Await every member's instrument concurrently; returns the ones that are ready.
    async fn wait_ready(&self, members: &[String]) -> HashSet<String> {
        let mut waits = JoinSet::new();
        for id in members {
            if let Some(entry) = self.registry.get(id) {
                let readiness = entry.instrument.readiness();
                let id = id.clone();
                waits.spawn(async move { (id, readiness.wait().await) });
            }
        }

        let mut ready = HashSet::new();
        while let Some(joined) = waits.join_next().await {
            match joined {
                Ok((id, Ok(()))) => {
                    ready.insert(id);
                }
                Ok((id, Err(e))) => warn!("Skipping roll '{}' in queue: {}", id, e),
                Err(e) => warn!("Readiness check aborted: {}", e),
            }
        }
        ready
    }

    fn start_transport(&mut self) {
        self.transport.rewind();
        self.transport.start(self.settings.lead_in);
    }

    fn schedule_stop(&mut self, deadline: Option<f64>) {
        let Some(deadline) = deadline else {
            debug!("No stop deadline, playing until stopped");
            return;
        };
        let timer = self.transport.schedule_once(deadline);
        if let Some(session) = self.session.as_mut() {
            session.stop_timer = Some(timer);
        }
    }

    fn set_playhead(&mut self, id: &str, position: f64) {
        if let Some(entry) = self.registry.get_mut(id) {
            entry.roll.set_live_playhead(position);
        }
    }

    /// Tear the session down. `reset_playheads` is false when another
    /// session is about to start.
    fn stop_with(&mut self, reset_playheads: bool) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let ids = session.active_roll_ids.clone();

        self.transport.stop();
        self.transport.cancel_all();

        for batch in self.batches.drain(..) {
            if let Some(entry) = self.registry.get_mut(batch.roll_id()) {
                entry.instrument.release_all();
            }
        }
        self.animator.cancel_all();

        if reset_playheads {
            for id in &ids {
                if let Some(entry) = self.registry.get_mut(id) {
                    let start = entry.roll.queue_start();
                    entry.roll.set_live_playhead(start);
                }
            }
        }

        self.session = None;
        debug!("Stopped {:?} (reset playheads: {})", ids, reset_playheads);
    }
}

impl<T: Transport> Drop for Coordinator<T> {
    fn drop(&mut self) {
        self.stop_with(false);
        self.registry.clear();
    }
}
