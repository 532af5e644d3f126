//! Registered rolls with their instruments and loop settings.
//!
//! The registry owns every instrument it creates. An instrument is disposed
//! exactly once: when it is replaced, when its roll is unregistered, or
//! when the registry is cleared.

use std::collections::HashMap;

use log::debug;
use thiserror::Error;

use crate::instrument::{Instrument, InstrumentFactory, InstrumentKind};
use crate::roll::Roll;
use crate::timing::LoopConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// Unregister the existing roll before registering a replacement.
    #[error("Roll '{0}' is already registered")]
    AlreadyRegistered(String),
}

pub struct RollEntry {
    pub roll: Box<dyn Roll>,
    pub instrument: Box<dyn Instrument>,
    pub loop_config: LoopConfig,
}

pub struct RollRegistry {
    entries: HashMap<String, RollEntry>,
    factory: Box<dyn InstrumentFactory>,
    default_kind: InstrumentKind,
}

impl RollRegistry {
    pub fn new(factory: Box<dyn InstrumentFactory>, default_kind: InstrumentKind) -> Self {
        Self {
            entries: HashMap::new(),
            factory,
            default_kind,
        }
    }

    /// Add a roll with a default instrument and looping disabled.
    pub fn register(&mut self, id: &str, roll: Box<dyn Roll>) -> Result<(), RegisterError> {
        if self.entries.contains_key(id) {
            return Err(RegisterError::AlreadyRegistered(id.to_string()));
        }

        let instrument = self.factory.create(self.default_kind);
        debug!("Registered roll '{}' with {}", id, self.default_kind);
        self.entries.insert(
            id.to_string(),
            RollEntry {
                roll,
                instrument,
                loop_config: LoopConfig::default(),
            },
        );
        Ok(())
    }

    /// Remove a roll and dispose its instrument. Returns false for unknown ids.
    pub fn unregister(&mut self, id: &str) -> bool {
        match self.entries.remove(id) {
            Some(mut entry) => {
                entry.instrument.dispose();
                debug!("Unregistered roll '{}'", id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RollEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RollEntry> {
        self.entries.get_mut(id)
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (&str, &mut RollEntry)> {
        self.entries.iter_mut().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace a roll's instrument, disposing the old one.
    pub fn set_instrument(&mut self, id: &str, kind: InstrumentKind) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.instrument.dispose();
        entry.instrument = self.factory.create(kind);
        debug!("Roll '{}' now uses {}", id, kind);
        true
    }

    pub fn set_loop(&mut self, id: &str, config: LoopConfig) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.loop_config = config;
                true
            }
            None => false,
        }
    }

    pub fn loop_config(&self, id: &str) -> Option<LoopConfig> {
        self.entries.get(id).map(|e| e.loop_config)
    }

    /// Dispose every instrument and forget every roll.
    pub fn clear(&mut self) {
        for (_, mut entry) in self.entries.drain() {
            entry.instrument.dispose();
        }
    }
}
