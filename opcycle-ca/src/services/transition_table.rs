//! Transition table: `(previous state, current state) → event type`
//!
//! Also carries the cycle boundary designations (which event opens, which close,
//! which close-and-reopen) and the phase rules, so the detector and assembler share
//! one immutable description of the work pattern.

use opcycle_common::config::{PhaseRule, TomlConfig};
use opcycle_common::{EventType, OperationalState};
use std::collections::{HashMap, HashSet};

use crate::error::Result;

/// Result of looking up one consecutive-frame pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The pair maps to a named event
    Mapped(EventType),
    /// Both frames carry the same state
    SameState,
    /// The states differ but the pair is not in the table
    Unmapped,
}

/// Immutable transition table with boundary designations and phase rules
#[derive(Debug, Clone)]
pub struct TransitionTable {
    entries: HashMap<(OperationalState, OperationalState), EventType>,
    opening: EventType,
    closing: HashSet<EventType>,
    reopening: HashSet<EventType>,
    phases: Vec<PhaseRule>,
}

impl TransitionTable {
    /// Build from a configuration, validating it first
    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: &TomlConfig) -> Self {
        Self {
            entries: config
                .transitions
                .iter()
                .map(|rule| ((rule.from, rule.to), rule.event))
                .collect(),
            opening: config.boundaries.opening,
            closing: config.boundaries.closing.iter().copied().collect(),
            reopening: config.boundaries.reopening.iter().copied().collect(),
            phases: config.phases.clone(),
        }
    }

    /// Classify a consecutive-frame pair
    pub fn classify(&self, from: OperationalState, to: OperationalState) -> TransitionOutcome {
        if from == to {
            return TransitionOutcome::SameState;
        }
        match self.entries.get(&(from, to)) {
            Some(event) => TransitionOutcome::Mapped(*event),
            None => TransitionOutcome::Unmapped,
        }
    }

    /// Event for a pair, if any
    pub fn lookup(&self, from: OperationalState, to: OperationalState) -> Option<EventType> {
        match self.classify(from, to) {
            TransitionOutcome::Mapped(event) => Some(event),
            _ => None,
        }
    }

    pub fn opening_event(&self) -> EventType {
        self.opening
    }

    pub fn is_opening(&self, event: EventType) -> bool {
        event == self.opening
    }

    pub fn is_closing(&self, event: EventType) -> bool {
        self.closing.contains(&event)
    }

    /// True for closing events that immediately open the next cycle
    pub fn reopens(&self, event: EventType) -> bool {
        self.reopening.contains(&event)
    }

    /// Phase rules in canonical order
    pub fn phase_rules(&self) -> &[PhaseRule] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::build(&TomlConfig::default())
    }
}
