//! Closed vocabulary of operational states and timeline events
//!
//! States are produced by the external frame classifier; events are produced only
//! by the event detector from state transitions. Both vocabularies are closed and
//! versioned together: adding or renaming a variant bumps [`VOCABULARY_VERSION`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Version of the state/event vocabulary, embedded in every report
pub const VOCABULARY_VERSION: &str = "1";

/// Machine activity at a single instant
///
/// Excavator labels emitted by the frame classifier (`digging`,
/// `swing_to_dump`, `dumping`, `swing_to_dig`) are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationalState {
    /// Machine idle, no work motion
    Idle,
    /// Primary work motion (e.g. digging)
    #[serde(alias = "digging")]
    ActivePrimary,
    /// Moving loaded towards the secondary work point
    #[serde(alias = "swing_to_dump")]
    TransitToSecondary,
    /// Secondary work motion (e.g. dumping)
    #[serde(alias = "dumping")]
    ActiveSecondary,
    /// Returning towards the primary work point
    #[serde(alias = "swing_to_dig")]
    TransitToPrimary,
}

impl OperationalState {
    /// All states in canonical cycle order
    pub const ALL: [OperationalState; 5] = [
        OperationalState::Idle,
        OperationalState::ActivePrimary,
        OperationalState::TransitToSecondary,
        OperationalState::ActiveSecondary,
        OperationalState::TransitToPrimary,
    ];

    /// Canonical kebab-case label
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationalState::Idle => "idle",
            OperationalState::ActivePrimary => "active-primary",
            OperationalState::TransitToSecondary => "transit-to-secondary",
            OperationalState::ActiveSecondary => "active-secondary",
            OperationalState::TransitToPrimary => "transit-to-primary",
        }
    }
}

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationalState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "idle" => Ok(OperationalState::Idle),
            "active-primary" | "digging" => Ok(OperationalState::ActivePrimary),
            "transit-to-secondary" | "swing_to_dump" => Ok(OperationalState::TransitToSecondary),
            "active-secondary" | "dumping" => Ok(OperationalState::ActiveSecondary),
            "transit-to-primary" | "swing_to_dig" => Ok(OperationalState::TransitToPrimary),
            other => Err(Error::InvalidInput(format!("unknown state label: {:?}", other))),
        }
    }
}

/// Named event recognized from a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Work cycle begins (e.g. dig start)
    CycleOpen,
    /// First phase boundary (e.g. dig end)
    #[serde(rename = "phase-end-1")]
    PhaseEnd1,
    /// Second phase boundary (e.g. dump start)
    #[serde(rename = "phase-end-2")]
    PhaseEnd2,
    /// Third phase boundary (e.g. dump end)
    #[serde(rename = "phase-end-3")]
    PhaseEnd3,
    /// Cycle ends by returning straight into primary work
    CycleClose,
    /// Cycle ends by going idle
    CyclePause,
}

impl EventType {
    /// Canonical kebab-case label
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CycleOpen => "cycle-open",
            EventType::PhaseEnd1 => "phase-end-1",
            EventType::PhaseEnd2 => "phase-end-2",
            EventType::PhaseEnd3 => "phase-end-3",
            EventType::CycleClose => "cycle-close",
            EventType::CyclePause => "cycle-pause",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cycle-open" => Ok(EventType::CycleOpen),
            "phase-end-1" => Ok(EventType::PhaseEnd1),
            "phase-end-2" => Ok(EventType::PhaseEnd2),
            "phase-end-3" => Ok(EventType::PhaseEnd3),
            "cycle-close" => Ok(EventType::CycleClose),
            "cycle-pause" => Ok(EventType::CyclePause),
            other => Err(Error::InvalidInput(format!("unknown event type: {:?}", other))),
        }
    }
}
