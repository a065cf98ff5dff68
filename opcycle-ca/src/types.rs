//! Core data model for cycle analysis
//!
//! Frames come in from the external classifier, events are derived from frames, and
//! cycles are produced by either the state-machine assembler or the markup
//! extractor. Both producers emit the same [`Cycle`] shape so the statistics engine
//! never needs to know where a cycle came from.

use opcycle_common::{EventType, OperationalState};
use serde::{Deserialize, Serialize};

// ============================================================================
// Inputs
// ============================================================================

/// One classified video frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledFrame {
    /// Operational state assigned by the classifier
    pub state: OperationalState,
    /// Seconds from the start of the recording
    pub timestamp: f64,
    /// Human-readable timestamp as supplied by the sampler (e.g. "00:15")
    pub timestamp_label: String,
    /// Position of the frame in the sampled sequence
    pub frame_index: usize,
    /// Classifier confidence (0.0-1.0)
    #[serde(default)]
    pub confidence: f64,
}

impl LabeledFrame {
    pub fn new(
        state: OperationalState,
        timestamp: f64,
        timestamp_label: impl Into<String>,
        frame_index: usize,
    ) -> Self {
        Self {
            state,
            timestamp,
            timestamp_label: timestamp_label.into(),
            frame_index,
            confidence: 0.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

// ============================================================================
// Events
// ============================================================================

/// Named event recognized from a state change between consecutive frames
///
/// Only the event detector creates these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub from_state: OperationalState,
    pub to_state: OperationalState,
    /// Timestamp of the frame where the new state was first seen
    pub timestamp: f64,
    pub timestamp_label: String,
    pub frame_index: usize,
    pub confidence: f64,
}

// ============================================================================
// Cycles
// ============================================================================

/// Named sub-interval of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Phase {
    pub fn new(name: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            duration: end - start,
            description: None,
        }
    }
}

/// Which producer emitted a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleSource {
    /// Frame labels through the event detector and assembler
    StateMachine,
    /// Declared by a generative model in markup
    Markup,
}

/// How a cycle came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleClosure {
    /// Ended on a closing event
    Closed,
    /// Force-closed because a new cycle opened first
    Superseded,
    /// Force-closed because the input ran out
    EndOfInput,
    /// Taken as-is from markup
    Declared,
}

/// Qualitative tag attached to a finalized cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Observation {
    Incomplete,
    Quick,
    Extended,
    MissingPhases,
    Normal,
}

impl Observation {
    /// Sentence used in plain-text reports
    pub fn describe(&self) -> &'static str {
        match self {
            Observation::Incomplete => "Incomplete cycle",
            Observation::Quick => "Quick primary phase",
            Observation::Extended => "Extended primary phase",
            Observation::MissingPhases => "Missing phases",
            Observation::Normal => "Normal cycle",
        }
    }
}

/// One repetition of the operator's work pattern
///
/// Finalized cycles are never mutated. `duration == end_time - start_time` holds for
/// every cycle regardless of producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    /// 1-based position in discovery order
    pub sequence_number: usize,
    /// `id` attribute as written in markup; the model's numbering may skip or repeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_id: Option<String>,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub start_label: String,
    pub end_label: String,
    pub duration_label: String,
    pub is_complete: bool,
    pub source: CycleSource,
    pub closure: CycleClosure,
    /// Detector events in timestamp order (empty for markup cycles)
    pub events: Vec<Event>,
    /// Phases in rule order; names are unique
    pub phases: Vec<Phase>,
    pub observations: Vec<Observation>,
}

impl Cycle {
    /// Look up a phase by name
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }
}

/// Anything with a start and end on the recording timeline
///
/// The statistics engine only needs durations and span, so it accepts any record
/// implementing this rather than concrete cycles.
pub trait TimedRecord {
    fn start_time(&self) -> f64;
    fn end_time(&self) -> f64;

    fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }
}

impl TimedRecord for Cycle {
    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn end_time(&self) -> f64 {
        self.end_time
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

/// `(start, end)` pairs, handy for feeding raw intervals to the statistics engine
impl TimedRecord for (f64, f64) {
    fn start_time(&self) -> f64 {
        self.0
    }

    fn end_time(&self) -> f64 {
        self.1
    }
}

// ============================================================================
// Assembly results
// ============================================================================

/// Why a buffered cycle was dropped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum DiscardReason {
    /// Required events never showed up
    MissingRequiredEvents { missing: Vec<EventType> },
    /// Cycle (or salvaged fragment) was shorter than the applicable minimum
    TooShort { duration: f64, minimum: f64 },
}

/// A buffer that did not become a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedCycle {
    pub start_time: f64,
    pub end_time: f64,
    pub event_count: usize,
    pub closure: CycleClosure,
    pub reason: DiscardReason,
}

/// Output of one assembler run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyResult {
    pub cycles: Vec<Cycle>,
    pub discarded: Vec<DiscardedCycle>,
}
