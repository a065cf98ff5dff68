//! Cycle assembly state machine
//!
//! Groups detected events into work cycles.
//!
//! **States:** `NoOpenCycle`, `CycleOpen(buffer)`
//!
//! | State | Event | Action |
//! |---|---|---|
//! | NoOpen | opening | open buffer seeded with the event |
//! | NoOpen | anything else | ignored |
//! | Open | opening | salvage current buffer (superseded), open new buffer |
//! | Open | closing | append, validate as complete cycle, reopen if the event reopens |
//! | Open | other | append |
//! | end of input | Open | salvage current buffer (end-of-input) |
//!
//! A closed buffer becomes a complete cycle only when every required event is present
//! and it lasts at least the complete-cycle minimum. A force-closed buffer is
//! salvaged when the salvage events are present and the time to its last event meets
//! the partial minimum. Everything else is reported as a [`DiscardedCycle`]; the
//! assembler never fails.

use std::collections::HashMap;
use std::sync::Arc;

use opcycle_common::config::{ObservationConfig, SegmentationConfig, TomlConfig};
use opcycle_common::human_time::format_duration;
use opcycle_common::EventType;
use tracing::{debug, info};

use super::transition_table::TransitionTable;
use crate::error::{AnalysisError, Result};
use crate::types::{
    AssemblyResult, Cycle, CycleClosure, CycleSource, DiscardReason, DiscardedCycle, Event,
    Observation, Phase,
};

/// Events collected since the last opening event
#[derive(Debug)]
struct CycleBuffer {
    start_time: f64,
    start_label: String,
    last_time: f64,
    last_label: String,
    events: Vec<Event>,
}

impl CycleBuffer {
    fn seed(event: &Event) -> Self {
        Self {
            start_time: event.timestamp,
            start_label: event.timestamp_label.clone(),
            last_time: event.timestamp,
            last_label: event.timestamp_label.clone(),
            events: vec![event.clone()],
        }
    }

    fn push(&mut self, event: &Event) {
        self.last_time = event.timestamp;
        self.last_label = event.timestamp_label.clone();
        self.events.push(event.clone());
    }

    fn contains(&self, event_type: EventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }
}

enum AssemblerState {
    NoOpenCycle,
    CycleOpen(CycleBuffer),
}

/// Cycle assembler
#[derive(Debug, Clone)]
pub struct CycleAssembler {
    table: Arc<TransitionTable>,
    segmentation: SegmentationConfig,
    observations: ObservationConfig,
}

impl CycleAssembler {
    /// Create assembler with default thresholds
    pub fn new(table: Arc<TransitionTable>) -> Self {
        Self {
            table,
            segmentation: SegmentationConfig::default(),
            observations: ObservationConfig::default(),
        }
    }

    /// Create assembler from a loaded configuration
    pub fn from_config(table: Arc<TransitionTable>, config: &TomlConfig) -> Result<Self> {
        Self::new(table)
            .with_segmentation(config.segmentation.clone())?
            .with_observations(config.observations.clone())
    }

    /// Override cycle validity thresholds
    pub fn with_segmentation(mut self, segmentation: SegmentationConfig) -> Result<Self> {
        for value in [
            segmentation.min_complete_duration,
            segmentation.min_partial_duration,
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::ContractViolation(format!(
                    "cycle minimum must be a non-negative number (got {})",
                    value
                )));
            }
        }
        self.segmentation = segmentation;
        Ok(self)
    }

    /// Override observation thresholds
    pub fn with_observations(mut self, observations: ObservationConfig) -> Result<Self> {
        if observations.quick_below > observations.extended_above {
            return Err(AnalysisError::ContractViolation(format!(
                "quick threshold {} exceeds extended threshold {}",
                observations.quick_below, observations.extended_above
            )));
        }
        self.observations = observations;
        Ok(self)
    }

    /// Assemble cycles from events in timestamp order
    pub fn assemble(&self, events: &[Event]) -> AssemblyResult {
        let mut result = AssemblyResult::default();
        let mut state = AssemblerState::NoOpenCycle;

        for event in events {
            let event_type = event.event_type;
            state = match state {
                AssemblerState::NoOpenCycle => {
                    if self.table.is_opening(event_type) {
                        AssemblerState::CycleOpen(CycleBuffer::seed(event))
                    } else {
                        debug!(
                            event = %event_type,
                            timestamp = event.timestamp,
                            "Ignoring event outside a cycle"
                        );
                        AssemblerState::NoOpenCycle
                    }
                }
                AssemblerState::CycleOpen(mut buffer) => {
                    if self.table.is_opening(event_type) {
                        self.salvage(buffer, CycleClosure::Superseded, &mut result);
                        AssemblerState::CycleOpen(CycleBuffer::seed(event))
                    } else if self.table.is_closing(event_type) {
                        buffer.push(event);
                        self.close(buffer, &mut result);
                        if self.table.reopens(event_type) {
                            AssemblerState::CycleOpen(CycleBuffer::seed(event))
                        } else {
                            AssemblerState::NoOpenCycle
                        }
                    } else {
                        buffer.push(event);
                        AssemblerState::CycleOpen(buffer)
                    }
                }
            };
        }

        if let AssemblerState::CycleOpen(buffer) = state {
            self.salvage(buffer, CycleClosure::EndOfInput, &mut result);
        }

        info!(
            events = events.len(),
            cycles = result.cycles.len(),
            discarded = result.discarded.len(),
            "Cycle assembly complete"
        );

        result
    }

    /// Required events missing from a buffer. The seed always satisfies the opener.
    fn missing(&self, buffer: &CycleBuffer, required: &[EventType]) -> Vec<EventType> {
        let mut missing: Vec<EventType> = required
            .iter()
            .copied()
            .filter(|r| !self.table.is_opening(*r) && !buffer.contains(*r))
            .collect();
        missing.dedup();
        missing
    }

    fn meets_full_validity(&self, buffer: &CycleBuffer, duration: f64) -> bool {
        self.missing(buffer, &self.segmentation.required_events).is_empty()
            && duration >= self.segmentation.min_complete_duration
    }

    /// Buffer ended on a closing event
    fn close(&self, buffer: CycleBuffer, result: &mut AssemblyResult) {
        let duration = buffer.last_time - buffer.start_time;
        let missing = self.missing(&buffer, &self.segmentation.required_events);

        let reason = if !missing.is_empty() {
            Some(DiscardReason::MissingRequiredEvents { missing })
        } else if duration < self.segmentation.min_complete_duration {
            Some(DiscardReason::TooShort {
                duration,
                minimum: self.segmentation.min_complete_duration,
            })
        } else {
            None
        };

        match reason {
            None => self.finalize(buffer, true, CycleClosure::Closed, result),
            Some(reason) => self.discard(buffer, CycleClosure::Closed, reason, result),
        }
    }

    /// Buffer force-closed by a new opener or by end of input
    fn salvage(&self, buffer: CycleBuffer, closure: CycleClosure, result: &mut AssemblyResult) {
        let elapsed = buffer.last_time - buffer.start_time;
        let missing = self.missing(&buffer, &self.segmentation.salvage_events);

        let reason = if !missing.is_empty() {
            Some(DiscardReason::MissingRequiredEvents { missing })
        } else if elapsed < self.segmentation.min_partial_duration {
            Some(DiscardReason::TooShort {
                duration: elapsed,
                minimum: self.segmentation.min_partial_duration,
            })
        } else {
            None
        };

        match reason {
            None => {
                let complete = self.meets_full_validity(&buffer, elapsed);
                self.finalize(buffer, complete, closure, result);
            }
            Some(reason) => self.discard(buffer, closure, reason, result),
        }
    }

    fn discard(
        &self,
        buffer: CycleBuffer,
        closure: CycleClosure,
        reason: DiscardReason,
        result: &mut AssemblyResult,
    ) {
        debug!(
            start = %buffer.start_label,
            end = %buffer.last_label,
            closure = ?closure,
            reason = ?reason,
            "Discarding cycle buffer"
        );
        result.discarded.push(DiscardedCycle {
            start_time: buffer.start_time,
            end_time: buffer.last_time,
            event_count: buffer.events.len(),
            closure,
            reason,
        });
    }

    fn finalize(
        &self,
        buffer: CycleBuffer,
        is_complete: bool,
        closure: CycleClosure,
        result: &mut AssemblyResult,
    ) {
        let duration = buffer.last_time - buffer.start_time;
        let phases = self.extract_phases(&buffer.events);
        let observations = self.observe(&phases, is_complete);
        let sequence_number = result.cycles.len() + 1;

        info!(
            cycle = sequence_number,
            start = %buffer.start_label,
            end = %buffer.last_label,
            duration = duration,
            complete = is_complete,
            "Cycle #{}: {} -> {} ({})",
            sequence_number,
            buffer.start_label,
            buffer.last_label,
            format_duration(duration)
        );

        result.cycles.push(Cycle {
            sequence_number,
            declared_id: None,
            start_time: buffer.start_time,
            end_time: buffer.last_time,
            duration,
            start_label: buffer.start_label,
            end_label: buffer.last_label,
            duration_label: format_duration(duration),
            is_complete,
            source: CycleSource::StateMachine,
            closure,
            events: buffer.events,
            phases,
            observations,
        });
    }

    /// Phases bounded by rule events. A phase still open at the end is omitted and
    /// each phase is recorded at most once per cycle.
    fn extract_phases(&self, events: &[Event]) -> Vec<Phase> {
        let rules = self.table.phase_rules();
        let mut starts: HashMap<&str, f64> = HashMap::new();
        let mut found: HashMap<&str, Phase> = HashMap::new();

        for event in events {
            for rule in rules {
                let name = rule.name.as_str();
                if found.contains_key(name) {
                    continue;
                }
                if rule.ends_on.contains(&event.event_type) {
                    if let Some(start) = starts.remove(name) {
                        found.insert(name, Phase::new(name, start, event.timestamp));
                        continue;
                    }
                }
                if rule.starts_on.contains(&event.event_type) {
                    starts.insert(name, event.timestamp);
                }
            }
        }

        rules
            .iter()
            .filter_map(|rule| found.remove(rule.name.as_str()))
            .collect()
    }

    fn observe(&self, phases: &[Phase], is_complete: bool) -> Vec<Observation> {
        let mut observations = Vec::new();

        if !is_complete {
            observations.push(Observation::Incomplete);
        }

        if let Some(primary) = phases
            .iter()
            .find(|p| p.name == self.observations.primary_phase)
        {
            if primary.duration < self.observations.quick_below {
                observations.push(Observation::Quick);
            } else if primary.duration > self.observations.extended_above {
                observations.push(Observation::Extended);
            }
        }

        if phases.len() < self.table.phase_rules().len() {
            observations.push(Observation::MissingPhases);
        }

        if observations.is_empty() {
            observations.push(Observation::Normal);
        }

        observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcycle_common::OperationalState;

    fn event(event_type: EventType, t: f64) -> Event {
        Event {
            event_type,
            from_state: OperationalState::Idle,
            to_state: OperationalState::ActivePrimary,
            timestamp: t,
            timestamp_label: format!("t{}", t),
            frame_index: 0,
            confidence: 0.0,
        }
    }

    fn assembler() -> CycleAssembler {
        CycleAssembler::new(Arc::new(TransitionTable::default()))
    }

    use EventType::*;

    #[test]
    fn test_empty_events() {
        let result = assembler().assemble(&[]);
        assert!(result.cycles.is_empty());
        assert!(result.discarded.is_empty());
    }

    #[test]
    fn test_complete_cycle_with_pause() {
        let events = vec![
            event(CycleOpen, 1.0),
            event(PhaseEnd1, 5.0),
            event(PhaseEnd2, 8.0),
            event(PhaseEnd3, 11.0),
            event(CyclePause, 14.0),
        ];
        let result = assembler().assemble(&events);
        assert_eq!(result.cycles.len(), 1);
        let cycle = &result.cycles[0];
        assert!(cycle.is_complete);
        assert_eq!(cycle.closure, CycleClosure::Closed);
        assert_eq!(cycle.duration, 13.0);
        assert_eq!(cycle.duration_label, "13.0s");
        assert_eq!(cycle.phases.len(), 3);
        assert_eq!(cycle.phase("primary").unwrap().duration, 4.0);
        assert_eq!(cycle.observations, vec![Observation::Normal]);
    }

    #[test]
    fn test_non_opening_events_ignored_without_cycle() {
        let events = vec![event(PhaseEnd1, 1.0), event(CycleClose, 2.0)];
        let result = assembler().assemble(&events);
        assert!(result.cycles.is_empty());
        assert!(result.discarded.is_empty());
    }

    #[test]
    fn test_too_short_closed_cycle_discarded() {
        let events = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 1.0),
            event(PhaseEnd2, 2.0),
            event(PhaseEnd3, 3.0),
            event(CyclePause, 4.0),
        ];
        let result = assembler().assemble(&events);
        assert!(result.cycles.is_empty());
        assert_eq!(
            result.discarded[0].reason,
            DiscardReason::TooShort {
                duration: 4.0,
                minimum: 5.0
            }
        );
    }

    #[test]
    fn test_closed_cycle_missing_events_discarded() {
        let events = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 3.0),
            event(CyclePause, 10.0),
        ];
        let result = assembler().assemble(&events);
        assert!(result.cycles.is_empty());
        assert_eq!(
            result.discarded[0].reason,
            DiscardReason::MissingRequiredEvents {
                missing: vec![PhaseEnd2, PhaseEnd3]
            }
        );
    }

    #[test]
    fn test_superseded_buffer_salvaged_as_partial() {
        let events = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 4.0),
            event(CycleOpen, 10.0),
        ];
        let result = assembler().assemble(&events);
        assert_eq!(result.cycles.len(), 1);
        let cycle = &result.cycles[0];
        assert!(!cycle.is_complete);
        assert_eq!(cycle.closure, CycleClosure::Superseded);
        // Ends at the last buffered event, not at the new opener
        assert_eq!(cycle.end_time, 4.0);
        assert!(cycle.observations.contains(&Observation::Incomplete));
        assert!(cycle.observations.contains(&Observation::MissingPhases));
        // Second buffer holds only its opener and is dropped at end of input
        assert_eq!(result.discarded.len(), 1);
        assert_eq!(result.discarded[0].closure, CycleClosure::EndOfInput);
    }

    #[test]
    fn test_short_fragment_not_salvaged() {
        let events = vec![event(CycleOpen, 0.0), event(PhaseEnd1, 2.0)];
        let result = assembler().assemble(&events);
        assert!(result.cycles.is_empty());
        assert!(matches!(
            result.discarded[0].reason,
            DiscardReason::TooShort { minimum, .. } if minimum == 3.0
        ));
    }

    #[test]
    fn test_salvaged_cycle_with_all_events_is_complete() {
        let events = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 3.0),
            event(PhaseEnd2, 5.0),
            event(PhaseEnd3, 7.0),
        ];
        let result = assembler().assemble(&events);
        assert_eq!(result.cycles.len(), 1);
        assert!(result.cycles[0].is_complete);
        assert_eq!(result.cycles[0].closure, CycleClosure::EndOfInput);
    }

    #[test]
    fn test_close_reopens_next_cycle() {
        let events = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 3.0),
            event(PhaseEnd2, 5.0),
            event(PhaseEnd3, 8.0),
            event(CycleClose, 10.0),
            event(PhaseEnd1, 14.0),
            event(PhaseEnd2, 16.0),
            event(PhaseEnd3, 19.0),
            event(CycleClose, 21.0),
        ];
        let result = assembler().assemble(&events);
        assert_eq!(result.cycles.len(), 2);
        let second = &result.cycles[1];
        assert_eq!(second.sequence_number, 2);
        assert_eq!(second.start_time, 10.0);
        assert!(second.is_complete);
        assert_eq!(second.phase("primary").unwrap().duration, 4.0);
    }

    #[test]
    fn test_quick_and_extended_observations() {
        let quick = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 2.0),
            event(PhaseEnd2, 5.0),
            event(PhaseEnd3, 8.0),
            event(CyclePause, 10.0),
        ];
        let result = assembler().assemble(&quick);
        assert_eq!(result.cycles[0].observations, vec![Observation::Quick]);

        let extended = vec![
            event(CycleOpen, 0.0),
            event(PhaseEnd1, 9.0),
            event(PhaseEnd2, 11.0),
            event(PhaseEnd3, 13.0),
            event(CyclePause, 15.0),
        ];
        let result = assembler().assemble(&extended);
        assert_eq!(result.cycles[0].observations, vec![Observation::Extended]);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let seg = SegmentationConfig {
            min_complete_duration: -1.0,
            ..SegmentationConfig::default()
        };
        assert!(assembler().with_segmentation(seg).is_err());

        let obs = ObservationConfig {
            quick_below: 10.0,
            extended_above: 5.0,
            ..ObservationConfig::default()
        };
        assert!(assembler().with_observations(obs).is_err());
    }
}
