//! Event detection from classified frames
//!
//! Walks consecutive frames and emits an [`Event`] for every state change the
//! transition table recognizes. Repeated states and unmapped pairs produce nothing.
//! Detection itself never fails; shape problems in the frame list are caught up
//! front by [`validate_frames`] / [`parse_frames`].

use std::sync::Arc;

use opcycle_common::{EventType, OperationalState};
use tracing::{debug, info, trace};

use super::transition_table::{TransitionOutcome, TransitionTable};
use crate::error::{AnalysisError, Result};
use crate::types::{Event, LabeledFrame};

/// Event detector over a shared transition table
#[derive(Debug, Clone)]
pub struct EventDetector {
    table: Arc<TransitionTable>,
}

impl EventDetector {
    pub fn new(table: Arc<TransitionTable>) -> Self {
        Self { table }
    }

    /// Detect events in frame order
    ///
    /// The first frame never produces an event. Each event takes the timestamp,
    /// label, index and confidence of the frame where the new state appears.
    pub fn detect(&self, frames: &[LabeledFrame]) -> Vec<Event> {
        let mut events = Vec::new();
        let mut previous: Option<OperationalState> = None;
        let mut unmapped = 0usize;

        for frame in frames {
            if let Some(prev) = previous {
                match self.table.classify(prev, frame.state) {
                    TransitionOutcome::Mapped(event_type) => {
                        trace!(
                            frame_index = frame.frame_index,
                            event = %event_type,
                            "{} -> {}",
                            prev,
                            frame.state
                        );
                        events.push(Event {
                            event_type,
                            from_state: prev,
                            to_state: frame.state,
                            timestamp: frame.timestamp,
                            timestamp_label: frame.timestamp_label.clone(),
                            frame_index: frame.frame_index,
                            confidence: frame.confidence,
                        });
                    }
                    TransitionOutcome::Unmapped => {
                        unmapped += 1;
                        debug!(
                            frame_index = frame.frame_index,
                            "Filtered unmapped transition {} -> {}",
                            prev,
                            frame.state
                        );
                    }
                    TransitionOutcome::SameState => {}
                }
            }
            previous = Some(frame.state);
        }

        info!(
            frames = frames.len(),
            events = events.len(),
            filtered = unmapped,
            "Event detection complete"
        );

        events
    }
}

/// Event types in order, for logging and quick assertions
pub fn event_sequence(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

/// Check the frame contract: finite non-negative timestamps, confidence in [0, 1]
pub fn validate_frames(frames: &[LabeledFrame]) -> Result<()> {
    for frame in frames {
        if !frame.timestamp.is_finite() || frame.timestamp < 0.0 {
            return Err(AnalysisError::ContractViolation(format!(
                "frame {} has invalid timestamp {}",
                frame.frame_index, frame.timestamp
            )));
        }
        if !(0.0..=1.0).contains(&frame.confidence) {
            return Err(AnalysisError::ContractViolation(format!(
                "frame {} has confidence {} outside [0, 1]",
                frame.frame_index, frame.confidence
            )));
        }
    }
    Ok(())
}

/// Decode a JSON array of frames and validate it
///
/// Missing keys and unknown state labels are contract violations.
pub fn parse_frames(json: &str) -> Result<Vec<LabeledFrame>> {
    let frames: Vec<LabeledFrame> = serde_json::from_str(json)
        .map_err(|e| AnalysisError::ContractViolation(format!("invalid frame data: {}", e)))?;
    validate_frames(&frames)?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OperationalState::*;

    fn frames(states: &[(OperationalState, f64)]) -> Vec<LabeledFrame> {
        states
            .iter()
            .enumerate()
            .map(|(i, (state, t))| LabeledFrame::new(*state, *t, format!("{}", t), i))
            .collect()
    }

    fn detector() -> EventDetector {
        EventDetector::new(Arc::new(TransitionTable::default()))
    }

    #[test]
    fn test_empty_and_single_frame() {
        assert!(detector().detect(&[]).is_empty());
        assert!(detector().detect(&frames(&[(ActivePrimary, 0.0)])).is_empty());
    }

    #[test]
    fn test_repeated_state_yields_nothing() {
        let input = frames(&[(Idle, 0.0), (Idle, 1.0), (Idle, 2.0)]);
        assert!(detector().detect(&input).is_empty());
    }

    #[test]
    fn test_unmapped_transition_filtered() {
        // active-primary -> idle is not in the table
        let input = frames(&[(ActivePrimary, 0.0), (Idle, 1.0), (ActivePrimary, 2.0)]);
        let events = detector().detect(&input);
        assert_eq!(event_sequence(&events), vec![EventType::CycleOpen]);
        assert_eq!(events[0].timestamp, 2.0);
        assert_eq!(events[0].frame_index, 2);
    }

    #[test]
    fn test_event_carries_current_frame_fields() {
        let input = vec![
            LabeledFrame::new(Idle, 0.0, "00:00", 0),
            LabeledFrame::new(ActivePrimary, 1.0, "00:01", 1).with_confidence(0.9),
        ];
        let events = detector().detect(&input);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.from_state, Idle);
        assert_eq!(e.to_state, ActivePrimary);
        assert_eq!(e.timestamp_label, "00:01");
        assert_eq!(e.confidence, 0.9);
    }

    #[test]
    fn test_events_in_timestamp_order() {
        let input = frames(&[
            (Idle, 0.0),
            (ActivePrimary, 1.0),
            (TransitToSecondary, 6.0),
            (ActiveSecondary, 9.0),
            (TransitToPrimary, 12.0),
            (ActivePrimary, 15.0),
        ]);
        let events = detector().detect(&input);
        assert_eq!(events.len(), 5);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_validate_rejects_bad_timestamp() {
        let mut input = frames(&[(Idle, 0.0)]);
        input[0].timestamp = -1.0;
        assert!(matches!(
            validate_frames(&input),
            Err(AnalysisError::ContractViolation(_))
        ));
        input[0].timestamp = f64::INFINITY;
        assert!(validate_frames(&input).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let input = vec![LabeledFrame::new(Idle, 0.0, "00:00", 0).with_confidence(1.5)];
        assert!(validate_frames(&input).is_err());
    }

    #[test]
    fn test_parse_frames() {
        let json = r#"[
            {"state": "idle", "timestamp": 0.0, "timestamp_label": "00:00", "frame_index": 0},
            {"state": "digging", "timestamp": 1.0, "timestamp_label": "00:01", "frame_index": 1, "confidence": 0.8}
        ]"#;
        let parsed = parse_frames(json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].state, ActivePrimary);
    }

    #[test]
    fn test_parse_frames_unknown_state() {
        let json = r#"[{"state": "hovering", "timestamp": 0.0, "timestamp_label": "00:00", "frame_index": 0}]"#;
        assert!(matches!(
            parse_frames(json),
            Err(AnalysisError::ContractViolation(_))
        ));
    }

    #[test]
    fn test_parse_frames_missing_key() {
        let json = r#"[{"state": "idle", "timestamp": 0.0, "frame_index": 0}]"#;
        assert!(parse_frames(json).is_err());
    }
}
