//! Pipeline Coordinator
//!
//! Runs the frame path and the markup path, then computes statistics over the
//! cycles of one selected source.
//!
//! # Architecture
//! - **Stage 1**: detect-events (frames → events)
//! - **Stage 2**: assemble-cycles (events → cycles)
//! - **Stage 3**: extract-markup (text → cycles + extras)
//! - **Stage 4**: compute-statistics (selected cycles → statistics)
//!
//! Stages 1-2 and stage 3 are independent and run concurrently on blocking worker
//! tasks when both inputs are present.
//!
//! # Error Handling
//! - Per-stage error isolation: a failed stage is recorded with its reason and
//!   replaced by an empty default; downstream stages still run
//! - Only a run with no input at all is fatal
//! - Progress and failures are reported via [`WorkflowEvent`]
//!
//! # Example
//! ```rust,ignore
//! let pipeline = Pipeline::new(PipelineConfig::default());
//! let context = pipeline.run(PipelineInput::default().with_markup(text)).await?;
//! ```

use std::sync::Arc;

use opcycle_common::config::{PreferredSource, TomlConfig};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PipelineContext, PipelineInput, Stage, StageRecord, WorkflowEvent};
use crate::error::{AnalysisError, Result};
use crate::services::cycle_assembler::CycleAssembler;
use crate::services::event_detector::{validate_frames, EventDetector};
use crate::services::markup_extractor::{self, MarkupDocument};
use crate::services::statistics::{
    phase_averages, CycleStatistics, IdleBreakdown, PerformanceRatings, StatisticsEngine,
};
use crate::services::transition_table::TransitionTable;
use crate::types::{AssemblyResult, Cycle, CycleSource, Event, LabeledFrame};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Shared transition table, boundary designations and phase rules
    pub table: Arc<TransitionTable>,
    /// Cycle assembler with its thresholds
    pub assembler: CycleAssembler,
    /// Statistics engine with configured target and trend threshold
    pub statistics: StatisticsEngine,
    /// Source used for statistics when it produced any cycles
    pub preferred_source: PreferredSource,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let table = Arc::new(TransitionTable::default());
        Self {
            assembler: CycleAssembler::new(Arc::clone(&table)),
            table,
            statistics: StatisticsEngine::new(),
            preferred_source: PreferredSource::Frames,
        }
    }
}

impl PipelineConfig {
    /// Build every component from a loaded configuration
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let table = Arc::new(TransitionTable::from_config(config)?);
        Ok(Self {
            assembler: CycleAssembler::from_config(Arc::clone(&table), config)?,
            table,
            statistics: StatisticsEngine::from_config(&config.statistics)?,
            preferred_source: config.pipeline.preferred_source,
        })
    }
}

/// Output of the frame path
struct FramePathOutput {
    events: Vec<Event>,
    assembly: AssemblyResult,
    records: Vec<StageRecord>,
}

/// Output of the markup path
struct MarkupPathOutput {
    document: Option<MarkupDocument>,
    record: StageRecord,
}

/// Output of the statistics stage
struct StatisticsOutput {
    statistics: CycleStatistics,
    idle_breakdown: Option<IdleBreakdown>,
    ratings: PerformanceRatings,
    record: StageRecord,
}

/// Pipeline coordinator
pub struct Pipeline {
    config: PipelineConfig,
    event_tx: Option<mpsc::Sender<WorkflowEvent>>,
}

impl Pipeline {
    /// Create new pipeline with configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            event_tx: None,
        }
    }

    /// Create pipeline with event channel for progress reporting
    pub fn with_events(config: PipelineConfig, event_tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self {
            config,
            event_tx: Some(event_tx),
        }
    }

    /// Run every stage over the supplied input
    ///
    /// # Returns
    /// * Context with per-stage records; failed stages are recorded, not returned
    /// * `AnalysisError::MissingInput` when neither frames nor markup were supplied
    pub async fn run(&self, input: PipelineInput) -> Result<PipelineContext> {
        if input.frames.is_none() && input.markup.is_none() {
            return Err(AnalysisError::MissingInput(
                "supply classified frames, markup text, or both".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        info!(
            run_id = %run_id,
            frames = ?input.frames.as_ref().map(Vec::len),
            markup_bytes = ?input.markup.as_ref().map(String::len),
            "Pipeline run started"
        );

        self.emit_event(WorkflowEvent::RunStarted {
            run_id,
            frames: input.frames.as_ref().map(Vec::len),
            markup_bytes: input.markup.as_ref().map(String::len),
            timestamp: started_at.timestamp(),
        })
        .await;

        let PipelineInput {
            frames,
            markup,
            target,
        } = input;

        let (frame_output, markup_output) =
            tokio::join!(self.run_frame_path(frames), self.run_markup_path(markup));

        let (selected_source, used_fallback) =
            self.select_source(&frame_output.assembly.cycles, markup_output.document.as_ref());

        self.emit_event(WorkflowEvent::SourceSelected {
            source: selected_source,
            fallback: used_fallback,
        })
        .await;

        let selected: &[Cycle] = match selected_source {
            Some(CycleSource::StateMachine) => &frame_output.assembly.cycles,
            Some(CycleSource::Markup) => markup_output
                .document
                .as_ref()
                .map(|d| d.cycles.as_slice())
                .unwrap_or(&[]),
            None => &[],
        };

        let stats_output = self.run_statistics(selected, target).await;
        let averages = phase_averages(selected);

        let mut stages = frame_output.records;
        stages.push(markup_output.record);
        stages.push(stats_output.record);

        let context = PipelineContext {
            run_id,
            started_at,
            events: frame_output.events,
            assembly: frame_output.assembly,
            markup: markup_output.document,
            selected_source,
            used_fallback,
            statistics: stats_output.statistics,
            idle_breakdown: stats_output.idle_breakdown,
            phase_averages: averages,
            ratings: stats_output.ratings,
            stages,
        };

        let failed_stages = context.stages.iter().filter(|r| r.is_failed()).count();
        info!(
            run_id = %run_id,
            cycles = context.cycles().len(),
            failed_stages,
            "Pipeline run complete"
        );

        self.emit_event(WorkflowEvent::RunCompleted {
            run_id,
            cycles: context.cycles().len(),
            failed_stages,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;

        Ok(context)
    }

    /// Stages 1-2: frames → events → cycles
    async fn run_frame_path(&self, frames: Option<Vec<LabeledFrame>>) -> FramePathOutput {
        let Some(frames) = frames else {
            debug!("No frames supplied, skipping frame path");
            let records = vec![
                StageRecord::skipped(Stage::DetectEvents),
                StageRecord::skipped(Stage::AssembleCycles),
            ];
            for record in &records {
                self.finish_stage(record.clone()).await;
            }
            return FramePathOutput {
                events: Vec::new(),
                assembly: AssemblyResult::default(),
                records,
            };
        };

        // Stage 1: detect events
        self.emit_event(WorkflowEvent::StageStarted {
            stage: Stage::DetectEvents,
        })
        .await;

        let detector = EventDetector::new(Arc::clone(&self.config.table));
        let detected = tokio::task::spawn_blocking(move || -> Result<Vec<Event>> {
            validate_frames(&frames)?;
            Ok(detector.detect(&frames))
        })
        .await;

        let (events, detect_record) = match flatten(detected) {
            Ok(events) => {
                let record = StageRecord::succeeded(Stage::DetectEvents, events.len());
                (events, record)
            }
            Err(e) => {
                warn!(stage = %Stage::DetectEvents, error = %e, "Stage failed, continuing with no events");
                (Vec::new(), StageRecord::failed(Stage::DetectEvents, e.to_string()))
            }
        };
        self.finish_stage(detect_record.clone()).await;

        // Stage 2: assemble cycles
        self.emit_event(WorkflowEvent::StageStarted {
            stage: Stage::AssembleCycles,
        })
        .await;

        let assembler = self.config.assembler.clone();
        let buffered = events.clone();
        let assembled =
            tokio::task::spawn_blocking(move || assembler.assemble(&buffered)).await;

        let (assembly, assemble_record) = match assembled {
            Ok(assembly) => {
                self.emit_event(WorkflowEvent::CyclesAssembled {
                    cycles: assembly.cycles.len(),
                    discarded: assembly.discarded.len(),
                })
                .await;
                let record = StageRecord::succeeded(Stage::AssembleCycles, assembly.cycles.len());
                (assembly, record)
            }
            Err(e) => {
                warn!(stage = %Stage::AssembleCycles, error = %e, "Stage failed, continuing with no cycles");
                (
                    AssemblyResult::default(),
                    StageRecord::failed(Stage::AssembleCycles, e.to_string()),
                )
            }
        };
        self.finish_stage(assemble_record.clone()).await;

        FramePathOutput {
            events,
            assembly,
            records: vec![detect_record, assemble_record],
        }
    }

    /// Stage 3: markup → cycles + extras
    async fn run_markup_path(&self, markup: Option<String>) -> MarkupPathOutput {
        let Some(text) = markup else {
            debug!("No markup supplied, skipping markup path");
            let record = StageRecord::skipped(Stage::ExtractMarkup);
            self.finish_stage(record.clone()).await;
            return MarkupPathOutput {
                document: None,
                record,
            };
        };

        self.emit_event(WorkflowEvent::StageStarted {
            stage: Stage::ExtractMarkup,
        })
        .await;

        let extracted =
            tokio::task::spawn_blocking(move || markup_extractor::extract(&text)).await;

        let (document, record) = match extracted {
            Ok(document) => {
                let record = StageRecord::succeeded(Stage::ExtractMarkup, document.cycles.len());
                (Some(document), record)
            }
            Err(e) => {
                warn!(stage = %Stage::ExtractMarkup, error = %e, "Stage failed, continuing without markup");
                (
                    Some(MarkupDocument::default()),
                    StageRecord::failed(Stage::ExtractMarkup, e.to_string()),
                )
            }
        };
        self.finish_stage(record.clone()).await;

        MarkupPathOutput { document, record }
    }

    /// Preferred source when it has cycles, otherwise the other one
    fn select_source(
        &self,
        frame_cycles: &[Cycle],
        markup: Option<&MarkupDocument>,
    ) -> (Option<CycleSource>, bool) {
        let has_frames = !frame_cycles.is_empty();
        let has_markup = markup.map(|m| !m.cycles.is_empty()).unwrap_or(false);

        let (preferred, preferred_ok, other, other_ok) = match self.config.preferred_source {
            PreferredSource::Frames => (
                CycleSource::StateMachine,
                has_frames,
                CycleSource::Markup,
                has_markup,
            ),
            PreferredSource::Markup => (
                CycleSource::Markup,
                has_markup,
                CycleSource::StateMachine,
                has_frames,
            ),
        };

        if preferred_ok {
            (Some(preferred), false)
        } else if other_ok {
            info!(
                preferred = ?preferred,
                used = ?other,
                "Preferred source produced no cycles, falling back"
            );
            (Some(other), true)
        } else {
            (None, false)
        }
    }

    /// Stage 4: statistics over the selected cycles
    async fn run_statistics(&self, cycles: &[Cycle], target: Option<f64>) -> StatisticsOutput {
        self.emit_event(WorkflowEvent::StageStarted {
            stage: Stage::ComputeStatistics,
        })
        .await;

        let output = match self.compute_statistics(cycles, target) {
            Ok(output) => output,
            Err(e) => {
                warn!(stage = %Stage::ComputeStatistics, error = %e, "Stage failed, reporting zero statistics");
                let target = self.config.statistics.target();
                let statistics = CycleStatistics::empty(target);
                StatisticsOutput {
                    ratings: self.config.statistics.ratings(&statistics, None),
                    statistics,
                    idle_breakdown: None,
                    record: StageRecord::failed(Stage::ComputeStatistics, e.to_string()),
                }
            }
        };
        self.finish_stage(output.record.clone()).await;

        output
    }

    fn compute_statistics(&self, cycles: &[Cycle], target: Option<f64>) -> Result<StatisticsOutput> {
        let engine = match target {
            Some(target) => self.config.statistics.clone().with_target(target)?,
            None => self.config.statistics.clone(),
        };
        let statistics = engine.compute(cycles)?;
        let idle_breakdown = engine.idle_breakdown(cycles)?;
        let ratings = engine.ratings(&statistics, idle_breakdown.as_ref());
        Ok(StatisticsOutput {
            record: StageRecord::succeeded(Stage::ComputeStatistics, statistics.count),
            statistics,
            idle_breakdown,
            ratings,
        })
    }

    async fn finish_stage(&self, record: StageRecord) {
        self.emit_event(WorkflowEvent::StageFinished { record }).await;
    }

    /// Emit workflow event if channel configured
    async fn emit_event(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Collapse a blocking-task join into the stage result
fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    joined?
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StageStatus;
    use opcycle_common::OperationalState::*;

    fn frames(states: &[(opcycle_common::OperationalState, f64)]) -> Vec<LabeledFrame> {
        states
            .iter()
            .enumerate()
            .map(|(i, (s, t))| LabeledFrame::new(*s, *t, format!("{:.0}", t), i))
            .collect()
    }

    fn full_cycle() -> Vec<LabeledFrame> {
        frames(&[
            (Idle, 0.0),
            (ActivePrimary, 1.0),
            (TransitToSecondary, 6.0),
            (ActiveSecondary, 9.0),
            (TransitToPrimary, 12.0),
            (Idle, 15.0),
        ])
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.preferred_source, PreferredSource::Frames);
        assert_eq!(config.table.len(), 6);
        assert_eq!(config.statistics.target(), 20.0);
    }

    #[test]
    fn test_pipeline_creation() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        assert!(pipeline.event_tx.is_none());
    }

    #[tokio::test]
    async fn test_missing_input_is_fatal() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let err = pipeline.run(PipelineInput::default()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_frames_only_run() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let context = pipeline
            .run(PipelineInput::default().with_frames(full_cycle()))
            .await
            .unwrap();

        assert_eq!(context.selected_source, Some(CycleSource::StateMachine));
        assert!(!context.used_fallback);
        assert_eq!(context.cycles().len(), 1);
        assert_eq!(context.statistics.count, 1);
        assert_eq!(
            context.stage(Stage::ExtractMarkup).unwrap().status,
            StageStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_invalid_frames_fail_stage_only() {
        let mut bad = full_cycle();
        bad[2].confidence = 7.0;

        let pipeline = Pipeline::new(PipelineConfig::default());
        let context = pipeline
            .run(PipelineInput::default().with_frames(bad))
            .await
            .unwrap();

        assert!(context.stage(Stage::DetectEvents).unwrap().is_failed());
        assert!(!context.stage(Stage::AssembleCycles).unwrap().is_failed());
        assert!(context.events.is_empty());
        assert_eq!(context.statistics.count, 0);
    }

    #[tokio::test]
    async fn test_invalid_target_fails_statistics_stage() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let context = pipeline
            .run(
                PipelineInput::default()
                    .with_frames(full_cycle())
                    .with_target(-3.0),
            )
            .await
            .unwrap();

        assert!(context.stage(Stage::ComputeStatistics).unwrap().is_failed());
        assert_eq!(context.statistics, CycleStatistics::empty(20.0));
        // Cycles survive a statistics failure
        assert_eq!(context.cycles().len(), 1);
    }
}
