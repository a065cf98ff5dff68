//! Analysis workflow
//!
//! Runs the two independent data paths and merges them:
//! - **Frame path**: detect-events → assemble-cycles
//! - **Markup path**: extract-markup
//! - **Merge**: compute-statistics over the selected source's cycles
//!
//! Stage failures are isolated: a failed stage is recorded, its output is replaced
//! by an empty default, and downstream stages still run.

pub mod pipeline;
pub mod report;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::services::markup_extractor::MarkupDocument;
use crate::services::statistics::{CycleStatistics, IdleBreakdown, PerformanceRatings, PhaseAverage};
use crate::types::{AssemblyResult, Cycle, CycleSource, Event, LabeledFrame};

pub use pipeline::{Pipeline, PipelineConfig};
pub use report::AnalysisReport;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    DetectEvents,
    AssembleCycles,
    ExtractMarkup,
    ComputeStatistics,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DetectEvents => "detect-events",
            Stage::AssembleCycles => "assemble-cycles",
            Stage::ExtractMarkup => "extract-markup",
            Stage::ComputeStatistics => "compute-statistics",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StageStatus {
    Succeeded,
    Failed { reason: String },
    /// Stage input was not supplied
    Skipped,
}

/// Per-stage record kept in the context and the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
    /// Items produced (events, cycles, ...); 0 for failed or skipped stages
    pub items: usize,
}

impl StageRecord {
    pub fn succeeded(stage: Stage, items: usize) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            items,
        }
    }

    pub fn failed(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed {
                reason: reason.into(),
            },
            items: 0,
        }
    }

    pub fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            items: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StageStatus::Failed { .. })
    }
}

/// Collaborator output handed to the pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    /// Classified frames, in sampling order
    pub frames: Option<Vec<LabeledFrame>>,
    /// Raw generative-model text
    pub markup: Option<String>,
    /// Target cycle duration override (seconds)
    pub target: Option<f64>,
}

impl PipelineInput {
    pub fn with_frames(mut self, frames: Vec<LabeledFrame>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = Some(markup.into());
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }
}

/// Everything one pipeline run produced
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub events: Vec<Event>,
    pub assembly: AssemblyResult,
    pub markup: Option<MarkupDocument>,
    /// Source whose cycles fed the statistics (`None` when neither produced any)
    pub selected_source: Option<CycleSource>,
    /// True when the preferred source yielded no cycles and the other was used
    pub used_fallback: bool,
    pub statistics: CycleStatistics,
    pub idle_breakdown: Option<IdleBreakdown>,
    pub phase_averages: Vec<PhaseAverage>,
    pub ratings: PerformanceRatings,
    pub stages: Vec<StageRecord>,
}

impl PipelineContext {
    /// Cycles of the selected source
    pub fn cycles(&self) -> &[Cycle] {
        match self.selected_source {
            Some(CycleSource::StateMachine) => &self.assembly.cycles,
            Some(CycleSource::Markup) => self
                .markup
                .as_ref()
                .map(|m| m.cycles.as_slice())
                .unwrap_or(&[]),
            None => &[],
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Progress events emitted during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    /// Run started
    RunStarted {
        /// Run identifier
        run_id: Uuid,
        /// Number of frames supplied, if any
        frames: Option<usize>,
        /// Markup length in bytes, if supplied
        markup_bytes: Option<usize>,
        /// Unix timestamp (seconds since epoch)
        timestamp: i64,
    },

    /// Stage started
    StageStarted { stage: Stage },

    /// Stage finished (succeeded, failed or skipped)
    StageFinished { record: StageRecord },

    /// Cycles were assembled from events
    CyclesAssembled {
        /// Kept cycles
        cycles: usize,
        /// Discarded buffers
        discarded: usize,
    },

    /// Statistics source chosen
    SourceSelected {
        source: Option<CycleSource>,
        fallback: bool,
    },

    /// Run completed
    RunCompleted {
        run_id: Uuid,
        cycles: usize,
        failed_stages: usize,
        /// Unix timestamp (seconds since epoch)
        timestamp: i64,
    },
}
