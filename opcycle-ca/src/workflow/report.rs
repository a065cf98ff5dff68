//! Serializable analysis report
//!
//! Built from a [`PipelineContext`]. Numeric values are rounded to report precision
//! here and nowhere else.

use chrono::{DateTime, Utc};
use opcycle_common::human_time::{format_clock, round_time};
use opcycle_common::VOCABULARY_VERSION;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use uuid::Uuid;

use super::{PipelineContext, StageRecord, StageStatus};
use crate::error::Result;
use crate::services::markup_extractor::{
    EvaluationCategory, OverallPerformance, Recommendations, SummaryField,
};
use crate::services::statistics::{CycleStatistics, IdleBreakdown, PerformanceRatings, PhaseAverage};
use crate::types::{Cycle, CycleSource, DiscardedCycle};

/// Final report for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub vocabulary_version: String,
    pub source: Option<CycleSource>,
    pub used_fallback: bool,
    pub event_count: usize,
    pub cycles: Vec<Cycle>,
    pub discarded: Vec<DiscardedCycle>,
    pub statistics: CycleStatistics,
    pub idle_breakdown: Option<IdleBreakdown>,
    pub phase_averages: Vec<PhaseAverage>,
    pub ratings: PerformanceRatings,
    pub summary: Vec<SummaryField>,
    pub evaluation: Vec<EvaluationCategory>,
    pub overall_performance: Option<OverallPerformance>,
    pub recommendations: Recommendations,
    pub plain_text: Option<String>,
    pub stages: Vec<StageRecord>,
}

impl From<PipelineContext> for AnalysisReport {
    fn from(context: PipelineContext) -> Self {
        let cycles = context.cycles().to_vec();
        let markup = context.markup.unwrap_or_default();
        let mut ratings = context.ratings;
        ratings.productivity_rate = round_time(ratings.productivity_rate);

        Self {
            run_id: context.run_id,
            generated_at: Utc::now(),
            vocabulary_version: VOCABULARY_VERSION.to_string(),
            source: context.selected_source,
            used_fallback: context.used_fallback,
            event_count: context.events.len(),
            cycles,
            discarded: context.assembly.discarded,
            statistics: context.statistics.for_display(),
            idle_breakdown: context.idle_breakdown.map(|i| i.for_display()),
            phase_averages: context
                .phase_averages
                .into_iter()
                .map(|p| PhaseAverage {
                    mean_duration: round_time(p.mean_duration),
                    ..p
                })
                .collect(),
            ratings,
            summary: markup.summary,
            evaluation: markup.evaluation,
            overall_performance: markup.overall_performance,
            recommendations: markup.recommendations,
            plain_text: Some(markup.plain_text).filter(|t| !t.is_empty()),
            stages: context.stages,
        }
    }
}

impl AnalysisReport {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Plain-text rendering for terminals
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let stats = &self.statistics;

        let _ = writeln!(out, "Operator Cycle Analysis  (run {})", self.run_id);
        let _ = writeln!(
            out,
            "Source: {}{}",
            match self.source {
                Some(CycleSource::StateMachine) => "frame labels",
                Some(CycleSource::Markup) => "model markup",
                None => "none",
            },
            if self.used_fallback { " (fallback)" } else { "" }
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Cycles: {}", stats.count);
        for cycle in &self.cycles {
            let observations: Vec<&str> =
                cycle.observations.iter().map(|o| o.describe()).collect();
            let _ = writeln!(
                out,
                "  #{:<3} {} -> {}  {:>7}  {}{}",
                cycle.sequence_number,
                cycle.start_label,
                cycle.end_label,
                cycle.duration_label,
                if cycle.is_complete { "complete" } else { "partial" },
                if observations.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", observations.join(", "))
                }
            );
        }
        if !self.discarded.is_empty() {
            let _ = writeln!(out, "  ({} buffers discarded)", self.discarded.len());
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Average cycle time: {:.2}s", stats.mean);
        let _ = writeln!(out, "Fastest / slowest:  {:.2}s / {:.2}s", stats.min, stats.max);
        let _ = writeln!(out, "Std deviation:      {:.2}s", stats.stddev);
        let _ = writeln!(out, "Consistency score:  {:.1}", stats.consistency_score);
        let _ = writeln!(
            out,
            "Efficiency:         {:.1}% of {:.1}s target",
            stats.efficiency_percentage, stats.target
        );
        let _ = writeln!(out, "Trend:              {}", stats.trend.label());

        if let Some(idle) = &self.idle_breakdown {
            let _ = writeln!(
                out,
                "Idle per cycle:     {:.2}s ({:.1}% of {:.2}s)",
                idle.idle_time_per_cycle, idle.idle_percentage, idle.approximate_average
            );
        }
        if self.ratings.productivity_rate > 0.0 {
            let _ = writeln!(
                out,
                "Productivity:       {:.1} cycles/hour",
                self.ratings.productivity_rate
            );
        }
        if let (Some(first), Some(last)) = (self.cycles.first(), self.cycles.last()) {
            let _ = writeln!(
                out,
                "Session span:       {}",
                format_clock(last.end_time - first.start_time)
            );
        }

        if !self.phase_averages.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Phase averages:");
            for phase in &self.phase_averages {
                let _ = writeln!(
                    out,
                    "  {:<22} {:.2}s  (n={})",
                    phase.name, phase.mean_duration, phase.count
                );
            }
        }

        if let Some(overall) = &self.overall_performance {
            let _ = writeln!(out);
            let _ = writeln!(out, "Overall: {} ({})", overall.score, overall.grade);
            if !overall.summary.is_empty() {
                let _ = writeln!(out, "  {}", overall.summary);
            }
        }

        for (level, items) in [
            ("High", &self.recommendations.high),
            ("Medium", &self.recommendations.medium),
            ("Low", &self.recommendations.low),
        ] {
            for item in items {
                let _ = writeln!(out, "  [{}] {}", level, item);
            }
        }

        let failed: Vec<&StageRecord> = self
            .stages
            .iter()
            .filter(|r| matches!(r.status, StageStatus::Failed { .. }))
            .collect();
        if !failed.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed stages:");
            for record in failed {
                if let StageStatus::Failed { reason } = &record.status {
                    let _ = writeln!(out, "  {}: {}", record.stage, reason);
                }
            }
        }

        out
    }
}
