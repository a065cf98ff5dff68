//! Cycle statistics engine
//!
//! **Purpose:** Aggregate metrics over a list of cycles from either producer
//!
//! All values are computed at full precision and recomputed from scratch on every
//! call. [`CycleStatistics::for_display`] applies the report precision (2 decimals
//! for times, 1 for percentages) as a separate, final step.

use opcycle_common::config::StatisticsConfig;
use opcycle_common::human_time::{round_percent, round_time};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::types::{Cycle, TimedRecord};

/// Session length of one hour, for the productivity rate
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Direction of cycle durations over the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    InsufficientData,
    /// Second half faster than the first
    Improving,
    /// Second half slower than the first
    Declining,
    Stable,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::InsufficientData => "Insufficient data",
            Trend::Improving => "Improving (faster over time)",
            Trend::Declining => "Declining (slower over time)",
            Trend::Stable => "Stable",
        }
    }
}

/// **Aggregate duration statistics**
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleStatistics {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Sample variance (N-1), 0 for fewer than two cycles
    pub variance: f64,
    pub stddev: f64,
    pub trend: Trend,
    /// Inverse coefficient of variation, clamped to [0, 100]
    pub consistency_score: f64,
    /// target / mean · 100
    pub efficiency_percentage: f64,
    pub target: f64,
}

impl CycleStatistics {
    /// Zero-valued statistics for empty input
    pub fn empty(target: f64) -> Self {
        Self {
            count: 0,
            mean: 0.0,
            min: 0.0,
            max: 0.0,
            variance: 0.0,
            stddev: 0.0,
            trend: Trend::InsufficientData,
            consistency_score: 0.0,
            efficiency_percentage: 0.0,
            target,
        }
    }

    /// Copy rounded to report precision
    pub fn for_display(&self) -> Self {
        Self {
            count: self.count,
            mean: round_time(self.mean),
            min: round_time(self.min),
            max: round_time(self.max),
            variance: round_time(self.variance),
            stddev: round_time(self.stddev),
            trend: self.trend,
            consistency_score: round_percent(self.consistency_score),
            efficiency_percentage: round_percent(self.efficiency_percentage),
            target: round_time(self.target),
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} cycles, avg {:.2}s (min {:.2}s, max {:.2}s), consistency {:.1}%, efficiency {:.1}%, trend: {}",
            self.count,
            self.mean,
            self.min,
            self.max,
            self.consistency_score,
            self.efficiency_percentage,
            self.trend.label()
        )
    }
}

/// **Idle-time decomposition**
///
/// `specific_average` counts only time inside cycles; `approximate_average` spreads
/// the whole span from first start to last end over the cycle count. The gap is
/// time spent between cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleBreakdown {
    pub specific_average: f64,
    pub approximate_average: f64,
    pub idle_time_per_cycle: f64,
    pub idle_percentage: f64,
}

impl IdleBreakdown {
    pub fn for_display(&self) -> Self {
        Self {
            specific_average: round_time(self.specific_average),
            approximate_average: round_time(self.approximate_average),
            idle_time_per_cycle: round_time(self.idle_time_per_cycle),
            idle_percentage: round_percent(self.idle_percentage),
        }
    }
}

/// Mean duration of one named phase across the cycles that contain it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAverage {
    pub name: String,
    pub mean_duration: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyRating {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EfficiencyRating {
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
}

/// Qualitative ratings derived from the numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRatings {
    pub consistency: Option<ConsistencyRating>,
    pub efficiency: Option<EfficiencyRating>,
    /// Cycles per hour at the mean duration
    pub productivity_rate: f64,
}

/// Statistics engine
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    target: f64,
    trend_threshold_percent: f64,
}

impl Default for StatisticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsEngine {
    /// Create engine with defaults (target 20s, trend threshold 5%)
    pub fn new() -> Self {
        let defaults = StatisticsConfig::default();
        Self {
            target: defaults.target_duration,
            trend_threshold_percent: defaults.trend_threshold_percent,
        }
    }

    pub fn from_config(config: &StatisticsConfig) -> Result<Self> {
        Self::new()
            .with_target(config.target_duration)?
            .with_trend_threshold(config.trend_threshold_percent)
    }

    /// Set target cycle duration (seconds)
    pub fn with_target(mut self, target: f64) -> Result<Self> {
        if !target.is_finite() || target < 0.0 {
            return Err(AnalysisError::ContractViolation(format!(
                "target duration must be a non-negative number (got {})",
                target
            )));
        }
        self.target = target;
        Ok(self)
    }

    /// Set relative change (percent) that counts as a trend
    pub fn with_trend_threshold(mut self, percent: f64) -> Result<Self> {
        if !percent.is_finite() || percent < 0.0 {
            return Err(AnalysisError::ContractViolation(format!(
                "trend threshold must be a non-negative number (got {})",
                percent
            )));
        }
        self.trend_threshold_percent = percent;
        Ok(self)
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Compute aggregate statistics over record durations
    pub fn compute<T: TimedRecord>(&self, records: &[T]) -> Result<CycleStatistics> {
        let durations = checked_durations(records)?;
        if durations.is_empty() {
            debug!("No cycles to aggregate");
            return Ok(CycleStatistics::empty(self.target));
        }

        let count = durations.len();
        let mean = mean(&durations);
        let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
        let max = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let variance = if count > 1 {
            durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (count - 1) as f64
        } else {
            0.0
        };
        let stddev = variance.sqrt();

        let consistency_score = if mean > 0.0 {
            (100.0 - 100.0 * (stddev / mean)).clamp(0.0, 100.0)
        } else {
            0.0
        };

        let efficiency_percentage = if mean > 0.0 {
            self.target / mean * 100.0
        } else {
            0.0
        };

        Ok(CycleStatistics {
            count,
            mean,
            min,
            max,
            variance,
            stddev,
            trend: self.trend(&durations),
            consistency_score,
            efficiency_percentage,
            target: self.target,
        })
    }

    /// First half vs second half of the session (floor split, extra element in the second half)
    fn trend(&self, durations: &[f64]) -> Trend {
        if durations.len() < 3 {
            return Trend::InsufficientData;
        }

        let mid = durations.len() / 2;
        let first = mean(&durations[..mid]);
        let second = mean(&durations[mid..]);

        if first == 0.0 {
            return if second == 0.0 {
                Trend::Stable
            } else {
                Trend::Declining
            };
        }

        let change_percent = (second - first) / first * 100.0;
        if change_percent <= -self.trend_threshold_percent {
            Trend::Improving
        } else if change_percent >= self.trend_threshold_percent {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Idle-time decomposition, `None` for empty input
    pub fn idle_breakdown<T: TimedRecord>(&self, records: &[T]) -> Result<Option<IdleBreakdown>> {
        let durations = checked_durations(records)?;
        if durations.is_empty() {
            return Ok(None);
        }

        let first_start = records
            .iter()
            .map(|r| r.start_time())
            .fold(f64::INFINITY, f64::min);
        let last_end = records
            .iter()
            .map(|r| r.end_time())
            .fold(f64::NEG_INFINITY, f64::max);
        if !first_start.is_finite() || !last_end.is_finite() {
            return Err(AnalysisError::ContractViolation(
                "cycle bounds must be finite".to_string(),
            ));
        }

        let specific_average = mean(&durations);
        let approximate_average = (last_end - first_start) / durations.len() as f64;
        let idle_time_per_cycle = approximate_average - specific_average;
        let idle_percentage = if approximate_average > 0.0 {
            idle_time_per_cycle / approximate_average * 100.0
        } else {
            0.0
        };

        Ok(Some(IdleBreakdown {
            specific_average,
            approximate_average,
            idle_time_per_cycle,
            idle_percentage,
        }))
    }

    /// Ratings from statistics and the optional idle breakdown
    pub fn ratings(
        &self,
        stats: &CycleStatistics,
        idle: Option<&IdleBreakdown>,
    ) -> PerformanceRatings {
        let consistency = (stats.count > 0 && stats.mean > 0.0).then(|| {
            let ratio = stats.stddev / stats.mean;
            if ratio < 0.15 {
                ConsistencyRating::High
            } else if ratio < 0.30 {
                ConsistencyRating::Moderate
            } else {
                ConsistencyRating::Low
            }
        });

        let efficiency = idle.map(|idle| match idle.idle_percentage {
            p if p < 5.0 => EfficiencyRating::Excellent,
            p if p < 15.0 => EfficiencyRating::Good,
            p if p < 30.0 => EfficiencyRating::Fair,
            _ => EfficiencyRating::NeedsImprovement,
        });

        PerformanceRatings {
            consistency,
            efficiency,
            productivity_rate: productivity_rate(stats.mean),
        }
    }
}

/// Cycles per hour at a given mean duration (0 when the mean is not positive)
pub fn productivity_rate(mean_duration: f64) -> f64 {
    if mean_duration > 0.0 {
        SECONDS_PER_HOUR / mean_duration
    } else {
        0.0
    }
}

/// Per-phase mean durations in first-seen order
pub fn phase_averages(cycles: &[Cycle]) -> Vec<PhaseAverage> {
    let mut totals: Vec<(String, f64, usize)> = Vec::new();

    for phase in cycles.iter().flat_map(|c| c.phases.iter()) {
        match totals.iter_mut().find(|(name, _, _)| *name == phase.name) {
            Some((_, sum, count)) => {
                *sum += phase.duration;
                *count += 1;
            }
            None => totals.push((phase.name.clone(), phase.duration, 1)),
        }
    }

    totals
        .into_iter()
        .map(|(name, sum, count)| PhaseAverage {
            name,
            mean_duration: sum / count as f64,
            count,
        })
        .collect()
}

/// Compute statistics with the default trend threshold
pub fn compute<T: TimedRecord>(records: &[T], target: f64) -> Result<CycleStatistics> {
    StatisticsEngine::new().with_target(target)?.compute(records)
}

fn checked_durations<T: TimedRecord>(records: &[T]) -> Result<Vec<f64>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let d = r.duration();
            if d.is_finite() && d >= 0.0 {
                Ok(d)
            } else {
                Err(AnalysisError::ContractViolation(format!(
                    "record {} has invalid duration {}",
                    i + 1,
                    d
                )))
            }
        })
        .collect()
}

/// Mean anchored on the first value, so identical values come back exactly
fn mean(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    first + values.iter().map(|v| v - first).sum::<f64>() / values.len() as f64
}
