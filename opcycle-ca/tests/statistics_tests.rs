//! Statistics engine integration tests

use opcycle_ca::services::statistics::{
    self, phase_averages, productivity_rate, ConsistencyRating, EfficiencyRating, Trend,
};
use opcycle_ca::services::{markup_extractor, StatisticsEngine};
use opcycle_ca::AnalysisError;

/// Helper: back-to-back (start, end) records from durations
fn contiguous(durations: &[f64]) -> Vec<(f64, f64)> {
    let mut start = 0.0;
    durations
        .iter()
        .map(|d| {
            let record = (start, start + d);
            start += d;
            record
        })
        .collect()
}

#[test]
fn test_empty_input_is_zero_valued() {
    let records: Vec<(f64, f64)> = Vec::new();
    let stats = StatisticsEngine::new().compute(&records).unwrap();

    assert_eq!(stats.count, 0);
    assert_eq!(stats.mean, 0.0);
    assert_eq!(stats.stddev, 0.0);
    assert_eq!(stats.consistency_score, 0.0);
    assert_eq!(stats.efficiency_percentage, 0.0);
    assert_eq!(stats.trend, Trend::InsufficientData);
    assert!(StatisticsEngine::new()
        .idle_breakdown(&records)
        .unwrap()
        .is_none());
}

#[test]
fn test_identical_durations() {
    // Given: three cycles of exactly the target duration
    let records = contiguous(&[20.0, 20.0, 20.0]);

    // When
    let stats = statistics::compute(&records, 20.0).unwrap();

    // Then: no spread, perfect consistency, on-target efficiency, stable trend
    assert_eq!(stats.mean, 20.0);
    assert_eq!(stats.min, 20.0);
    assert_eq!(stats.max, 20.0);
    assert_eq!(stats.variance, 0.0);
    assert_eq!(stats.consistency_score, 100.0);
    assert_eq!(stats.efficiency_percentage, 100.0);
    assert_eq!(stats.trend, Trend::Stable);
}

#[test]
fn test_trend_thresholds() {
    let engine = StatisticsEngine::new();

    // Second half 10% faster
    let improving = engine.compute(&contiguous(&[20.0, 18.0, 18.0])).unwrap();
    assert_eq!(improving.trend, Trend::Improving);

    // Second half 10% slower
    let declining = engine.compute(&contiguous(&[20.0, 22.0, 22.0])).unwrap();
    assert_eq!(declining.trend, Trend::Declining);

    // Within the band
    let stable = engine.compute(&contiguous(&[20.0, 20.5, 20.5])).unwrap();
    assert_eq!(stable.trend, Trend::Stable);

    // Two cycles are not enough
    let short = engine.compute(&contiguous(&[20.0, 40.0])).unwrap();
    assert_eq!(short.trend, Trend::InsufficientData);
}

#[test]
fn test_custom_trend_threshold() {
    let engine = StatisticsEngine::new().with_trend_threshold(15.0).unwrap();
    let stats = engine.compute(&contiguous(&[20.0, 22.0, 22.0])).unwrap();
    assert_eq!(stats.trend, Trend::Stable);
}

#[test]
fn test_consistency_clamped_at_zero() {
    // stddev larger than the mean
    let stats = StatisticsEngine::new()
        .compute(&contiguous(&[1.0, 1.0, 1.0, 50.0]))
        .unwrap();
    assert!(stats.stddev > stats.mean);
    assert_eq!(stats.consistency_score, 0.0);
}

#[test]
fn test_idle_breakdown_dual_average_sample() {
    // Given: five cycles with gaps, spanning 7s..165s
    let records = vec![
        (7.0, 35.0),
        (40.0, 65.0),
        (72.0, 102.0),
        (108.0, 133.0),
        (135.0, 165.0),
    ];
    let engine = StatisticsEngine::new();

    // When
    let idle = engine.idle_breakdown(&records).unwrap().unwrap().for_display();

    // Then
    assert_eq!(idle.specific_average, 27.6);
    assert_eq!(idle.approximate_average, 31.6);
    assert_eq!(idle.idle_time_per_cycle, 4.0);
    assert_eq!(idle.idle_percentage, 12.7);

    let stats = engine.compute(&records).unwrap();
    let ratings = engine.ratings(&stats, Some(&idle));
    assert_eq!(ratings.efficiency, Some(EfficiencyRating::Good));
    assert_eq!(ratings.consistency, Some(ConsistencyRating::High));
}

#[test]
fn test_negative_duration_rejected() {
    let records = vec![(10.0, 5.0)];
    let err = StatisticsEngine::new().compute(&records).unwrap_err();
    assert!(matches!(err, AnalysisError::ContractViolation(_)));
}

#[test]
fn test_invalid_target_rejected() {
    assert!(StatisticsEngine::new().with_target(-1.0).is_err());
    assert!(StatisticsEngine::new().with_target(f64::NAN).is_err());
    assert!(StatisticsEngine::new().with_trend_threshold(-5.0).is_err());
}

#[test]
fn test_productivity_rate() {
    assert_eq!(productivity_rate(20.0), 180.0);
    assert_eq!(productivity_rate(0.0), 0.0);
}

#[test]
fn test_markup_cycles_feed_statistics() {
    // Markup cycles share the record shape used by the frame path
    let cycles = markup_extractor::parse_cycles(
        r#"<cycle start="00:00" total_duration="18s"><dig start="0" end="6" duration="6s"/></cycle>
           <cycle start="00:20" total_duration="22s"><dig start="20" end="28" duration="8s"/></cycle>"#,
    );

    let stats = StatisticsEngine::new().compute(&cycles).unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.mean, 20.0);

    let averages = phase_averages(&cycles);
    assert_eq!(averages.len(), 1);
    assert_eq!(averages[0].name, "dig");
    assert_eq!(averages[0].mean_duration, 7.0);
    assert_eq!(averages[0].count, 2);
}

#[test]
fn test_repeated_inexact_duration_is_perfectly_consistent() {
    // Given: seven markup cycles all declared as 2.3s
    let markup = r#"<cycle start="00:00" total_duration="2.3s"></cycle>"#.repeat(7);
    let cycles = markup_extractor::parse_cycles(&markup);
    assert_eq!(cycles.len(), 7);

    // When
    let stats = StatisticsEngine::new().compute(&cycles).unwrap();

    // Then: summation error does not leak into the spread
    assert_eq!(stats.mean, 2.3);
    assert_eq!(stats.min, stats.max);
    assert_eq!(stats.variance, 0.0);
    assert_eq!(stats.stddev, 0.0);
    assert_eq!(stats.consistency_score, 100.0);
    assert_eq!(stats.trend, Trend::Stable);
}
