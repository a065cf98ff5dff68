//! Pipeline coordinator integration tests
//!
//! Source selection, fallback flags, stage isolation and progress events.

use opcycle_ca::types::{CycleSource, LabeledFrame};
use opcycle_ca::workflow::{
    AnalysisReport, Pipeline, PipelineConfig, PipelineInput, Stage, StageStatus, WorkflowEvent,
};
use opcycle_common::config::{PreferredSource, TomlConfig};
use opcycle_common::OperationalState::{self, *};
use tokio::sync::mpsc;

const MARKUP: &str = r#"
The operator completed two cycles.
<cycle start="00:02" total_duration="21s"><dig start="00:02" end="00:09" duration="7s"/></cycle>
<cycle start="00:25" total_duration="19s"><dig start="00:25" end="00:31" duration="6s"/></cycle>
"#;

fn frames(states: &[(OperationalState, f64)]) -> Vec<LabeledFrame> {
    states
        .iter()
        .enumerate()
        .map(|(i, (s, t))| LabeledFrame::new(*s, *t, format!("{:.1}", t), i))
        .collect()
}

/// One complete 14s cycle followed by a pause
fn working_frames() -> Vec<LabeledFrame> {
    frames(&[
        (Idle, 0.0),
        (ActivePrimary, 1.0),
        (TransitToSecondary, 5.0),
        (ActiveSecondary, 8.0),
        (TransitToPrimary, 11.0),
        (Idle, 15.0),
    ])
}

/// Frames that never open a cycle
fn idle_frames() -> Vec<LabeledFrame> {
    frames(&[(Idle, 0.0), (Idle, 1.0), (Idle, 2.0)])
}

fn config_preferring(source: PreferredSource) -> PipelineConfig {
    let mut toml = TomlConfig::default();
    toml.pipeline.preferred_source = source;
    PipelineConfig::from_toml(&toml).unwrap()
}

#[tokio::test]
async fn test_both_sources_prefers_frames() {
    // Given: both inputs produce cycles
    let pipeline = Pipeline::new(PipelineConfig::default());
    let input = PipelineInput::default()
        .with_frames(working_frames())
        .with_markup(MARKUP);

    // When
    let context = pipeline.run(input).await.unwrap();

    // Then: frame cycles feed statistics, markup extras are still kept
    assert_eq!(context.selected_source, Some(CycleSource::StateMachine));
    assert!(!context.used_fallback);
    assert_eq!(context.statistics.count, 1);
    assert_eq!(context.statistics.mean, 14.0);
    assert_eq!(context.markup.as_ref().unwrap().cycles.len(), 2);
    assert!(context.stages.iter().all(|r| r.status == StageStatus::Succeeded));
}

#[tokio::test]
async fn test_markup_preference_honoured() {
    let pipeline = Pipeline::new(config_preferring(PreferredSource::Markup));
    let input = PipelineInput::default()
        .with_frames(working_frames())
        .with_markup(MARKUP);

    let context = pipeline.run(input).await.unwrap();

    assert_eq!(context.selected_source, Some(CycleSource::Markup));
    assert!(!context.used_fallback);
    assert_eq!(context.statistics.count, 2);
    assert_eq!(context.statistics.mean, 20.0);
    assert_eq!(context.phase_averages[0].name, "dig");
    assert_eq!(context.phase_averages[0].mean_duration, 6.5);
}

#[tokio::test]
async fn test_fallback_when_preferred_source_is_empty() {
    // Given: frames that never open a cycle
    let pipeline = Pipeline::new(PipelineConfig::default());
    let input = PipelineInput::default()
        .with_frames(idle_frames())
        .with_markup(MARKUP);

    // When
    let context = pipeline.run(input).await.unwrap();

    // Then: markup cycles are used and the fallback is flagged
    assert_eq!(context.selected_source, Some(CycleSource::Markup));
    assert!(context.used_fallback);
    assert_eq!(context.cycles().len(), 2);
    assert_eq!(context.stage(Stage::AssembleCycles).unwrap().items, 0);
}

#[tokio::test]
async fn test_no_cycles_anywhere() {
    let pipeline = Pipeline::new(PipelineConfig::default());
    let input = PipelineInput::default()
        .with_frames(idle_frames())
        .with_markup("No cycles were visible in this clip.");

    let context = pipeline.run(input).await.unwrap();

    assert_eq!(context.selected_source, None);
    assert!(!context.used_fallback);
    assert_eq!(context.statistics.count, 0);
    assert!(context.idle_breakdown.is_none());
    assert!(context.ratings.consistency.is_none());
}

#[tokio::test]
async fn test_target_override_applies() {
    let pipeline = Pipeline::new(PipelineConfig::default());
    let input = PipelineInput::default()
        .with_frames(working_frames())
        .with_target(7.0);

    let context = pipeline.run(input).await.unwrap();

    assert_eq!(context.statistics.target, 7.0);
    assert_eq!(context.statistics.efficiency_percentage, 50.0);
}

#[tokio::test]
async fn test_progress_events() {
    // Given: a pipeline with a progress channel
    let (tx, mut rx) = mpsc::channel(64);
    let pipeline = Pipeline::with_events(PipelineConfig::default(), tx);

    // When
    let context = pipeline
        .run(
            PipelineInput::default()
                .with_frames(working_frames())
                .with_markup(MARKUP),
        )
        .await
        .unwrap();
    drop(pipeline);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    // Then: run brackets every other event
    assert!(matches!(events.first(), Some(WorkflowEvent::RunStarted { run_id, .. }) if *run_id == context.run_id));
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::RunCompleted { cycles: 1, failed_stages: 0, .. })
    ));

    // One finish per stage
    let finished: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StageFinished { record } => Some(record.stage),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 4);
    for stage in [
        Stage::DetectEvents,
        Stage::AssembleCycles,
        Stage::ExtractMarkup,
        Stage::ComputeStatistics,
    ] {
        assert!(finished.contains(&stage));
    }
    assert_eq!(finished.last(), Some(&Stage::ComputeStatistics));

    // Detection finishes before assembly on the frame path
    let detect = finished.iter().position(|s| *s == Stage::DetectEvents);
    let assemble = finished.iter().position(|s| *s == Stage::AssembleCycles);
    assert!(detect < assemble);

    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::CyclesAssembled { cycles: 1, .. }
    )));
}

#[tokio::test]
async fn test_report_serializes_run() {
    let pipeline = Pipeline::new(PipelineConfig::default());
    let context = pipeline
        .run(PipelineInput::default().with_frames(working_frames()))
        .await
        .unwrap();

    let report = AnalysisReport::from(context);
    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();

    assert_eq!(json["source"], "state-machine");
    assert_eq!(json["used_fallback"], false);
    assert_eq!(json["cycles"][0]["duration"], 14.0);
    assert!(json["cycles"][0].get("declared_id").is_none());
    assert_eq!(json["statistics"]["count"], 1);
    assert_eq!(json["stages"][2]["stage"], "extract-markup");
    assert_eq!(json["stages"][2]["status"], "skipped");

    let text = report.render_text();
    assert!(text.contains("Source: frame labels"));
    assert!(text.contains("Average cycle time: 14.00s"));
}
