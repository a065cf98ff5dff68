//! opcycle-ca - Operator Cycle Analysis
//!
//! Reads classified frames and/or generative-model markup from files, runs the
//! analysis pipeline and prints the report.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use opcycle_common::config::{ConfigResolver, PreferredSource, TomlConfig};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use opcycle_ca::types::LabeledFrame;
use opcycle_ca::workflow::{
    AnalysisReport, Pipeline, PipelineConfig, PipelineInput, WorkflowEvent,
};

/// Command-line arguments for opcycle-ca
#[derive(Parser, Debug)]
#[command(name = "opcycle-ca")]
#[command(about = "Operator work-cycle segmentation and statistics")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "OPCYCLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze classified frames and/or model markup
    Analyze {
        /// JSON array of classified frames
        #[arg(short, long)]
        frames: Option<PathBuf>,

        /// Model output text containing cycle markup
        #[arg(short, long)]
        markup: Option<PathBuf>,

        /// Target cycle duration in seconds
        #[arg(short, long)]
        target: Option<f64>,

        /// Source used for statistics when both produce cycles
        #[arg(long, value_enum)]
        prefer: Option<SourceArg>,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the built-in configuration as TOML
    DefaultConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Frames,
    Markup,
}

impl From<SourceArg> for PreferredSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Frames => PreferredSource::Frames,
            SourceArg::Markup => PreferredSource::Markup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::DefaultConfig = args.command {
        print!("{}", TomlConfig::default().to_toml_string()?);
        return Ok(());
    }

    let mut config = ConfigResolver::new()
        .with_cli_path(args.config.clone())
        .load()
        .context("Failed to load configuration")?;

    // Initialize tracing (RUST_LOG wins over the configured level)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("opcycle_ca={0},opcycle_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting opcycle-ca {}", env!("CARGO_PKG_VERSION"));

    let Command::Analyze {
        frames,
        markup,
        target,
        prefer,
        format,
    } = args.command
    else {
        return Ok(());
    };

    if let Some(prefer) = prefer {
        config.pipeline.preferred_source = prefer.into();
    }

    let mut input = PipelineInput::default();
    if let Some(path) = &frames {
        input = input.with_frames(read_frames(path)?);
    }
    if let Some(path) = &markup {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read markup file {}", path.display()))?;
        input = input.with_markup(text);
    }
    if let Some(target) = target {
        input = input.with_target(target);
    }

    let pipeline_config =
        PipelineConfig::from_toml(&config).context("Invalid analysis configuration")?;

    let (event_tx, mut event_rx) = mpsc::channel::<WorkflowEvent>(32);
    let progress = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(?event, "Workflow event");
        }
    });

    let pipeline = Pipeline::with_events(pipeline_config, event_tx);
    let context = pipeline.run(input).await.context("Analysis failed")?;
    drop(pipeline);
    progress.await.context("Progress task failed")?;

    let report = AnalysisReport::from(context);
    match format {
        OutputFormat::Json => println!("{}", report.to_json_pretty()?),
        OutputFormat::Text => print!("{}", report.render_text()),
    }

    Ok(())
}

/// Decode the frame file; shape checks beyond JSON decoding happen in the pipeline
fn read_frames(path: &Path) -> Result<Vec<LabeledFrame>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read frames file {}", path.display()))?;
    let frames: Vec<LabeledFrame> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to decode frames from {}", path.display()))?;
    info!("Loaded {} frames from {}", frames.len(), path.display());
    Ok(frames)
}
