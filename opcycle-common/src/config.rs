//! Configuration loading and resolution
//!
//! All tunables of the segmentation core are constants loaded once at startup from
//! an optional TOML file. Nothing here changes while a pipeline runs.
//!
//! # Resolution priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable `OPCYCLE_CONFIG`
//! 3. Platform config directory: `<config_dir>/opcycle/config.toml`
//! 4. Compiled defaults
//!
//! An explicitly requested file (priority 1) that does not exist is an error.
//! A missing file at priorities 2-3 logs a warning and falls back to defaults.
//!
//! # File layout
//!
//! ```toml
//! [segmentation]
//! min_complete_duration = 5.0
//! min_partial_duration = 3.0
//! required_events = ["cycle-open", "phase-end-1", "phase-end-2", "phase-end-3"]
//! salvage_events = ["cycle-open", "phase-end-1"]
//!
//! [boundaries]
//! opening = "cycle-open"
//! closing = ["cycle-close", "cycle-pause"]
//! reopening = ["cycle-close"]
//!
//! [statistics]
//! target_duration = 20.0
//! trend_threshold_percent = 5.0
//!
//! [[transitions]]
//! from = "idle"
//! to = "active-primary"
//! event = "cycle-open"
//!
//! [[phases]]
//! name = "primary"
//! starts_on = ["cycle-open", "cycle-close"]
//! ends_on = ["phase-end-1"]
//! ```

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::vocabulary::{EventType, OperationalState};
use crate::{Error, Result};

/// Environment variable naming a configuration file
pub const CONFIG_ENV_VAR: &str = "OPCYCLE_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Cycle validity and salvage thresholds
    pub segmentation: SegmentationConfig,
    /// Which events open, close and reopen cycles
    pub boundaries: BoundaryConfig,
    /// Statistics engine parameters
    pub statistics: StatisticsConfig,
    /// Qualitative observation thresholds
    pub observations: ObservationConfig,
    /// Pipeline source selection
    pub pipeline: PipelineSettings,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Transition table entries
    pub transitions: Vec<TransitionRule>,
    /// Phase decomposition rules, in canonical phase order
    pub phases: Vec<PhaseRule>,
}

/// Cycle validity thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Minimum duration (seconds) of a complete cycle
    pub min_complete_duration: f64,
    /// Minimum elapsed time (seconds) for a partial cycle to be salvaged
    pub min_partial_duration: f64,
    /// Events that must all be present for a cycle to be complete
    pub required_events: Vec<EventType>,
    /// Events that must all be present for a partial cycle to be salvaged
    pub salvage_events: Vec<EventType>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_complete_duration: 5.0,
            min_partial_duration: 3.0,
            required_events: vec![
                EventType::CycleOpen,
                EventType::PhaseEnd1,
                EventType::PhaseEnd2,
                EventType::PhaseEnd3,
            ],
            salvage_events: vec![EventType::CycleOpen, EventType::PhaseEnd1],
        }
    }
}

/// Cycle boundary designations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// The single event type that opens a cycle
    pub opening: EventType,
    /// Event types that close an open cycle
    pub closing: Vec<EventType>,
    /// Closing event types that immediately open the next cycle
    pub reopening: Vec<EventType>,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            opening: EventType::CycleOpen,
            closing: vec![EventType::CycleClose, EventType::CyclePause],
            reopening: vec![EventType::CycleClose],
        }
    }
}

/// Statistics engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Target cycle duration (seconds) for the efficiency percentage
    pub target_duration: f64,
    /// Relative change (percent) between halves that counts as a trend
    pub trend_threshold_percent: f64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            target_duration: 20.0,
            trend_threshold_percent: 5.0,
        }
    }
}

/// Thresholds for the qualitative cycle tags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Phase whose duration drives the quick/extended tags
    pub primary_phase: String,
    /// Primary phase shorter than this is tagged `quick`
    pub quick_below: f64,
    /// Primary phase longer than this is tagged `extended`
    pub extended_above: f64,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            primary_phase: "primary".to_string(),
            quick_below: 3.0,
            extended_above: 8.0,
        }
    }
}

/// Data source preferred when both are available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferredSource {
    /// Frame labels through the state machine
    #[default]
    Frames,
    /// Generative-model markup
    Markup,
}

/// Pipeline source selection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Source whose cycles feed statistics when it produced any
    pub preferred_source: PreferredSource,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One transition table entry: `(from, to) → event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: OperationalState,
    pub to: OperationalState,
    pub event: EventType,
}

impl TransitionRule {
    pub fn new(from: OperationalState, to: OperationalState, event: EventType) -> Self {
        Self { from, to, event }
    }
}

/// One phase: starts on any of `starts_on`, ends on the next of `ends_on`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRule {
    pub name: String,
    pub starts_on: Vec<EventType>,
    pub ends_on: Vec<EventType>,
}

static DEFAULT_TRANSITIONS: Lazy<Vec<TransitionRule>> = Lazy::new(|| {
    use EventType::*;
    use OperationalState::*;
    vec![
        TransitionRule::new(Idle, ActivePrimary, CycleOpen),
        TransitionRule::new(ActivePrimary, TransitToSecondary, PhaseEnd1),
        TransitionRule::new(TransitToSecondary, ActiveSecondary, PhaseEnd2),
        TransitionRule::new(ActiveSecondary, TransitToPrimary, PhaseEnd3),
        TransitionRule::new(TransitToPrimary, ActivePrimary, CycleClose),
        TransitionRule::new(TransitToPrimary, Idle, CyclePause),
    ]
});

static DEFAULT_PHASES: Lazy<Vec<PhaseRule>> = Lazy::new(|| {
    use EventType::*;
    vec![
        PhaseRule {
            name: "primary".to_string(),
            starts_on: vec![CycleOpen, CycleClose],
            ends_on: vec![PhaseEnd1],
        },
        PhaseRule {
            name: "transit-to-secondary".to_string(),
            starts_on: vec![PhaseEnd1],
            ends_on: vec![PhaseEnd2],
        },
        PhaseRule {
            name: "secondary".to_string(),
            starts_on: vec![PhaseEnd2],
            ends_on: vec![PhaseEnd3],
        },
    ]
});

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            boundaries: BoundaryConfig::default(),
            statistics: StatisticsConfig::default(),
            observations: ObservationConfig::default(),
            pipeline: PipelineSettings::default(),
            logging: LoggingConfig::default(),
            transitions: DEFAULT_TRANSITIONS.clone(),
            phases: DEFAULT_PHASES.clone(),
        }
    }
}

impl TomlConfig {
    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))
    }

    /// Check internal consistency of the table, boundaries and thresholds
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;
        for (name, value) in [
            ("min_complete_duration", seg.min_complete_duration),
            ("min_partial_duration", seg.min_partial_duration),
            ("target_duration", self.statistics.target_duration),
            ("trend_threshold_percent", self.statistics.trend_threshold_percent),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a finite, non-negative number (got {})",
                    name, value
                )));
            }
        }

        if seg.required_events.is_empty() {
            return Err(Error::Config("required_events must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &self.transitions {
            if rule.from == rule.to {
                return Err(Error::Config(format!(
                    "transition {} -> {} maps a state onto itself",
                    rule.from, rule.to
                )));
            }
            if !seen.insert((rule.from, rule.to)) {
                return Err(Error::Config(format!(
                    "transition {} -> {} is listed more than once",
                    rule.from, rule.to
                )));
            }
        }

        let bounds = &self.boundaries;
        if !self.transitions.iter().any(|r| r.event == bounds.opening) {
            return Err(Error::Config(format!(
                "no transition produces the opening event {}",
                bounds.opening
            )));
        }
        if bounds.closing.contains(&bounds.opening) {
            return Err(Error::Config(format!(
                "{} cannot both open and close a cycle; list it under reopening instead",
                bounds.opening
            )));
        }
        if let Some(stray) = bounds.reopening.iter().find(|e| !bounds.closing.contains(*e)) {
            return Err(Error::Config(format!(
                "reopening event {} must also be a closing event",
                stray
            )));
        }

        let mut phase_names = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(Error::Config("phase name must not be empty".to_string()));
            }
            if !phase_names.insert(phase.name.as_str()) {
                return Err(Error::Config(format!(
                    "phase {:?} is defined more than once",
                    phase.name
                )));
            }
            if phase.starts_on.is_empty() || phase.ends_on.is_empty() {
                return Err(Error::Config(format!(
                    "phase {:?} needs at least one start and one end event",
                    phase.name
                )));
            }
        }

        Ok(())
    }
}

/// Read and validate a configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    TomlConfig::from_toml_str(&content)
}

/// Write a configuration file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, config.to_toml_string()?)?;
    Ok(())
}

/// Where a configuration path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    CommandLine,
    Environment,
    PlatformDefault,
}

/// Resolves which configuration file (if any) to load
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit path from the command line (highest priority)
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Candidate path and its origin, without checking existence
    pub fn resolve(&self) -> Option<(PathBuf, ConfigOrigin)> {
        if let Some(path) = &self.cli_path {
            return Some((path.clone(), ConfigOrigin::CommandLine));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some((PathBuf::from(path), ConfigOrigin::Environment));
            }
        }

        default_config_path().map(|p| (p, ConfigOrigin::PlatformDefault))
    }

    /// Resolve and load the configuration
    pub fn load(&self) -> Result<TomlConfig> {
        match self.resolve() {
            Some((path, origin)) if path.exists() => {
                info!("Loading configuration from {} ({:?})", path.display(), origin);
                load_toml_config(&path)
            }
            Some((path, ConfigOrigin::CommandLine)) => Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            ))),
            Some((path, origin)) => {
                warn!(
                    "Config file {} ({:?}) not found, using built-in defaults",
                    path.display(),
                    origin
                );
                Ok(TomlConfig::default())
            }
            None => {
                warn!("No config location available, using built-in defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

/// Platform configuration path: `<config_dir>/opcycle/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("opcycle").join("config.toml"))
}
