//! Analysis services
//!
//! Pure synchronous stages; the pipeline coordinator decides where they run.

pub mod cycle_assembler;
pub mod event_detector;
pub mod markup_extractor;
pub mod statistics;
pub mod transition_table;

pub use cycle_assembler::CycleAssembler;
pub use event_detector::{parse_frames, EventDetector};
pub use markup_extractor::MarkupDocument;
pub use statistics::{CycleStatistics, StatisticsEngine};
pub use transition_table::{TransitionOutcome, TransitionTable};
