//! Slimming stages and the run orchestrator for spreadsheet workbooks.
//!
//! A run backs up the source, applies the selected stages in a fixed order
//! (defined names, images, structural pruning) and publishes the result
//! atomically. The source file is never written.

pub mod images;
pub mod names;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod prune;
pub mod references;
pub mod stage;
pub mod worker;

pub use images::{asset_format, ImageReencoder, Reencoded};
pub use names::{sheet_references, workbook_part, DefinedName, DefinedNameCleaner, RemovalReason};
pub use orchestrator::Orchestrator;
pub use output::{write_atomically, write_backup, OutputLayout, OutputPlan};
pub use progress::{CancelToken, CollectingSink, NullSink, ProgressSink};
pub use prune::StructuralPruner;
pub use references::{drop_references, retarget_part, ReferenceCleanup};
pub use stage::{PackageTransform, Stage};
pub use worker::{PipelineWorker, RunHandle};
