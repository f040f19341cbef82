//! Core domain types, errors and run configuration for slimming
//! spreadsheet workbook packages.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CleanupRules, ImageSettings, SlimConfig};
pub use error::{Error, Result};
pub use types::{
    EntryRole, PrecisionOptions, ProgressEvent, RunPhase, RunReport, RunRequest, RunStatus,
    StageKind, StageReport, StageSelection, WorkbookFormat, CONTENT_TYPES_PART,
};
