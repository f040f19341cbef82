//! Runs the selected stages over one workbook.
//!
//! The source file is only ever read. A verbatim backup is written before
//! any stage runs, stages mutate an in-memory package, and the result is
//! published with a temp-file rename. Any error aborts the run and leaves
//! the source untouched.

use crate::output::{write_atomically, write_backup, OutputPlan};
use crate::progress::{CancelToken, ProgressSink};
use crate::stage::{PackageTransform, Stage};
use chrono::Local;
use slimmer_core::{
    Error, ProgressEvent, Result, RunPhase, RunReport, RunRequest, RunStatus, SlimConfig,
    WorkbookFormat,
};
use slimmer_package::WorkbookPackage;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

/// Share of the progress bar reserved for the stages.
const STAGE_PROGRESS: (f32, f32) = (10.0, 90.0);

/// Bookkeeping for the run in flight.
struct ActiveRun<'a> {
    sink: &'a dyn ProgressSink,
    report: RunReport,
    checkpoints: Vec<PathBuf>,
}

impl<'a> ActiveRun<'a> {
    fn new(request: &RunRequest, sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            report: RunReport::new(request.source.clone()),
            checkpoints: Vec::new(),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        log::debug!("Run phase {:?} -> {:?}", self.report.last_phase, phase);
        self.report.last_phase = phase;
    }

    fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{}", line);
        self.report.log.push(line.clone());
        self.sink.emit(ProgressEvent::Log(line));
    }

    fn status(&mut self, text: impl Into<String>, percent: f32) {
        let text = text.into();
        self.report.log.push(text.clone());
        self.sink.emit(ProgressEvent::Status { text, percent });
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn check_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Runs slimming requests against a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    config: SlimConfig,
}

impl Orchestrator {
    pub fn new(config: SlimConfig) -> Self {
        Self { config }
    }

    /// Run one request to completion.
    ///
    /// Never panics on bad input and never returns an error: failures are
    /// reported through [`RunReport::status`] and [`RunReport::error`].
    pub fn run(
        &self,
        request: &RunRequest,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> RunReport {
        let mut run = ActiveRun::new(request, sink);

        // A panicking stage still yields a report that knows about the backup.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(request, &mut run, cancel)
        }))
        .unwrap_or_else(|payload| Err(Error::Internal(panic_message(payload.as_ref()))));

        match outcome {
            Ok(status) => {
                for checkpoint in run.checkpoints.drain(..) {
                    if let Err(e) = fs::remove_file(&checkpoint) {
                        log::warn!("Could not remove checkpoint {}: {}", checkpoint.display(), e);
                    }
                }
                run.report.status = status;
                run.enter(RunPhase::Succeeded);
                let message = run.report.user_message();
                run.status(message, 100.0);
            }
            Err(e) => {
                log::error!("Run failed during {:?}: {}", run.report.last_phase, e);
                run.report.failed_during = Some(run.report.last_phase);
                run.report.error = Some(e.to_string());
                run.report.status = RunStatus::Failed;
                run.enter(RunPhase::Failed);
                if !run.checkpoints.is_empty() {
                    let kept: Vec<String> = run
                        .checkpoints
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect();
                    run.log(format!("Checkpoints kept: {}", kept.join(", ")));
                }
                let message = run.report.user_message();
                run.log(message);
            }
        }

        run.report
    }

    fn execute(
        &self,
        request: &RunRequest,
        run: &mut ActiveRun<'_>,
        cancel: &CancelToken,
    ) -> Result<RunStatus> {
        run.enter(RunPhase::Idle);
        let format = request.validate()?;
        let kinds = request.stages.kinds();
        let stages = Stage::selected(request, &self.config)?;
        if request.precision.aggressive && !request.stages.images {
            log::warn!("Aggressive mode has no effect without the image stage");
        }
        let plan = OutputPlan::new(&request.source, format, &kinds, &self.config, Local::now())?;

        run.status(format!("Reading {}", request.source.display()), 0.0);
        let bytes = fs::read(&request.source)?;
        run.report.source_bytes = bytes.len() as u64;
        if !WorkbookFormat::looks_like_package(&bytes) {
            return Err(Error::InvalidPackage(format!(
                "{} is not a ZIP container",
                request.source.display()
            )));
        }
        let mut package = WorkbookPackage::from_bytes(&bytes)?;
        check_cancelled(cancel)?;

        run.enter(RunPhase::BackingUp);
        run.status("Creating backup", 5.0);
        plan.prepare()?;
        write_backup(&plan.backup, &bytes)?;
        run.report.backup = Some(plan.backup.clone());
        run.log(format!("Backup: {}", plan.backup.display()));
        drop(bytes);

        let total = stages.len();
        let (start, end) = STAGE_PROGRESS;
        let mut skipped = false;
        for (index, stage) in stages.iter().enumerate() {
            check_cancelled(cancel)?;
            let kind = stage.kind();
            run.enter(RunPhase::Staging(index));
            run.sink.emit(ProgressEvent::StageStarted {
                index,
                total,
                stage: kind,
            });
            run.status(
                format!("{} ({}/{})", kind.label(), index + 1, total),
                start + (end - start) * index as f32 / total as f32,
            );

            let report = stage.apply(&mut package)?;
            skipped |= !report.skipped_assets.is_empty();
            run.log(format!("{}: {}", kind.label(), report.summary()));
            run.sink.emit(ProgressEvent::StageFinished {
                index,
                total,
                report: report.clone(),
            });
            run.report.stages.push(report);

            if self.config.checkpoints && index + 1 < total {
                let path = plan.checkpoint(index, kind);
                write_atomically(&package, &path)?;
                log::debug!("Checkpoint written to {}", path.display());
                run.checkpoints.push(path);
            }
        }

        check_cancelled(cancel)?;
        run.enter(RunPhase::Finalizing);
        run.status("Writing output", 95.0);
        let size = write_atomically(&package, &plan.output)?;
        run.report.output = Some(plan.output.clone());
        run.report.output_bytes = Some(size);
        run.log(format!("Output: {}", plan.output.display()));

        Ok(if skipped {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        })
    }
}
