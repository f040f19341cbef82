//! Background worker running requests one at a time.

use crate::orchestrator::{panic_message, Orchestrator};
use crate::progress::{CancelToken, ProgressSink};
use slimmer_core::{Error, ProgressEvent, Result, RunPhase, RunReport, RunRequest, SlimConfig};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

struct Job {
    request: RunRequest,
    events: Sender<ProgressEvent>,
    cancel: CancelToken,
}

/// A single worker thread with a job queue.
///
/// Requests submitted while a run is in flight wait their turn. Dropping the
/// worker lets queued runs finish and then joins the thread.
pub struct PipelineWorker {
    jobs: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    pub fn start(config: SlimConfig) -> Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        let orchestrator = Orchestrator::new(config);

        let thread = thread::Builder::new()
            .name("slimmer-worker".to_string())
            .spawn(move || {
                for job in queue {
                    let report = run_guarded(&orchestrator, &job);
                    job.events.emit(ProgressEvent::Finished(Box::new(report)));
                }
                log::debug!("Worker queue closed");
            })?;

        Ok(Self {
            jobs: Some(jobs),
            thread: Some(thread),
        })
    }

    /// Queue a request and return a handle to follow it.
    pub fn submit(&self, request: RunRequest) -> Result<RunHandle> {
        let (events, receiver) = mpsc::channel();
        let cancel = CancelToken::new();
        let source = request.source.clone();

        let jobs = self.jobs.as_ref().ok_or_else(stopped)?;
        jobs.send(Job {
            request,
            events,
            cancel: cancel.clone(),
        })
        .map_err(|_| stopped())?;

        Ok(RunHandle {
            source,
            events: receiver,
            cancel,
        })
    }

    /// Finish queued runs and stop the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stopped() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "worker has stopped"))
}

/// Run a job. Stage panics are reported by the orchestrator itself; this
/// only guards the bookkeeping around them.
fn run_guarded(orchestrator: &Orchestrator, job: &Job) -> RunReport {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        orchestrator.run(&job.request, &job.events, &job.cancel)
    }));

    match outcome {
        Ok(report) => report,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("Run of {} panicked: {}", job.request.source.display(), message);

            let mut report = RunReport::new(job.request.source.clone());
            report.error = Some(format!("internal error: {}", message));
            report.last_phase = RunPhase::Failed;
            report
        }
    }
}

/// Follows one submitted run.
#[derive(Debug)]
pub struct RunHandle {
    source: PathBuf,
    events: Receiver<ProgressEvent>,
    cancel: CancelToken,
}

impl RunHandle {
    /// Progress events, ending with [`ProgressEvent::Finished`].
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// Ask the run to stop at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the run finishes.
    pub fn wait(self) -> RunReport {
        self.wait_with(|_| {})
    }

    /// Block until the run finishes, passing every intermediate event to
    /// `on_event`.
    pub fn wait_with<F>(self, mut on_event: F) -> RunReport
    where
        F: FnMut(&ProgressEvent),
    {
        for event in self.events.iter() {
            match event {
                ProgressEvent::Finished(report) => return *report,
                other => on_event(&other),
            }
        }

        let mut report = RunReport::new(self.source);
        report.error = Some("worker stopped before the run finished".to_string());
        report.last_phase = RunPhase::Failed;
        report
    }
}
