use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use mio::{Token, Waker};

use crate::request::process_request_use_case::ProcessRequestUseCase;
use crate::request::response::error_bytes;

/// A request handed to the pool.
#[derive(Debug)]
pub struct Job {
    pub token: Token,
    pub sequence: u64,
    pub request: Vec<u8>,
}

/// A finished request on its way back to the event loop.
#[derive(Debug)]
pub struct Completion {
    pub token: Token,
    pub sequence: u64,
    pub response: Vec<u8>,
}

#[derive(Debug)]
pub enum SubmitError {
    /// The job queue is at capacity.
    Full(Job),
    /// Every worker has exited.
    Disconnected(Job),
}

/// Fixed set of threads running [`ProcessRequestUseCase`] off the event
/// loop.
///
/// Layout: `loop → bounded jobs → worker[i] → completions + wake → loop`
///
/// Each worker owns its own use case. After sending a completion the
/// worker wakes the poll so the loop drains it promptly.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    completions: Receiver<Completion>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns one worker per processor.
    pub fn start(
        processors: Vec<ProcessRequestUseCase>,
        queue_capacity: usize,
        waker: Arc<Waker>,
    ) -> std::io::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(queue_capacity);
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<Completion>();

        let mut handles = Vec::with_capacity(processors.len());
        for (index, processor) in processors.into_iter().enumerate() {
            let handle = spawn_worker(
                index,
                processor,
                job_rx.clone(),
                done_tx.clone(),
                waker.clone(),
            )?;
            handles.push(handle);
        }
        log::debug!("Started {} worker(s), queue capacity {queue_capacity}", handles.len());

        Ok(Self {
            jobs: Some(job_tx),
            completions: done_rx,
            handles,
        })
    }

    /// Queues a job without blocking.
    pub fn try_submit(&self, job: Job) -> Result<(), SubmitError> {
        let Some(jobs) = &self.jobs else {
            return Err(SubmitError::Disconnected(job));
        };
        jobs.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => SubmitError::Full(job),
            TrySendError::Disconnected(job) => SubmitError::Disconnected(job),
        })
    }

    /// Completions received so far, without blocking.
    pub fn try_completions(&self) -> crossbeam_channel::TryIter<'_, Completion> {
        self.completions.try_iter()
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Queued jobs not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.jobs.as_ref().map_or(0, |jobs| jobs.len())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the job channel ends each worker's receive loop.
        self.jobs.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Worker thread panicked during shutdown");
            }
        }
    }
}

fn spawn_worker(
    index: usize,
    mut processor: ProcessRequestUseCase,
    jobs: Receiver<Job>,
    completions: Sender<Completion>,
    waker: Arc<Waker>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("facedetect-worker-{index}"))
        .spawn(move || {
            for job in jobs {
                let response = execute_guarded(&mut processor, &job.request);
                let completion = Completion {
                    token: job.token,
                    sequence: job.sequence,
                    response,
                };
                if completions.send(completion).is_err() {
                    break;
                }
                if let Err(e) = waker.wake() {
                    log::error!("Worker {index} failed to wake event loop: {e}");
                }
            }
        })
}

/// Runs the use case, turning a panic into the `ERROR` sentinel.
pub fn execute_guarded(processor: &mut ProcessRequestUseCase, request: &[u8]) -> Vec<u8> {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.execute(request))) {
        Ok(response) => response,
        Err(_) => {
            log::error!("Request processing panicked");
            error_bytes()
        }
    }
}
