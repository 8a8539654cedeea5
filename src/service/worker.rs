use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::PoseService;
use crate::{
    error::{PoseError, Result},
    pipeline::{OrtEngine, engine::InferenceEngine},
    types::Pose,
};

struct Job {
    path: PathBuf,
    /// Set by the caller once it stops waiting. The job still runs to
    /// completion and its result still reaches the cache.
    abandoned: Arc<AtomicBool>,
    reply: Sender<Result<Pose>>,
}

/// Single background thread draining inference jobs in submission order.
pub struct InferenceWorker<E: InferenceEngine = OrtEngine> {
    service: Arc<PoseService<E>>,
    jobs: Option<Sender<Job>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl<E: InferenceEngine> InferenceWorker<E> {
    pub fn start(service: Arc<PoseService<E>>) -> Self {
        let (jobs, job_rx) = crossbeam_channel::unbounded();
        let worker_service = Arc::clone(&service);
        let handle = thread::spawn(move || run_worker_loop(worker_service, job_rx));
        Self {
            service,
            jobs: Some(jobs),
            handle: Some(handle),
        }
    }

    pub fn service(&self) -> &PoseService<E> {
        &self.service
    }

    /// Waits at most `timeout` for the job. On timeout the job is abandoned
    /// rather than cancelled.
    pub fn infer_timeout(&self, path: &Path, timeout: Duration) -> Result<Pose> {
        let (reply, reply_rx) = crossbeam_channel::bounded(1);
        let abandoned = Arc::new(AtomicBool::new(false));
        let job = Job {
            path: path.to_path_buf(),
            abandoned: Arc::clone(&abandoned),
            reply,
        };
        self.jobs
            .as_ref()
            .ok_or_else(|| PoseError::Unclassified("inference worker is shut down".into()))?
            .send(job)
            .map_err(|_| PoseError::Unclassified("inference worker has stopped".into()))?;

        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::Release);
                log::warn!("inference for {} timed out after {timeout:?}", path.display());
                Err(PoseError::InferenceTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PoseError::Unclassified(
                "inference worker dropped the job".into(),
            )),
        }
    }
}

impl<E: InferenceEngine> Drop for InferenceWorker<E> {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("inference worker panicked");
            }
        }
    }
}

fn run_worker_loop<E: InferenceEngine>(service: Arc<PoseService<E>>, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        let result = service.infer(&job.path);
        if let Err(err) = &result {
            log::warn!("inference for {} failed: {err}", job.path.display());
        }
        if job.abandoned.load(Ordering::Acquire) {
            log::debug!(
                "finished abandoned job for {}, result kept in cache only",
                job.path.display()
            );
            continue;
        }
        let _ = job.reply.send(result);
    }
}
