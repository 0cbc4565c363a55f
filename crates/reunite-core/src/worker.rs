//! Extraction on a dedicated thread with a per-call deadline.
//!
//! Face detection cost grows with image size and face count, so callers
//! that serve requests wrap their extractor in an [`ExtractionWorker`]. A
//! call that misses its deadline returns [`ExtractError::TimedOut`]. The
//! inference itself cannot be interrupted and finishes in the background.
//! A later call waits for it, and its own deadline starts only once its job
//! is picked up, so time spent queued is never charged to it.

use crate::extractor::{ExtractError, Extractor};
use crate::types::ExtractionResult;
use std::sync::mpsc;
use std::time::Duration;

/// Default upper bound on one extraction.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

enum Reply {
    Started,
    Done(Result<ExtractionResult, ExtractError>),
}

struct Job {
    image: Vec<u8>,
    reply: mpsc::Sender<Reply>,
}

/// Handle to the extraction thread. Dropping it stops the thread once the
/// queued jobs drain.
pub struct ExtractionWorker {
    tx: mpsc::Sender<Job>,
    timeout: Duration,
}

impl ExtractionWorker {
    /// Move `extractor` onto a new OS thread.
    pub fn spawn<E>(extractor: E, timeout: Duration) -> std::io::Result<Self>
    where
        E: Extractor + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job>();

        std::thread::Builder::new()
            .name("reunite-extract".into())
            .spawn(move || {
                tracing::debug!("extraction worker started");
                while let Ok(job) = rx.recv() {
                    if job.reply.send(Reply::Started).is_err() {
                        continue;
                    }
                    let result = extractor.extract(&job.image);
                    // The caller may already have given up on this job.
                    let _ = job.reply.send(Reply::Done(result));
                }
                tracing::debug!("extraction worker exiting");
            })?;

        Ok(Self { tx, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Extractor for ExtractionWorker {
    fn extract(&self, image: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let (reply, replies) = mpsc::channel();
        self.tx
            .send(Job {
                image: image.to_vec(),
                reply,
            })
            .map_err(|_| ExtractError::WorkerStopped)?;

        // Wait out any earlier job still running; the deadline covers only ours.
        match replies.recv() {
            Ok(Reply::Started) => {}
            Ok(Reply::Done(result)) => return result,
            Err(_) => return Err(ExtractError::WorkerStopped),
        }

        match replies.recv_timeout(self.timeout) {
            Ok(Reply::Done(result)) => result,
            Ok(Reply::Started) => Err(ExtractError::WorkerStopped),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout = ?self.timeout, bytes = image.len(), "extraction timed out");
                Err(ExtractError::TimedOut(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExtractError::WorkerStopped),
        }
    }
}
