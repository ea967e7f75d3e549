//! Parallel batch processing
//!
//! Each worker thread owns one `OcrPipeline`, so no pipeline is ever used
//! by two threads at once. Jobs go out over one channel and results come
//! back over another, tagged with their submission index.

use crossbeam_channel::unbounded;
use tracing::{debug, info};

use super::error::{CodecError, StageResult};
use super::{OcrOutput, OcrPipeline};

/// Pool of independent pipelines processing encoded images in parallel
pub struct BatchRunner {
    pipelines: Vec<OcrPipeline>,
}

impl BatchRunner {
    /// Runner over pre-built pipelines, one worker each
    pub fn new(pipelines: Vec<OcrPipeline>) -> Self {
        Self { pipelines }
    }

    /// Build `workers` pipelines with `factory`
    pub fn build<F>(workers: usize, mut factory: F) -> StageResult<Self>
    where
        F: FnMut() -> StageResult<OcrPipeline>,
    {
        let pipelines = (0..workers.max(1))
            .map(|_| factory())
            .collect::<StageResult<Vec<_>>>()?;
        info!("Batch runner ready with {} workers", pipelines.len());
        Ok(Self::new(pipelines))
    }

    /// Number of worker pipelines
    pub fn workers(&self) -> usize {
        self.pipelines.len()
    }

    /// Process every image; results are in submission order
    pub fn run<B>(&mut self, images: &[B]) -> Vec<Result<OcrOutput, CodecError>>
    where
        B: AsRef<[u8]> + Sync,
    {
        let (job_tx, job_rx) = unbounded::<(usize, &B)>();
        let (result_tx, result_rx) = unbounded();

        for job in images.iter().enumerate() {
            // Receiver lives until the scope below ends
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for (worker, pipeline) in self.pipelines.iter_mut().enumerate() {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    let mut handled = 0usize;
                    for (index, data) in job_rx.iter() {
                        let result = pipeline.process_bytes(data.as_ref());
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                        handled += 1;
                    }
                    debug!("Worker {} processed {} images", worker, handled);
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<Option<Result<OcrOutput, CodecError>>> =
            (0..images.len()).map(|_| None).collect();
        for (index, result) in result_rx.iter() {
            results[index] = Some(result);
        }

        results
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(CodecError::InvalidInput)))
            .collect()
    }
}
