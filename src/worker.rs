//! Extraction worker pool
//!
//! CPU-bound inference never runs on a connection thread. Jobs go through a
//! bounded queue to a fixed set of worker threads that share the single
//! extractor instance. Each job carries its own reply channel and a cancel
//! flag; dropping the [`ExtractionTicket`] cancels the job, and a worker
//! skips cancelled jobs instead of running them.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use image::DynamicImage;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ExtractionSection;
use crate::embeddings::ImageEmbedder;
use crate::error::SearchError;

type SharedEmbedder = Arc<Mutex<Box<dyn ImageEmbedder>>>;
type Reply = std::result::Result<Vec<f32>, SearchError>;

struct Job {
    image: DynamicImage,
    reply: Sender<Reply>,
    cancelled: Arc<AtomicBool>,
}

/// Pool counters
#[derive(Debug, Default)]
struct PoolStats {
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    skipped: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Jobs dropped because their ticket was gone before a worker got to them
    pub skipped: u64,
}

pub struct ExtractionPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
    timeout: Duration,
    dimension: usize,
    model_name: String,
}

impl ExtractionPool {
    /// Start `settings.workers` threads around a single extractor
    pub fn new(embedder: Box<dyn ImageEmbedder>, settings: &ExtractionSection) -> Result<Self> {
        let dimension = embedder.dimension();
        let model_name = embedder.model_name().to_string();
        let embedder: SharedEmbedder = Arc::new(Mutex::new(embedder));
        let stats = Arc::new(PoolStats::default());

        let (sender, receiver) = bounded::<Job>(settings.queue_capacity.max(1));

        let mut workers = Vec::new();
        for worker_id in 0..settings.workers.max(1) {
            let receiver = receiver.clone();
            let embedder = Arc::clone(&embedder);
            let stats = Arc::clone(&stats);
            let handle = thread::Builder::new()
                .name(format!("extract-{worker_id}"))
                .spawn(move || worker_loop(worker_id, receiver, embedder, stats))
                .context("Failed to spawn extraction worker")?;
            workers.push(handle);
        }

        tracing::info!(
            workers = workers.len(),
            queue = settings.queue_capacity,
            timeout_ms = settings.timeout_ms,
            model = %model_name,
            "extraction pool started"
        );

        Ok(Self {
            sender: Some(sender),
            workers,
            stats,
            timeout: settings.timeout(),
            dimension,
            model_name,
        })
    }

    /// Queue an image, waiting at most `wait` for room in the queue
    pub fn submit(&self, image: DynamicImage, wait: Duration) -> Result<ExtractionTicket, SearchError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SearchError::InferenceFailure("extraction pool is shut down".into()))?;

        let (reply, receiver) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let job = Job {
            image,
            reply,
            cancelled: Arc::clone(&cancelled),
        };

        match sender.send_timeout(job, wait) {
            Ok(()) => Ok(ExtractionTicket {
                receiver,
                cancelled,
            }),
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(waited_ms = wait.as_millis() as u64, "extraction queue full");
                Err(SearchError::ProcessingTimeout(wait))
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(SearchError::InferenceFailure(
                "extraction workers are gone".into(),
            )),
        }
    }

    /// Submit and wait, bounded by the pool timeout (queueing included)
    pub fn extract(&self, image: DynamicImage) -> Result<Vec<f32>, SearchError> {
        let deadline = Instant::now() + self.timeout;
        let ticket = self.submit(image, self.timeout)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        ticket.wait(remaining).map_err(|e| match e {
            SearchError::ProcessingTimeout(_) => SearchError::ProcessingTimeout(self.timeout),
            other => other,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            panicked: self.stats.panicked.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ExtractionPool {
    fn drop(&mut self) {
        // Closing the queue ends every worker loop
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("extraction worker exited abnormally");
            }
        }
    }
}

/// Handle to one queued extraction
///
/// Dropping the ticket before the reply arrives cancels the job.
#[derive(Debug)]
pub struct ExtractionTicket {
    receiver: Receiver<Reply>,
    cancelled: Arc<AtomicBool>,
}

impl ExtractionTicket {
    /// Block until the embedding is ready or `timeout` elapses
    pub fn wait(self, timeout: Duration) -> Result<Vec<f32>, SearchError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(RecvTimeoutError::Timeout) => Err(SearchError::ProcessingTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(SearchError::InferenceFailure(
                "extraction worker dropped the job".into(),
            )),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl Drop for ExtractionTicket {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<Job>,
    embedder: SharedEmbedder,
    stats: Arc<PoolStats>,
) {
    for job in receiver.iter() {
        if job.cancelled.load(Ordering::Acquire) {
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(worker_id, "skipping cancelled extraction");
            continue;
        }

        let started = Instant::now();
        let outcome = {
            let mut embedder = embedder.lock();
            panic::catch_unwind(AssertUnwindSafe(|| embedder.embed(&job.image)))
        };

        let reply = match outcome {
            Ok(Ok(vector)) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    worker_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "extraction finished"
                );
                Ok(vector)
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker_id, error = %format!("{:#}", e), "extraction failed");
                Err(SearchError::InferenceFailure(format!("{:#}", e)))
            }
            Err(payload) => {
                stats.panicked.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(payload.as_ref());
                tracing::error!(worker_id, panic = %message, "extractor panicked");
                Err(SearchError::InferenceFailure(format!("extractor panicked: {message}")))
            }
        };

        // The ticket may be gone (timed out); nobody is waiting then
        let _ = job.reply.send(reply);
    }
    tracing::debug!(worker_id, "extraction worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Returns a fixed vector, counting calls; optionally slow or panicking
    struct FakeEmbedder {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        panic_on_first: bool,
    }

    impl FakeEmbedder {
        fn boxed(calls: &Arc<AtomicUsize>) -> Box<dyn ImageEmbedder> {
            Box::new(Self {
                calls: Arc::clone(calls),
                delay: Duration::ZERO,
                panic_on_first: false,
            })
        }
    }

    impl ImageEmbedder for FakeEmbedder {
        fn embed(&mut self, _image: &DynamicImage) -> Result<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_first && call == 0 {
                panic!("backbone exploded");
            }
            thread::sleep(self.delay);
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    struct FailingEmbedder;

    impl ImageEmbedder for FailingEmbedder {
        fn embed(&mut self, _image: &DynamicImage) -> Result<Vec<f32>> {
            anyhow::bail!("output tensor missing")
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn settings(timeout_ms: u64) -> ExtractionSection {
        ExtractionSection {
            workers: 1,
            queue_capacity: 4,
            timeout_ms,
        }
    }

    fn image() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    #[test]
    fn test_extract_returns_vector() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = ExtractionPool::new(FakeEmbedder::boxed(&calls), &settings(5_000)).unwrap();

        assert_eq!(pool.extract(image()).unwrap(), vec![1.0, 0.0, 0.0]);
        assert_eq!(pool.dimension(), 3);
        assert_eq!(pool.model_name(), "fake");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_becomes_inference_failure_and_pool_survives() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Box::new(FakeEmbedder {
            calls: Arc::clone(&calls),
            delay: Duration::ZERO,
            panic_on_first: true,
        });
        let pool = ExtractionPool::new(embedder, &settings(5_000)).unwrap();

        let err = pool.extract(image()).unwrap_err();
        assert!(matches!(err, SearchError::InferenceFailure(_)));
        assert_eq!(err.status(), 500);

        assert!(pool.extract(image()).is_ok());
        assert_eq!(pool.stats().panicked, 1);
        assert_eq!(pool.stats().completed, 1);
    }

    #[test]
    fn test_embedder_error_is_inference_failure() {
        let pool = ExtractionPool::new(Box::new(FailingEmbedder), &settings(5_000)).unwrap();
        match pool.extract(image()) {
            Err(SearchError::InferenceFailure(msg)) => assert!(msg.contains("output tensor")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_slow_extraction_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Box::new(FakeEmbedder {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(400),
            panic_on_first: false,
        });
        let pool = ExtractionPool::new(embedder, &settings(50)).unwrap();

        let err = pool.extract(image()).unwrap_err();
        assert!(matches!(err, SearchError::ProcessingTimeout(d) if d == Duration::from_millis(50)));
        assert_eq!(err.kind(), "processing_failed");
    }

    #[test]
    fn test_full_queue_times_out_on_submit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Box::new(FakeEmbedder {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(300),
            panic_on_first: false,
        });
        let pool = ExtractionPool::new(
            embedder,
            &ExtractionSection {
                workers: 1,
                queue_capacity: 1,
                timeout_ms: 5_000,
            },
        )
        .unwrap();
        let wait = Duration::from_secs(5);

        // Worker busy with the first job, second job fills the queue
        let running = pool.submit(image(), wait).unwrap();
        while calls.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        let queued = pool.submit(image(), wait).unwrap();

        let short = Duration::from_millis(50);
        let err = pool.submit(image(), short).unwrap_err();
        assert!(matches!(err, SearchError::ProcessingTimeout(d) if d == short));
        assert_eq!(err.status(), 500);

        drop(queued);
        running.wait(wait).unwrap();
    }

    #[test]
    fn test_dropped_ticket_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let embedder = Box::new(FakeEmbedder {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(200),
            panic_on_first: false,
        });
        let pool = ExtractionPool::new(embedder, &settings(5_000)).unwrap();
        let wait = Duration::from_secs(5);

        // First job occupies the single worker; second is cancelled while queued
        let busy = pool.submit(image(), wait).unwrap();
        let cancelled = pool.submit(image(), wait).unwrap();
        drop(cancelled);

        busy.wait(wait).unwrap();
        pool.extract(image()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats().skipped, 1);
    }

    #[test]
    fn test_drop_joins_workers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pool = ExtractionPool::new(
            FakeEmbedder::boxed(&calls),
            &ExtractionSection {
                workers: 3,
                queue_capacity: 8,
                timeout_ms: 5_000,
            },
        )
        .unwrap();
        assert_eq!(pool.worker_count(), 3);
        pool.extract(image()).unwrap();
        drop(pool);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
