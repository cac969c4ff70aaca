//! Asynchronous compilation with per-batch aggregation.
//!
//! Every job runs on its own worker thread and reports back over a channel.
//! A batch shares one [`CompileLatch`]; the worker that brings it to zero
//! sends `BatchDone` after its own outcome, so the pipeline has applied every
//! outcome of the batch by the time it sees the batch finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::{CompileFailure, CompileRequest, CompiledShader, ShaderCompiler};
use crate::pass::PassKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

#[derive(Debug, Clone)]
pub struct CompileJob {
    pub key: PassKey,
    pub sequence: u64,
    pub request: CompileRequest,
}

#[derive(Debug)]
pub struct CompileOutcome {
    pub batch: BatchId,
    pub key: PassKey,
    pub sequence: u64,
    pub result: Result<CompiledShader, CompileFailure>,
}

#[derive(Debug)]
pub enum CompileEvent {
    Finished(CompileOutcome),
    BatchDone { batch: BatchId, success: bool },
}

/// Aggregated result of one batch, handed to its completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileReport {
    pub batch: BatchId,
    pub success: bool,
    pub elapsed: Duration,
    /// Pass ids (at completion time) whose compile failed.
    pub failed_passes: Vec<usize>,
}

pub type CompileCallback = Box<dyn FnOnce(&CompileReport)>;

/// Countdown shared by the jobs of one batch.
#[derive(Debug)]
pub struct CompileLatch {
    remaining: AtomicUsize,
    failed: AtomicBool,
}

impl CompileLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            failed: AtomicBool::new(false),
        }
    }

    /// Record one completion. Returns the batch success once the last
    /// completion arrives.
    pub fn complete(&self, ok: bool) -> Option<bool> {
        if !ok {
            self.failed.store(true, Ordering::Release);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            Some(!self.failed.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

pub(crate) struct PendingBatch {
    pub started: Instant,
    pub failed: Vec<PassKey>,
    pub on_done: Option<CompileCallback>,
}

pub struct CompileOrchestrator {
    compiler: Arc<dyn ShaderCompiler>,
    tx: Sender<CompileEvent>,
    rx: Receiver<CompileEvent>,
    next_batch: u64,
    pending: HashMap<BatchId, PendingBatch>,
}

impl CompileOrchestrator {
    pub fn new(compiler: Arc<dyn ShaderCompiler>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            compiler,
            tx,
            rx,
            next_batch: 0,
            pending: HashMap::new(),
        }
    }

    pub fn compiler(&self) -> &Arc<dyn ShaderCompiler> {
        &self.compiler
    }

    /// Run one request on the calling thread.
    pub fn compile_now(&self, request: &CompileRequest) -> Result<CompiledShader, CompileFailure> {
        self.compiler.compile(request)
    }

    /// Issue one asynchronous compile per job. `on_done` runs from
    /// [`crate::pipeline::Pipeline::poll_compiles`] after the last job
    /// finishes; an empty batch finishes on the next poll.
    pub fn submit(&mut self, jobs: Vec<CompileJob>, on_done: CompileCallback) -> BatchId {
        let batch = BatchId(self.next_batch);
        self.next_batch += 1;
        self.pending.insert(
            batch,
            PendingBatch {
                started: Instant::now(),
                failed: Vec::new(),
                on_done: Some(on_done),
            },
        );

        if jobs.is_empty() {
            let _ = self.tx.send(CompileEvent::BatchDone {
                batch,
                success: true,
            });
            return batch;
        }

        debug!(batch = batch.0, jobs = jobs.len(), "[compile] submitting batch");
        let latch = Arc::new(CompileLatch::new(jobs.len()));
        for job in jobs {
            let compiler = Arc::clone(&self.compiler);
            let tx = self.tx.clone();
            let job_latch = Arc::clone(&latch);
            let (key, sequence) = (job.key, job.sequence);
            let spawned = thread::Builder::new()
                .name(format!("compile-{}-{}", batch.0, key.0))
                .spawn(move || run_job(compiler, tx, job_latch, batch, job));
            if let Err(e) = spawned {
                warn!("[compile] failed to spawn compile worker: {e}");
                self.fail_job(&latch, batch, key, sequence, &format!("compile worker could not start: {e}"));
            }
        }
        batch
    }

    /// Report a job that never ran as a failed completion, keeping the latch
    /// balanced and the pass status in step with its latest request.
    fn fail_job(&self, latch: &CompileLatch, batch: BatchId, key: PassKey, sequence: u64, reason: &str) {
        let _ = self.tx.send(CompileEvent::Finished(CompileOutcome {
            batch,
            key,
            sequence,
            result: Err(CompileFailure {
                log: format!("ERROR: 0:0:{reason}\n"),
                user_line_offset: 0,
            }),
        }));
        if let Some(success) = latch.complete(false) {
            let _ = self.tx.send(CompileEvent::BatchDone { batch, success });
        }
    }

    pub fn try_next(&self) -> Option<CompileEvent> {
        self.rx.try_recv().ok()
    }

    /// Block until the next event. Only meaningful while batches are pending.
    pub fn next_blocking(&self) -> Option<CompileEvent> {
        if self.pending.is_empty() {
            return None;
        }
        self.rx.recv().ok()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn record_failure(&mut self, batch: BatchId, key: PassKey) {
        if let Some(pending) = self.pending.get_mut(&batch) {
            pending.failed.push(key);
        }
    }

    pub(crate) fn finish(&mut self, batch: BatchId) -> Option<PendingBatch> {
        self.pending.remove(&batch)
    }
}

fn run_job(
    compiler: Arc<dyn ShaderCompiler>,
    tx: Sender<CompileEvent>,
    latch: Arc<CompileLatch>,
    batch: BatchId,
    job: CompileJob,
) {
    let result = compiler.compile(&job.request);
    let ok = result.is_ok();
    let _ = tx.send(CompileEvent::Finished(CompileOutcome {
        batch,
        key: job.key,
        sequence: job.sequence,
        result,
    }));
    if let Some(success) = latch.complete(ok) {
        let _ = tx.send(CompileEvent::BatchDone { batch, success });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_reports_once_at_zero() {
        let latch = CompileLatch::new(3);
        assert_eq!(latch.complete(true), None);
        assert_eq!(latch.complete(false), None);
        assert_eq!(latch.remaining(), 1);
        assert_eq!(latch.complete(true), Some(false));
    }

    #[test]
    fn latch_success_when_all_ok() {
        let latch = CompileLatch::new(2);
        assert_eq!(latch.complete(true), None);
        assert_eq!(latch.complete(true), Some(true));
    }

    struct Unused;

    impl ShaderCompiler for Unused {
        fn compile(&self, _: &CompileRequest) -> Result<CompiledShader, CompileFailure> {
            unreachable!("jobs in this test never run")
        }
    }

    #[test]
    fn job_that_never_ran_reports_failure_then_batch_done() {
        let orchestrator = CompileOrchestrator::new(Arc::new(Unused));
        let latch = CompileLatch::new(1);
        orchestrator.fail_job(&latch, BatchId(3), PassKey(9), 4, "no threads");

        match orchestrator.try_next() {
            Some(CompileEvent::Finished(outcome)) => {
                assert_eq!(outcome.batch, BatchId(3));
                assert_eq!(outcome.key, PassKey(9));
                assert_eq!(outcome.sequence, 4);
                let failure = outcome.result.unwrap_err();
                assert!(failure.log.contains("no threads"));
            }
            other => panic!("expected a finished event, got {other:?}"),
        }
        assert!(matches!(
            orchestrator.try_next(),
            Some(CompileEvent::BatchDone { batch: BatchId(3), success: false })
        ));
        assert!(orchestrator.try_next().is_none());
    }

    #[test]
    fn latch_is_shared_across_threads() {
        let latch = Arc::new(CompileLatch::new(16));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.complete(i != 7))
            })
            .collect();
        let finals: Vec<bool> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(finals, vec![false]);
    }
}
