//! Issuing compile batches and applying their completions.

use tracing::{debug, info, warn};

use super::Pipeline;
use crate::backend::GraphicsBackend;
use crate::compiler::orchestrator::{BatchId, CompileCallback, CompileEvent, CompileJob, CompileReport};
use crate::error::PassError;
use crate::pass::PassType;

impl<B: GraphicsBackend> Pipeline<B> {
    /// Source of every common pass, in pass order.
    pub(crate) fn common_sources(&self) -> Vec<String> {
        self.passes
            .iter()
            .filter(|p| p.pass_type() == PassType::Common)
            .map(|p| p.source().to_string())
            .collect()
    }

    /// Compile every pass asynchronously. `on_done` runs once, from
    /// [`Pipeline::poll_compiles`] or [`Pipeline::wait_for_compiles`], after
    /// every result of the batch has been applied.
    pub fn compile_all(&mut self, prevent_cache: bool, on_done: impl FnOnce(&CompileReport) + 'static) -> BatchId {
        let ids: Vec<usize> = (0..self.passes.len()).collect();
        self.issue_compiles(&ids, prevent_cache, Box::new(on_done))
    }

    /// Compile the given passes asynchronously. Ids are validated up front;
    /// duplicates compile once.
    pub fn compile_subset(
        &mut self,
        ids: &[usize],
        prevent_cache: bool,
        on_done: impl FnOnce(&CompileReport) + 'static,
    ) -> Result<BatchId, PassError> {
        if let Some(bad) = ids.iter().find(|id| **id >= self.passes.len()) {
            return Err(PassError::NoSuchPass(*bad));
        }
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(self.issue_compiles(&ids, prevent_cache, Box::new(on_done)))
    }

    /// Compile only the passes edited since their last compile.
    pub fn compile_dirty(&mut self, prevent_cache: bool, on_done: impl FnOnce(&CompileReport) + 'static) -> BatchId {
        let ids: Vec<usize> = self
            .passes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_dirty())
            .map(|(i, _)| i)
            .collect();
        self.issue_compiles(&ids, prevent_cache, Box::new(on_done))
    }

    fn issue_compiles(&mut self, ids: &[usize], prevent_cache: bool, on_done: CompileCallback) -> BatchId {
        let prevent_cache = prevent_cache || self.config.prevent_cache;
        let common = self.common_sources();
        let mut jobs = Vec::with_capacity(ids.len());
        for &id in ids {
            let pass = &mut self.passes[id];
            if pass.pass_type() == PassType::Common {
                pass.mark_common_compiled();
                continue;
            }
            let (sequence, request) = pass.compile_request(&common, prevent_cache);
            jobs.push(CompileJob {
                key: pass.key(),
                sequence,
                request,
            });
        }
        info!(passes = ids.len(), jobs = jobs.len(), prevent_cache, "[compile] issuing batch");
        self.orchestrator.submit(jobs, on_done)
    }

    /// Compile one pass on the calling thread and apply the result.
    pub(crate) fn compile_pass_now(&mut self, id: usize) -> Result<(), PassError> {
        let prevent_cache = self.config.prevent_cache;
        let common = self.common_sources();
        let pass = self.passes.get_mut(id).ok_or(PassError::NoSuchPass(id))?;
        if pass.pass_type() == PassType::Common {
            pass.mark_common_compiled();
            return Ok(());
        }
        let (sequence, request) = pass.compile_request(&common, prevent_cache);
        let result = self.orchestrator.compile_now(&request);
        if let Err(failure) = &result {
            warn!(id, "[compile] pass failed to compile: {}", failure.log.trim_end());
        }
        let runnable = pass.apply_compile_result(&mut self.backend, sequence, result);
        if runnable == Some(true) && pass.pass_type() == PassType::Sound {
            self.sound.rewind();
        }
        Ok(())
    }

    /// Apply every compile event that has already arrived, without blocking.
    /// Returns the number of batches that finished.
    pub fn poll_compiles(&mut self) -> usize {
        let mut finished = 0;
        while let Some(event) = self.orchestrator.try_next() {
            if self.handle_compile_event(event) {
                finished += 1;
            }
        }
        finished
    }

    /// Block until every outstanding batch has finished.
    pub fn wait_for_compiles(&mut self) -> usize {
        let mut finished = self.poll_compiles();
        while self.orchestrator.has_pending() {
            let Some(event) = self.orchestrator.next_blocking() else {
                break;
            };
            if self.handle_compile_event(event) {
                finished += 1;
            }
        }
        finished
    }

    pub fn has_pending_compiles(&self) -> bool {
        self.orchestrator.has_pending()
    }

    fn handle_compile_event(&mut self, event: CompileEvent) -> bool {
        match event {
            CompileEvent::Finished(outcome) => {
                let (batch, key) = (outcome.batch, outcome.key);
                // Program creation can still fail after the compiler succeeded.
                let mut failed = outcome.result.is_err();
                match self.passes.iter_mut().find(|p| p.key() == key) {
                    Some(pass) => match pass.apply_compile_result(&mut self.backend, outcome.sequence, outcome.result) {
                        Some(true) => {
                            if pass.pass_type() == PassType::Sound {
                                self.sound.rewind();
                            }
                        }
                        Some(false) => {
                            failed = true;
                            warn!(pass = pass.name(), "[compile] pass failed to compile: {}", pass.compile_error_text().trim_end());
                        }
                        None => {}
                    },
                    None => debug!(key = key.0, "[compile] completion for a removed pass"),
                }
                if failed {
                    self.orchestrator.record_failure(batch, key);
                }
                false
            }
            CompileEvent::BatchDone { batch, success } => {
                let Some(pending) = self.orchestrator.finish(batch) else {
                    return false;
                };
                let success = success && pending.failed.is_empty();
                let elapsed = pending.started.elapsed();
                self.compilation_elapsed = elapsed;
                let failed_passes = pending
                    .failed
                    .iter()
                    .filter_map(|key| self.pass_index(*key))
                    .collect();
                let report = CompileReport {
                    batch,
                    success,
                    elapsed,
                    failed_passes,
                };
                if success {
                    info!(batch = batch.0, elapsed_ms = elapsed.as_millis() as u64, "[compile] batch finished");
                } else {
                    warn!(batch = batch.0, failed = ?report.failed_passes, "[compile] batch finished with errors");
                }
                if let Some(on_done) = pending.on_done {
                    on_done(&report);
                }
                true
            }
        }
    }
}
