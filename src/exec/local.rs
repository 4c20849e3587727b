// src/exec/local.rs

//! In-process execution backend.
//!
//! Each queued job gets its own tokio task. The task runs the (synchronous)
//! tool interface, then reports back over the signal channel. The pending
//! counter is decremented only after the completion signal has been sent, so
//! the orchestrator's drain loop cannot observe zero pending jobs with a
//! signal still unsent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::exec::backend::{BackendContext, BackendSignal, ExecutionBackend};
use crate::job::core::{Job, JobKind};
use crate::job::payload::Payload;
use crate::job::state::JobState;
use crate::tool::{ExecutionContext, InterfaceResult};
use crate::version;

/// Stand-in interface for inline jobs; `Job::execute` never calls it.
fn inline_noop(_payload: &Payload, _ctx: &ExecutionContext) -> Result<InterfaceResult> {
    Ok(InterfaceResult::default())
}

pub struct LocalBackend {
    ctx: BackendContext,
    pending: Arc<AtomicUsize>,
}

impl LocalBackend {
    pub fn new(ctx: BackendContext) -> Self {
        Self {
            ctx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ExecutionBackend for LocalBackend {
    fn queue_job(&mut self, mut job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !job.hold_jobs.is_empty() {
                job.set_status(JobState::Hold)?;
            }
            job.set_status(JobState::Queued)?;

            self.pending.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(run_job(job, self.ctx.clone(), self.pending.clone()));
            Ok(())
        })
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run_job(mut job: Job, ctx: BackendContext, pending: Arc<AtomicUsize>) {
    let signals = ctx.signals.clone();

    if !ctx.executing.load(Ordering::SeqCst) {
        debug!(job = %job.id(), "run aborted; cancelling queued job");
        if let Err(e) = job.set_status(JobState::Cancelled) {
            warn!(job = %job.id(), error = %e, "failed to mark job cancelled");
        }
        let _ = signals.send(BackendSignal::Cancelled(Box::new(job))).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    if let Err(e) = job.set_status(JobState::Running) {
        warn!(job = %job.id(), error = %e, "failed to mark job running");
    }
    let _ = signals
        .send(BackendSignal::StatusChanged(
            job.id().to_string(),
            JobState::Running,
        ))
        .await;

    // Jobs consuming failed upstream data are resolved without running the
    // tool; the failure chain continues through their own annotations.
    let upstream_failures = job
        .input_args
        .values()
        .flat_map(|arg| arg.data.values())
        .flatten()
        .filter(|datum| datum.is_failed())
        .count();
    if upstream_failures > 0 {
        job.errors.push(format!(
            "{upstream_failures} input value(s) carry upstream failures; not executing"
        ));
        if let Err(e) = job.set_status(JobState::ExecutionFailed) {
            warn!(job = %job.id(), error = %e, "failed to mark job failed");
        }
        let _ = signals.send(BackendSignal::Finished(Box::new(job))).await;
        pending.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    if let Some(store) = &ctx.result_store {
        if let Some(record) = job.get_result(store) {
            debug!(job = %job.id(), "reusing stored result");
            job.output_data = record.output_data;
            job.hash_results();
            if let Err(e) = job.set_status(JobState::ExecutionDone) {
                warn!(job = %job.id(), error = %e, "failed to mark cached job done");
            }
            let _ = signals.send(BackendSignal::Finished(Box::new(job))).await;
            pending.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    }

    let exec_ctx = ExecutionContext {
        work_dir: ctx.work_root.join(job.id()),
        engine_version: version::ENGINE_VERSION.to_string(),
        channel: ctx.channel,
        datatypes: ctx.datatypes.clone(),
    };

    // Inline jobs carry their result and never invoke a real tool, so they
    // need no registration.
    let outcome = if matches!(job.kind, JobKind::Inline { .. }) {
        job.execute(&inline_noop, &exec_ctx)
    } else {
        match ctx.tools.get(&job.tool_name, &job.tool_version) {
            Some(tool) => job.execute(tool.as_ref(), &exec_ctx),
            None => Err(EngineError::ConfigError(format!(
                "no tool registered for '{}/{}'",
                job.tool_name, job.tool_version
            ))),
        }
    };

    match outcome {
        Ok(_) => {
            if let Err(e) = job.set_status(JobState::ExecutionDone) {
                warn!(job = %job.id(), error = %e, "failed to mark job done");
            }
            if let Some(store) = &ctx.result_store {
                match job.create_payload() {
                    Ok(payload) => {
                        if let Err(e) = store.save(&job.to_record(payload)) {
                            warn!(job = %job.id(), error = %e, "failed to persist job result");
                        }
                    }
                    Err(e) => {
                        warn!(job = %job.id(), error = %e, "could not snapshot payload for persistence")
                    }
                }
            }
        }
        Err(e) => {
            debug!(job = %job.id(), error = %e, "job execution failed");
            job.errors.push(e.to_string());
            if let Err(e) = job.set_status(JobState::ExecutionFailed) {
                warn!(job = %job.id(), error = %e, "failed to mark job failed");
            }
        }
    }

    let _ = signals.send(BackendSignal::Finished(Box::new(job))).await;
    pending.fetch_sub(1, Ordering::SeqCst);
}
