use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use flowrun::data::Datum;
use flowrun::errors::Result;
use flowrun::exec::backend::{BackendContext, BackendSignal, ExecutionBackend};
use flowrun::job::core::{Job, JobKind};
use flowrun::job::state::JobState;

/// A fake backend that:
/// - records which jobs were "run"
/// - drives each job straight to `ExecutionDone` with synthetic output data
///   and signals `Finished` before `queue_job` returns.
///
/// Because the signal is sent synchronously, `pending()` is always zero and
/// the orchestrator picks results up from the residual channel drain.
pub struct FakeBackend {
    ctx: BackendContext,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeBackend {
    pub fn new(ctx: BackendContext, executed: Arc<Mutex<Vec<String>>>) -> Self {
        Self { ctx, executed }
    }
}

impl ExecutionBackend for FakeBackend {
    fn queue_job(&mut self, mut job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.ctx.signals.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            {
                let mut guard = executed.lock().unwrap();
                guard.push(job.id().to_string());
            }

            job.set_status(JobState::Queued)?;
            job.set_status(JobState::Running)?;

            // Inline jobs carry their values; everything else gets one
            // synthetic datum per declared output.
            match &job.kind {
                JobKind::Inline { data } => {
                    let inline: Vec<(String, Vec<Datum>)> = data
                        .iter()
                        .map(|(name, values)| {
                            let data = values.iter().map(|v| Datum::new(v, "Any")).collect();
                            (name.clone(), data)
                        })
                        .collect();
                    job.output_data.extend(inline);
                }
                _ => {
                    let outputs: Vec<_> = job
                        .outputs
                        .iter()
                        .filter(|o| !o.automatic)
                        .map(|o| (o.name.clone(), o.datatype.clone()))
                        .collect();
                    for (name, datatype) in outputs {
                        let value = format!("fake://{}/{}_0", job.id(), name);
                        job.output_data.insert(name, vec![Datum::new(value, datatype)]);
                    }
                }
            }

            job.set_status(JobState::ExecutionDone)?;
            tx.send(BackendSignal::Finished(Box::new(job)))
                .await
                .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }

    fn pending(&self) -> usize {
        0
    }
}
