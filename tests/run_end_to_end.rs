// tests/run_end_to_end.rs
//
// Full runs through NetworkRun with the local backend.

use std::collections::BTreeMap;
use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flowrun::data::{DatatypeRegistry, Datum};
use flowrun::errors::EngineError;
use flowrun::exec::backend::{BackendContext, BackendRegistry, BackendSignal, ExecutionBackend};
use flowrun::job::core::{Job, JobKind};
use flowrun::job::payload::{ArgumentValue, Payload};
use flowrun::job::state::JobState;
use flowrun::network::node::NetworkDefinition;
use flowrun::network::run::{NetworkRun, RunOptions};
use flowrun::tool::{ExecutionContext, InterfaceResult, ToolRegistry};

use flowrun_test_utils::builders::{NetworkBuilder, NodeBuilder, source_binding};
use flowrun_test_utils::fake_backend::FakeBackend;
use flowrun_test_utils::tools::{echo_tool, failing_for_value};
use flowrun_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn chain() -> NetworkDefinition {
    NetworkBuilder::new("net")
        .node(NodeBuilder::source("A").build())
        .node(NodeBuilder::step("B", "transform").after("A").build())
        .node(NodeBuilder::sink("C").after("B").build())
        .build()
}

fn three_samples() -> BTreeMap<String, BTreeMap<String, Vec<String>>> {
    BTreeMap::from([(
        "A".to_string(),
        source_binding(&[("s1", &["alpha"]), ("s2", &["beta"]), ("s3", &["gamma"])]),
    )])
}

fn sink_binding() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "C".to_string(),
        "/out/{sample_id}_{cardinality}.dat".to_string(),
    )])
}

fn standard_tools() -> Arc<ToolRegistry> {
    let mut tools = ToolRegistry::new();
    tools.register("transform", "1.0", echo_tool());
    tools.register("sink-tool", "1.0", echo_tool());
    Arc::new(tools)
}

fn make_run(def: NetworkDefinition) -> NetworkRun {
    NetworkRun::new(def, Arc::new(DatatypeRegistry::with_builtins())).expect("valid network")
}

/// A backend that completes every job it accepts without ever looking at the
/// annotations on its inputs. Jobs on node "B" fail outright; everything else
/// gets synthetic output data.
struct OptimisticBackend {
    ctx: BackendContext,
}

impl ExecutionBackend for OptimisticBackend {
    fn queue_job(&mut self, mut job: Job) -> Pin<Box<dyn Future<Output = flowrun::errors::Result<()>> + Send + '_>> {
        let tx = self.ctx.signals.clone();
        Box::pin(async move {
            job.set_status(JobState::Queued)?;
            job.set_status(JobState::Running)?;

            if job.node_id == "B" {
                job.errors.push("step tool crashed".to_string());
                job.set_status(JobState::ExecutionFailed)?;
            } else {
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
                            let value = format!("done://{}/{}", job.id(), name);
                            job.output_data.insert(name, vec![Datum::new(value, datatype)]);
                        }
                    }
                }
                job.set_status(JobState::ExecutionDone)?;
            }

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

#[tokio::test]
async fn successful_run_reports_all_samples() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut run = make_run(chain());
        let report = run
            .execute(
                three_samples(),
                sink_binding(),
                &BackendRegistry::new(),
                standard_tools(),
                RunOptions::new(dir.path()),
            )
            .await?;

        assert!(report.overall_success());
        assert!(!report.aborted);
        assert_eq!(report.sinks.len(), 1);
        assert_eq!(report.sinks[0].node, "C");
        assert_eq!(report.sinks[0].succeeded, 3);
        assert_eq!(report.sinks[0].failed, 0);

        // Run inputs were snapshotted before scheduling.
        assert!(dir.path().join("definition.json").exists());
        assert!(dir.path().join("source_data.json").exists());
        assert!(dir.path().join("sink_report.json").exists());

        // Every node published a result per sample.
        for node in ["A", "B"] {
            assert_eq!(run.node(node).expect("node").results().len(), 3);
        }
        Ok(())
    })
    .await
}

#[tokio::test]
async fn failed_sample_propagates_to_sink_report() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut tools = ToolRegistry::new();
        tools.register("transform", "1.0", failing_for_value("beta"));
        tools.register("sink-tool", "1.0", echo_tool());

        let mut run = make_run(chain());
        let report = run
            .execute(
                three_samples(),
                sink_binding(),
                &BackendRegistry::new(),
                Arc::new(tools),
                RunOptions::new(dir.path()),
            )
            .await?;

        assert!(!report.overall_success());
        assert_eq!(report.sinks[0].succeeded, 2);
        assert_eq!(report.sinks[0].failed, 1);

        let outcome = &report.sinks[0].samples["s2"];
        assert!(!outcome.succeeded());
        assert!(
            outcome
                .errors
                .iter()
                .any(|e| e.contains("upstream failures")),
            "sink outcome should carry the upstream failure: {:?}",
            outcome.errors
        );

        // The step's published result for the failed sample carries the
        // failure annotation.
        let failed_result = run
            .node("B")
            .and_then(|n| n.result("s2"))
            .expect("failed result published");
        assert!(!failed_result.failed.is_empty());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn missing_source_binding_is_a_hard_error() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut run = make_run(chain());
        let err = run
            .execute(
                BTreeMap::new(),
                sink_binding(),
                &BackendRegistry::new(),
                standard_tools(),
                RunOptions::new(dir.path()),
            )
            .await;

        assert!(matches!(
            err,
            Err(EngineError::MissingBinding { kind: "source", .. })
        ));
        assert!(!run.is_executing());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn missing_sink_binding_is_a_hard_error() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut run = make_run(chain());
        let err = run
            .execute(
                three_samples(),
                BTreeMap::new(),
                &BackendRegistry::new(),
                standard_tools(),
                RunOptions::new(dir.path()),
            )
            .await;

        assert!(matches!(
            err,
            Err(EngineError::MissingBinding { kind: "sink", .. })
        ));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn unknown_backend_is_rejected() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut run = make_run(chain());
        let err = run
            .execute(
                three_samples(),
                sink_binding(),
                &BackendRegistry::new(),
                standard_tools(),
                RunOptions::new(dir.path()).with_backend("grid"),
            )
            .await;

        assert!(matches!(err, Err(EngineError::UnknownBackend(name)) if name == "grid"));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn abort_mid_run_stops_generation() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut run = make_run(chain());
        let handle = run.abort_handle();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_obs = fired.clone();
        // Abort as soon as the first job reports a status change.
        run = run.with_observer(Arc::new(move |_job| {
            if fired_obs.fetch_add(1, Ordering::SeqCst) == 0 {
                handle.abort();
            }
        }));

        let report = run
            .execute(
                three_samples(),
                sink_binding(),
                &BackendRegistry::new(),
                standard_tools(),
                RunOptions::new(dir.path()),
            )
            .await?;

        assert!(report.aborted);
        assert!(!report.overall_success());
        assert!(!run.is_executing());
        // Sink jobs never ran.
        assert!(report.sinks[0].samples.is_empty());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn custom_backend_drives_the_whole_chain() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let executed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let executed_factory = executed.clone();

        let mut backends = BackendRegistry::new();
        backends.register("fake", move |ctx| {
            Ok(Box::new(FakeBackend::new(ctx, executed_factory.clone()))
                as Box<dyn flowrun::exec::ExecutionBackend>)
        });

        let samples = BTreeMap::from([("A".to_string(), source_binding(&[("s1", &["alpha"])]))]);

        let mut run = make_run(chain());
        let report = run
            .execute(
                samples,
                sink_binding(),
                &backends,
                Arc::new(ToolRegistry::new()), // the fake never consults tools
                RunOptions::new(dir.path()).with_backend("fake"),
            )
            .await?;

        assert!(report.overall_success());
        assert_eq!(
            *executed.lock().unwrap(),
            vec!["net__A__s1", "net__B__s1", "net__C__s1__0"]
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn annotated_sink_sample_fails_even_when_its_job_succeeds() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;

        let mut backends = BackendRegistry::new();
        backends.register("optimistic", |ctx| {
            Ok(Box::new(OptimisticBackend { ctx }) as Box<dyn ExecutionBackend>)
        });

        let samples = BTreeMap::from([("A".to_string(), source_binding(&[("s1", &["alpha"])]))]);

        let mut run = make_run(chain());
        let report = run
            .execute(
                samples,
                sink_binding(),
                &backends,
                Arc::new(ToolRegistry::new()), // the backend never consults tools
                RunOptions::new(dir.path()).with_backend("optimistic"),
            )
            .await?;

        // The sink job itself reports success, but its input carries the
        // failed step's annotation; the sample still counts as failed.
        assert!(!report.overall_success());
        assert_eq!(report.sinks[0].succeeded, 0);
        assert_eq!(report.sinks[0].failed, 1);

        let outcome = &report.sinks[0].samples["s1"];
        assert!(!outcome.succeeded());
        assert!(
            outcome.errors.iter().any(|e| e.contains("net__B__s1")),
            "outcome should name the failed upstream job: {:?}",
            outcome.errors
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn result_cache_skips_repeated_step_work() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let cache = dir.path().join("cache");

        let calls = Arc::new(Mutex::new(0usize));
        let calls_tool = calls.clone();
        let counting_echo = Arc::new(
            move |payload: &Payload,
                  _ctx: &ExecutionContext|
                  -> flowrun::errors::Result<InterfaceResult> {
                *calls_tool.lock().unwrap() += 1;
                let mut result = InterfaceResult::default();
                for (name, value) in &payload.outputs {
                    if let ArgumentValue::Flat(targets) = value {
                        result.result_data.insert(name.clone(), targets.clone());
                    }
                }
                Ok(result)
            },
        );

        let mut tools = ToolRegistry::new();
        tools.register("transform", "1.0", counting_echo);
        tools.register("sink-tool", "1.0", echo_tool());
        let tools = Arc::new(tools);

        let samples = BTreeMap::from([("A".to_string(), source_binding(&[("s1", &["alpha"])]))]);

        let mut first = make_run(chain());
        first
            .execute(
                samples.clone(),
                sink_binding(),
                &BackendRegistry::new(),
                tools.clone(),
                RunOptions::new(dir.path().join("run1")).with_cache_dir(&cache),
            )
            .await?;
        assert_eq!(*calls.lock().unwrap(), 1);

        let mut second = make_run(chain());
        let report = second
            .execute(
                samples,
                sink_binding(),
                &BackendRegistry::new(),
                tools,
                RunOptions::new(dir.path().join("run2")).with_cache_dir(&cache),
            )
            .await?;

        // Same payload, same tool: the step result is reused.
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(report.overall_success());
        Ok(())
    })
    .await
}
