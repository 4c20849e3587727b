// tests/result_cache.rs
//
// Fail-soft result cache: a stored record is only reused when every
// discriminator matches, and a broken store never raises.

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;

use flowrun::data::Datum;
use flowrun::job::core::{HoldSpec, Job, JobKind, JobSpec};
use flowrun::job::payload::{Argument, ArgumentValue};
use flowrun::job::result_store::ResultStore;
use flowrun::job::state::JobState;
use flowrun::tool::OutputSpec;

use flowrun_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn make_job(kind: JobKind) -> Job {
    let mut input_args = BTreeMap::new();
    input_args.insert(
        "input".to_string(),
        Argument::with_data(BTreeMap::from([(
            "s1".to_string(),
            vec![Datum::new("value-a", "Any")],
        )])),
    );

    Job::new(JobSpec {
        network_id: "net".to_string(),
        node_id: "step".to_string(),
        sample_id: "s1".to_string(),
        sample_index: 0,
        kind,
        tool_name: "tool".to_string(),
        tool_version: "1.0".to_string(),
        input_args,
        outputs: vec![OutputSpec::new("out", "Any")],
        sample_datatype: None,
        resources: Default::default(),
        hold: HoldSpec::None,
        preferred_types: Vec::new(),
        observer: None,
    })
}

fn store_record_for(job: &Job, store: &ResultStore) -> TestResult {
    let mut record = job.to_record(job.create_payload()?);
    record.status = JobState::ExecutionDone;
    record.output_data.insert(
        "out".to_string(),
        vec![Datum::new("cached-value", "Any")],
    );
    store.save(&record)?;
    Ok(())
}

#[test]
fn matching_record_is_reused() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    store_record_for(&job, &store)?;

    let record = job.get_result(&store).expect("cache hit");
    assert_eq!(record.job_id, job.id());
    assert_eq!(record.output_data["out"][0].value, "cached-value");
    Ok(())
}

#[test]
fn non_done_status_misses() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    let mut record = job.to_record(job.create_payload()?);
    record.status = JobState::Failed;
    store.save(&record)?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn tool_version_mismatch_misses() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    let mut record = job.to_record(job.create_payload()?);
    record.status = JobState::ExecutionDone;
    record.tool_version = "2.0".to_string();
    store.save(&record)?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn tool_name_mismatch_misses() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    let mut record = job.to_record(job.create_payload()?);
    record.status = JobState::ExecutionDone;
    record.tool_name = "other-tool".to_string();
    store.save(&record)?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn sample_mismatch_misses() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    let mut record = job.to_record(job.create_payload()?);
    record.status = JobState::ExecutionDone;
    record.sample_id = "s2".to_string();
    store.save(&record)?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn payload_mismatch_misses() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    let mut record = job.to_record(job.create_payload()?);
    record.status = JobState::ExecutionDone;
    // Same identity, different resolved inputs.
    record.payload.inputs.insert(
        "input".to_string(),
        ArgumentValue::Flat(vec!["something-else".to_string()]),
    );
    store.save(&record)?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn sink_jobs_always_rerun() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Sink {
        write_index: 0,
        template: "/out/{sample_id}".to_string(),
    });
    store_record_for(&job, &store)?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn corrupt_record_is_ignored() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path())?;

    let job = make_job(JobKind::Standard);
    fs::write(
        dir.path().join(format!("{}.json", job.id())),
        b"{ not json",
    )?;

    assert!(job.get_result(&store).is_none());
    Ok(())
}

#[test]
fn missing_store_directory_is_a_miss() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let store = ResultStore::open(dir.path().join("cache"))?;

    let job = make_job(JobKind::Standard);
    assert!(job.get_result(&store).is_none());
    Ok(())
}
