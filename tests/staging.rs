mod common;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use serde_json::json;

use common::{FakeCommons, FakeExec, file, syn};
use synbridge::domain::{InputSet, InputValue, Project};
use synbridge::error::BridgeError;
use synbridge::output::JsonOutput;
use synbridge::returns::return_results;
use synbridge::staging::stage_inputs;

fn project() -> Project {
    Project {
        id: "user/test".to_string(),
        name: "Test".to_string(),
    }
}

fn commons_with_files() -> FakeCommons {
    let mut commons = FakeCommons::default();
    commons.files.insert(syn("syn111"), "r1.fq.gz".to_string());
    commons.files.insert(syn("syn222"), "r2.fq.gz".to_string());
    commons
}

#[test]
fn literal_only_inputs_are_returned_unchanged() {
    let commons = commons_with_files();
    let exec = FakeExec::default();
    let inputs = InputSet::from_json(json!({ "threads": 4, "label": "tumor" })).unwrap();

    let staged = stage_inputs(&commons, &exec, &inputs, &project(), &JsonOutput).unwrap();

    assert_eq!(staged, inputs);
    assert!(exec.uploads.lock().unwrap().is_empty());
    assert_eq!(*commons.entity_fetches.lock().unwrap(), 0);
}

#[test]
fn reference_is_replaced_with_project_file() {
    let commons = commons_with_files();
    let exec = FakeExec::default();
    let inputs = InputSet::from_json(json!({ "reads1": "syn111", "threads": 4 })).unwrap();

    let staged = stage_inputs(&commons, &exec, &inputs, &project(), &JsonOutput).unwrap();

    assert!(staged.is_staged());
    assert_eq!(
        staged.get("reads1"),
        Some(&InputValue::File(file("file-1", "r1.fq.gz")))
    );
    assert_eq!(staged.get("threads"), Some(&InputValue::Literal(json!(4))));
    let uploads = exec.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].ends_with("r1.fq.gz"));
}

#[test]
fn repeated_reference_is_uploaded_once() {
    let commons = commons_with_files();
    let exec = FakeExec::default();
    let inputs = InputSet::from_json(json!({ "a": "syn111", "b": "syn111" })).unwrap();

    let staged = stage_inputs(&commons, &exec, &inputs, &project(), &JsonOutput).unwrap();

    assert_eq!(staged.get("a"), staged.get("b"));
    assert_eq!(exec.uploads.lock().unwrap().len(), 1);
}

#[test]
fn duplicate_listing_is_a_staging_error() {
    let commons = commons_with_files();
    let exec = FakeExec {
        duplicate_uploads: vec!["r1.fq.gz".to_string()],
        ..FakeExec::default()
    };
    let inputs = InputSet::from_json(json!({ "reads1": "syn111" })).unwrap();

    let err = stage_inputs(&commons, &exec, &inputs, &project(), &JsonOutput).unwrap_err();

    assert_matches!(err, BridgeError::StagingMatch { matches: 2, ref file_name, .. } if file_name == "r1.fq.gz");
}

#[test]
fn missing_listing_is_a_staging_error() {
    let commons = commons_with_files();
    let exec = FakeExec {
        hidden_uploads: vec!["r2.fq.gz".to_string()],
        ..FakeExec::default()
    };
    let inputs = InputSet::from_json(json!({ "reads2": "syn222" })).unwrap();

    let err = stage_inputs(&commons, &exec, &inputs, &project(), &JsonOutput).unwrap_err();

    assert_matches!(err, BridgeError::StagingMatch { matches: 0, .. });
    assert_eq!(err.kind(), "staging");
}

#[test]
fn unknown_reference_fails_with_commons_error() {
    let commons = FakeCommons::default();
    let exec = FakeExec::default();
    let inputs = InputSet::from_json(json!({ "reads1": "syn999" })).unwrap();

    let err = stage_inputs(&commons, &exec, &inputs, &project(), &JsonOutput).unwrap_err();

    assert_matches!(err, BridgeError::CommonsStatus { status: 404, .. });
}

#[test]
fn return_skips_large_artifacts_and_continues_after_failure() {
    let commons = FakeCommons::default();
    let exec = FakeExec {
        failing_downloads: vec!["broken.txt".to_string()],
        ..FakeExec::default()
    };
    let outputs = BTreeMap::from([
        ("bam".to_string(), Some(file("o1", "sample.bam"))),
        ("broken".to_string(), Some(file("o2", "broken.txt"))),
        ("counts".to_string(), Some(file("o3", "counts.tsv"))),
        ("missing".to_string(), None),
    ]);
    let folder = syn("syn800");

    let report = return_results(
        &commons,
        &exec,
        &outputs,
        &[".bam".to_string()],
        &folder,
        &JsonOutput,
    )
    .unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.excluded, vec!["bam".to_string()]);
    assert_eq!(report.returned.len(), 1);
    assert_eq!(report.returned[0].output, "counts");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].output, "broken");
    assert_eq!(commons.stored_file_names(), vec!["counts.tsv".to_string()]);
    assert_eq!(commons.stored_files.lock().unwrap()[0].1, folder);
    assert_scratch_released(&exec.downloads.lock().unwrap());
}

/// Downloads land in `<scratch>/<index>/<name>`.
fn scratch_root(download: &Path) -> PathBuf {
    download.parent().unwrap().parent().unwrap().to_path_buf()
}

fn assert_scratch_released(downloads: &[PathBuf]) {
    assert!(!downloads.is_empty());
    let root = scratch_root(&downloads[0]);
    assert!(downloads.iter().all(|path| scratch_root(path) == root));
    assert!(!root.exists(), "{} left behind", root.display());
}

#[test]
fn return_releases_scratch_when_every_transfer_succeeds() {
    let commons = FakeCommons::default();
    let exec = FakeExec::default();
    let outputs = BTreeMap::from([
        ("counts".to_string(), Some(file("o1", "counts.tsv"))),
        ("log".to_string(), Some(file("o2", "job.log"))),
    ]);

    let report = return_results(
        &commons,
        &exec,
        &outputs,
        &[".bam".to_string()],
        &syn("syn800"),
        &JsonOutput,
    )
    .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.returned.len(), 2);
    let downloads = exec.downloads.lock().unwrap();
    assert_eq!(downloads.len(), 2);
    assert_scratch_released(&downloads);
}

#[test]
fn returned_file_names_stay_inside_scratch() {
    let commons = FakeCommons::default();
    let exec = FakeExec::default();
    let outputs = BTreeMap::from([(
        "log".to_string(),
        Some(file("o1", "../../escape.log")),
    )]);

    let report = return_results(&commons, &exec, &outputs, &[], &syn("syn800"), &JsonOutput)
        .unwrap();

    assert_eq!(report.returned.len(), 1);
    let downloads = exec.downloads.lock().unwrap();
    assert_eq!(downloads[0].file_name().unwrap(), "escape.log");
    assert!(
        downloads[0]
            .components()
            .all(|part| part != std::path::Component::ParentDir)
    );
    assert_eq!(commons.stored_file_names(), vec!["escape.log".to_string()]);
}
