use std::collections::BTreeMap;

use assert_matches::assert_matches;
use serde_json::json;

use synbridge::domain::{FileRef, GeoSampleId, InputSet, InputValue, SubmissionStatus, TaskStatus};
use synbridge::error::BridgeError;
use synbridge::execution::{parse_outputs, task_inputs_json};
use synbridge::monitor::final_submission_status;

#[test]
fn parse_sample_id() {
    let id: GeoSampleId = "gsm2108001".parse().unwrap();
    assert_eq!(id.as_str(), "GSM2108001");
    assert_matches!(
        "GSE1".parse::<GeoSampleId>(),
        Err(BridgeError::InvalidGeoAccession(_))
    );
}

#[test]
fn submission_status_round_trips_unknown_values() {
    let status = SubmissionStatus::from("scored".to_string());
    assert_eq!(status, SubmissionStatus::Other("SCORED".to_string()));
    assert_eq!(status.to_string(), "SCORED");
    assert_eq!(
        SubmissionStatus::from("evaluation_in_progress".to_string()),
        SubmissionStatus::EvaluationInProgress
    );
}

#[test]
fn terminal_status_mapping() {
    assert_eq!(
        final_submission_status("t", &TaskStatus::Completed).unwrap(),
        SubmissionStatus::Accepted
    );
    assert_eq!(
        final_submission_status("t", &TaskStatus::Invalid).unwrap(),
        SubmissionStatus::Invalid
    );
    let err = final_submission_status("t", &TaskStatus::Other("ABORTED".to_string())).unwrap_err();
    assert!(err.aborts_batch());
    assert_eq!(err.kind(), "unsupported_status");
}

#[test]
fn error_classes() {
    assert_eq!(BridgeError::Validation("x".into()).kind(), "validation");
    assert_eq!(
        BridgeError::CommonsStatus {
            status: 503,
            message: "down".into()
        }
        .kind(),
        "external"
    );
    assert_eq!(BridgeError::Filesystem("disk".into()).kind(), "local");
    assert!(BridgeError::Cancelled("waiting".into()).aborts_batch());
    assert!(
        !BridgeError::PollLimit {
            task_id: "t".into(),
            polls: 3
        }
        .aborts_batch()
    );
}

#[test]
fn task_inputs_use_file_objects() {
    let mut inputs = InputSet::from_json(json!({ "threads": 4 })).unwrap();
    inputs.insert(
        "reads1",
        InputValue::File(FileRef {
            id: "file-1".to_string(),
            name: "r1.fq.gz".to_string(),
            size: None,
        }),
    );

    let payload = task_inputs_json(&inputs).unwrap();

    assert_eq!(payload["threads"], json!(4));
    assert_eq!(
        payload["reads1"],
        json!({ "class": "File", "path": "file-1", "name": "r1.fq.gz" })
    );
}

#[test]
fn task_inputs_reject_unstaged_references() {
    let inputs = InputSet::from_json(json!({ "reads1": "syn111" })).unwrap();
    assert_matches!(task_inputs_json(&inputs), Err(BridgeError::Staging(_)));
}

#[test]
fn outputs_flatten_file_arrays() {
    let outputs = parse_outputs(&json!({
        "bam": { "class": "File", "path": "f1", "name": "out.bam", "size": 10 },
        "qc": [
            { "class": "File", "path": "f2", "name": "a.tsv" },
            { "class": "File", "path": "f3", "name": "b.tsv" }
        ],
        "log": null
    }));

    let names: BTreeMap<&str, Option<&str>> = outputs
        .iter()
        .map(|(key, file)| (key.as_str(), file.as_ref().map(|file| file.name.as_str())))
        .collect();
    assert_eq!(
        names,
        BTreeMap::from([
            ("bam", Some("out.bam")),
            ("log", None),
            ("qc[0]", Some("a.tsv")),
            ("qc[1]", Some("b.tsv")),
        ])
    );
    assert_eq!(outputs["bam"].as_ref().unwrap().size, Some(10));
}
