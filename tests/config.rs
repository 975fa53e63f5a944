use std::time::Duration;

use assert_matches::assert_matches;

use synbridge::app::RunSettings;
use synbridge::config::{
    CommonsCredentials, Config, ConfigLoader, ExecutionCredentials, DEFAULT_SBG_ENDPOINT,
    ini_section,
};
use synbridge::domain::SubmissionStatus;
use synbridge::error::BridgeError;

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

#[test]
fn defaults_when_sections_are_missing() {
    let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.profile, "cavatica");
    assert_eq!(resolved.project, "Test");
    assert_eq!(resolved.app, "Kids First DRC RNAseq Workflow");
    assert_eq!(resolved.poll.interval, Duration::from_secs(60));
    assert_eq!(resolved.poll.max_polls, Some(10_080));
    assert_eq!(resolved.excluded_suffixes, vec![".bam".to_string()]);
    assert!(resolved.queue.is_none());
    assert!(resolved.archive.is_none());
}

#[test]
fn full_config_resolves() {
    let config = parse(
        r#"{
            "schema_version": 1,
            "execution": { "profile": "cavatica-dev", "project": "RNA", "billing_group": "bg-1" },
            "commons": { "result_parent": "syn700" },
            "queue": { "evaluation_id": "9614112", "status": "received", "page_size": 0 },
            "poll": { "interval_secs": 5, "max_polls": 3 },
            "returns": { "excluded_suffixes": [".bam", ".cram"] },
            "archive": {
                "series": ["gse79842"],
                "fastq_parent": "syn900",
                "fastq_table": "syn901",
                "s3_prefix": "s3://bucket/fastq/"
            }
        }"#,
    );

    let resolved = ConfigLoader::resolve_config(config).unwrap();

    assert_eq!(resolved.profile, "cavatica-dev");
    assert_eq!(resolved.billing_group.as_deref(), Some("bg-1"));
    assert_eq!(resolved.result_parent.as_ref().unwrap().as_str(), "syn700");
    let queue = resolved.queue.as_ref().unwrap();
    assert_eq!(queue.status, SubmissionStatus::Received);
    assert_eq!(queue.page_size, 1);
    assert_eq!(resolved.poll.interval, Duration::from_secs(5));
    assert_eq!(resolved.excluded_suffixes.len(), 2);
    let archive = resolved.archive.as_ref().unwrap();
    assert_eq!(archive.series[0].as_str(), "GSE79842");
    assert_eq!(archive.s3_prefix.as_deref(), Some("s3://bucket/fastq"));
}

#[test]
fn unsupported_schema_version() {
    let err = ConfigLoader::resolve_config(parse(r#"{ "schema_version": 2 }"#)).unwrap_err();
    assert_matches!(err, BridgeError::ConfigParse(_));
}

#[test]
fn invalid_result_parent() {
    let err = ConfigLoader::resolve_config(parse(r#"{ "commons": { "result_parent": "folder" } }"#))
        .unwrap_err();
    assert_matches!(err, BridgeError::InvalidSynapseId(_));
}

#[test]
fn run_settings_require_queue_and_result_parent() {
    let no_queue = ConfigLoader::resolve_config(parse(r#"{ "commons": { "result_parent": "syn7" } }"#))
        .unwrap();
    assert_matches!(
        RunSettings::from_config(&no_queue, None, None),
        Err(BridgeError::ConfigParse(_))
    );

    let settings = RunSettings::from_config(&no_queue, Some("123"), Some(4)).unwrap();
    assert_eq!(settings.queue.evaluation_id, "123");
    assert_eq!(settings.queue.status, SubmissionStatus::Received);
    assert_eq!(settings.poll.max_polls, Some(4));

    let no_parent = ConfigLoader::resolve_config(parse(r#"{ "queue": { "evaluation_id": "1" } }"#))
        .unwrap();
    assert_matches!(
        RunSettings::from_config(&no_parent, None, None),
        Err(BridgeError::ConfigParse(_))
    );
}

#[test]
fn missing_explicit_config_path() {
    let err = ConfigLoader::resolve(Some("/nonexistent/synbridge.json")).unwrap_err();
    assert_matches!(err, BridgeError::ConfigRead(_));
}

#[test]
fn credentials_from_ini() {
    let sbg = "[default]\nauth_token = aaa\n\n[cavatica]\napi_endpoint = https://example.test/v2\nauth_token = bbb\n";
    let creds = ExecutionCredentials::from_ini(sbg, "cavatica").unwrap();
    assert_eq!(creds.auth_token, "bbb");
    assert_eq!(creds.api_endpoint, "https://example.test/v2");

    let default = ExecutionCredentials::from_ini(sbg, "default").unwrap();
    assert_eq!(default.api_endpoint, DEFAULT_SBG_ENDPOINT);

    assert_matches!(
        ExecutionCredentials::from_ini(sbg, "missing"),
        Err(BridgeError::MissingCredentials(_))
    );

    let synapse = "# comment\n[authentication]\nauthtoken = tok\n";
    assert_eq!(CommonsCredentials::from_ini(synapse).unwrap().auth_token, "tok");
    assert_matches!(
        CommonsCredentials::from_ini("[other]\nkey = v\n"),
        Err(BridgeError::MissingCredentials(_))
    );
}

#[test]
fn ini_section_present_but_empty() {
    let section = ini_section("[empty]\n[next]\nkey = v\n", "empty").unwrap();
    assert!(section.is_empty());
    assert!(ini_section("", "empty").is_none());
}
