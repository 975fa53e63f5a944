use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SynapseId(String);

impl SynapseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SynapseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SynapseId {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let digits = normalized.strip_prefix("syn").unwrap_or("");
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(BridgeError::InvalidSynapseId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SrrId(String);

impl SrrId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SrrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SrrId {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !has_numeric_suffix(&normalized, &["SRR", "ERR", "DRR"]) {
            return Err(BridgeError::InvalidSrrId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoSeriesId(String);

impl GeoSeriesId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeoSeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoSeriesId {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !has_numeric_suffix(&normalized, &["GSE"]) {
            return Err(BridgeError::InvalidGeoAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoSampleId(String);

impl GeoSampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeoSampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoSampleId {
    type Err = BridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !has_numeric_suffix(&normalized, &["GSM"]) {
            return Err(BridgeError::InvalidGeoAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

fn has_numeric_suffix(value: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| {
        value
            .strip_prefix(prefix)
            .map(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()))
            .unwrap_or(false)
    })
}

/// Evaluation queue status of a submission. Values this crate does not
/// drive are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubmissionStatus {
    Received,
    EvaluationInProgress,
    Accepted,
    Invalid,
    Other(String),
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubmissionStatus::Received => "RECEIVED",
            SubmissionStatus::EvaluationInProgress => "EVALUATION_IN_PROGRESS",
            SubmissionStatus::Accepted => "ACCEPTED",
            SubmissionStatus::Invalid => "INVALID",
            SubmissionStatus::Other(value) => value.as_str(),
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for SubmissionStatus {
    fn from(value: String) -> Self {
        match value.trim().to_uppercase().as_str() {
            "RECEIVED" => SubmissionStatus::Received,
            "EVALUATION_IN_PROGRESS" => SubmissionStatus::EvaluationInProgress,
            "ACCEPTED" => SubmissionStatus::Accepted,
            "INVALID" => SubmissionStatus::Invalid,
            other => SubmissionStatus::Other(other.to_string()),
        }
    }
}

impl From<SubmissionStatus> for String {
    fn from(value: SubmissionStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Task status as reported by the execution platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Invalid,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Invalid => "INVALID",
            TaskStatus::Other(value) => value.as_str(),
        }
    }

    /// Queued and running tasks are polled again; every other value is final.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.trim().to_uppercase().as_str() {
            "QUEUED" => TaskStatus::Queued,
            "RUNNING" => TaskStatus::Running,
            "COMPLETED" => TaskStatus::Completed,
            "INVALID" => TaskStatus::Invalid,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        value.as_str().to_string()
    }
}

/// A file stored in an execution platform project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppFilter {
    Public,
    Project(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Literal(Value),
    Reference(SynapseId),
    File(FileRef),
}

impl InputValue {
    /// Strings of the form `syn<digits>` are data-commons references.
    pub fn from_json(value: Value) -> Self {
        if let Value::String(text) = &value {
            if let Ok(id) = text.parse::<SynapseId>() {
                return InputValue::Reference(id);
            }
        }
        InputValue::Literal(value)
    }

    pub fn as_reference(&self) -> Option<&SynapseId> {
        match self {
            InputValue::Reference(id) => Some(id),
            _ => None,
        }
    }
}

/// Workflow inputs keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InputSet(BTreeMap<String, InputValue>);

impl InputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> Result<Self, BridgeError> {
        let Value::Object(map) = value else {
            return Err(BridgeError::Validation(
                "top-level value must be a JSON object".to_string(),
            ));
        };
        Ok(Self(
            map.into_iter()
                .map(|(key, value)| (key, InputValue::from_json(value)))
                .collect(),
        ))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: InputValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn references(&self) -> impl Iterator<Item = (&String, &SynapseId)> {
        self.0
            .iter()
            .filter_map(|(key, value)| value.as_reference().map(|id| (key, id)))
    }

    pub fn is_staged(&self) -> bool {
        self.references().next().is_none()
    }
}

impl FromIterator<(String, InputValue)> for InputSet {
    fn from_iter<T: IntoIterator<Item = (String, InputValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Task outputs; `None` marks an output the task did not produce.
pub type OutputSet = BTreeMap<String, Option<FileRef>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub outputs: OutputSet,
}

#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub name: String,
    pub project: Project,
    pub app: AppRef,
    pub inputs: InputSet,
    pub run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub id: String,
    pub evaluation_id: String,
    pub name: Option<String>,
    pub entity_id: Option<String>,
    pub version_number: Option<i64>,
    pub descriptor_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionState {
    pub submission_id: String,
    pub etag: String,
    pub status: SubmissionStatus,
    pub status_version: Option<i64>,
    pub annotations: BTreeMap<String, String>,
    pub annotations_etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionBundle {
    pub submission: Submission,
    pub state: SubmissionState,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_synapse_id() {
        let id: SynapseId = " SYN111 ".parse().unwrap();
        assert_eq!(id.as_str(), "syn111");
        assert_matches!(
            "synthetic".parse::<SynapseId>(),
            Err(BridgeError::InvalidSynapseId(_))
        );
    }

    #[test]
    fn parse_srr_and_geo() {
        assert_eq!("srr014966".parse::<SrrId>().unwrap().as_str(), "SRR014966");
        assert!("SRX1".parse::<SrrId>().is_err());
        assert!("GSE79842".parse::<GeoSeriesId>().is_ok());
        assert!("GSM1".parse::<GeoSeriesId>().is_err());
        assert!("GSM2108001".parse::<GeoSampleId>().is_ok());
    }

    #[test]
    fn statuses_keep_unknown_values() {
        let status: TaskStatus = serde_json::from_value(json!("CANCELLED")).unwrap();
        assert_eq!(status, TaskStatus::Other("CANCELLED".to_string()));
        assert!(!status.is_in_progress());
        assert!(TaskStatus::Queued.is_in_progress());
        assert_eq!(
            serde_json::to_value(SubmissionStatus::EvaluationInProgress).unwrap(),
            json!("EVALUATION_IN_PROGRESS")
        );
    }

    #[test]
    fn input_set_classifies_references() {
        let inputs = InputSet::from_json(json!({
            "reads1": "syn111",
            "label": "synthetic",
            "threads": 4
        }))
        .unwrap();
        let refs: Vec<_> = inputs.references().map(|(key, _)| key.as_str()).collect();
        assert_eq!(refs, vec!["reads1"]);
        assert!(!inputs.is_staged());
        assert_eq!(inputs.get("threads"), Some(&InputValue::Literal(json!(4))));
    }

    #[test]
    fn input_set_rejects_non_object() {
        assert_matches!(
            InputSet::from_json(json!(["syn1"])),
            Err(BridgeError::Validation(_))
        );
    }
}
