use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BridgeError {
    #[error("invalid submission descriptor: {0}")]
    #[diagnostic(help("the attached file must be a JSON object of workflow inputs"))]
    Validation(String),

    #[error("invalid Synapse id: {0}")]
    InvalidSynapseId(String),

    #[error("invalid SRR accession: {0}")]
    InvalidSrrId(String),

    #[error("invalid GEO accession: {0}")]
    InvalidGeoAccession(String),

    #[error("staging {reference}: expected exactly one project file named {file_name}, found {matches}")]
    StagingMatch {
        reference: String,
        file_name: String,
        matches: usize,
    },

    #[error("staging failed: {0}")]
    Staging(String),

    #[error("task {task_id} finished with unsupported status {status}")]
    UnsupportedStatus { task_id: String, status: String },

    #[error("task {task_id} still running after {polls} polls")]
    PollLimit { task_id: String, polls: u32 },

    #[error("cancelled while {0}")]
    Cancelled(String),

    #[error("run stopped at submission {submission_id}: {message}")]
    #[diagnostic(help("the batch report lists the submissions processed before the stop"))]
    BatchAborted {
        submission_id: String,
        message: String,
    },

    #[error("execution platform request failed: {0}")]
    ExecutionHttp(String),

    #[error("execution platform returned status {status}: {message}")]
    ExecutionStatus { status: u16, message: String },

    #[error("public app not found: {0}")]
    AppNotFound(String),

    #[error("Synapse request failed: {0}")]
    CommonsHttp(String),

    #[error("Synapse returned status {status}: {message}")]
    CommonsStatus { status: u16, message: String },

    #[error("GEO request failed: {0}")]
    GeoHttp(String),

    #[error("GEO returned status {status}: {message}")]
    GeoStatus { status: u16, message: String },

    #[error("DRS request failed: {0}")]
    DrsHttp(String),

    #[error("DRS returned status {status}: {message}")]
    DrsStatus { status: u16, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("sra conversion failed: {0}")]
    SraConversion(String),

    #[error("missing config file synbridge.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl BridgeError {
    /// True when a collaborator (network, tool, remote lookup) failed.
    pub fn is_external_call(&self) -> bool {
        matches!(
            self,
            BridgeError::ExecutionHttp(_)
                | BridgeError::ExecutionStatus { .. }
                | BridgeError::AppNotFound(_)
                | BridgeError::CommonsHttp(_)
                | BridgeError::CommonsStatus { .. }
                | BridgeError::GeoHttp(_)
                | BridgeError::GeoStatus { .. }
                | BridgeError::DrsHttp(_)
                | BridgeError::DrsStatus { .. }
                | BridgeError::MissingTool(_)
                | BridgeError::SraConversion(_)
        )
    }

    /// Short class name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Validation(_)
            | BridgeError::InvalidSynapseId(_)
            | BridgeError::InvalidSrrId(_)
            | BridgeError::InvalidGeoAccession(_) => "validation",
            BridgeError::StagingMatch { .. } | BridgeError::Staging(_) => "staging",
            BridgeError::UnsupportedStatus { .. } => "unsupported_status",
            BridgeError::PollLimit { .. } => "poll_limit",
            BridgeError::Cancelled(_) => "cancelled",
            BridgeError::BatchAborted { .. } => "aborted",
            err if err.is_external_call() => "external",
            _ => "local",
        }
    }

    /// Errors that stop the whole batch instead of a single submission.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            BridgeError::UnsupportedStatus { .. } | BridgeError::Cancelled(_)
        )
    }
}
