use serde::Serialize;
use tempfile::Builder;

use crate::app::{ProgressEvent, ProgressSink};
use crate::commons::{CommonsClient, sanitize_file_name};
use crate::domain::{FileRef, OutputSet, SynapseId};
use crate::error::BridgeError;
use crate::execution::ExecutionClient;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputPartition {
    pub returnable: Vec<(String, FileRef)>,
    /// Output names whose file carries a large-artifact suffix.
    pub excluded: Vec<String>,
    /// Output names the task left empty.
    pub absent: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnedFile {
    pub output: String,
    pub file_name: String,
    pub entity_id: SynapseId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnFailure {
    pub output: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReturnReport {
    pub returned: Vec<ReturnedFile>,
    pub excluded: Vec<String>,
    pub failures: Vec<ReturnFailure>,
}

impl ReturnReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn is_large_artifact(file_name: &str, excluded_suffixes: &[String]) -> bool {
    excluded_suffixes
        .iter()
        .any(|suffix| file_name.ends_with(suffix.as_str()))
}

pub fn partition_outputs(outputs: &OutputSet, excluded_suffixes: &[String]) -> OutputPartition {
    let mut partition = OutputPartition::default();
    for (name, file) in outputs {
        match file {
            None => partition.absent.push(name.clone()),
            Some(file)
                if is_large_artifact(&file.name, excluded_suffixes)
                    || is_large_artifact(name, excluded_suffixes) =>
            {
                partition.excluded.push(name.clone())
            }
            Some(file) => partition.returnable.push((name.clone(), file.clone())),
        }
    }
    partition
}

/// Copies every returnable output into `result_folder`. Each file goes
/// through a scratch directory that is removed when this returns, on every
/// path. A failed transfer is recorded and the remaining outputs still run.
pub fn return_results<C, E>(
    commons: &C,
    exec: &E,
    outputs: &OutputSet,
    excluded_suffixes: &[String],
    result_folder: &SynapseId,
    sink: &dyn ProgressSink,
) -> Result<ReturnReport, BridgeError>
where
    C: CommonsClient + ?Sized,
    E: ExecutionClient + ?Sized,
{
    let partition = partition_outputs(outputs, excluded_suffixes);
    let scratch = Builder::new()
        .prefix("synbridge-return")
        .tempdir()
        .map_err(|err| BridgeError::Filesystem(err.to_string()))?;

    let mut report = ReturnReport {
        excluded: partition.excluded,
        ..ReturnReport::default()
    };
    for name in &report.excluded {
        tracing::debug!(output = %name, "skipping large artifact");
    }

    for (index, (output, file)) in partition.returnable.into_iter().enumerate() {
        sink.event(ProgressEvent {
            message: format!("phase=Return; {output} -> {result_folder}"),
            elapsed: None,
        });
        let local = scratch
            .path()
            .join(index.to_string())
            .join(sanitize_file_name(&file.name));
        let stored = exec
            .download_file(&file, &local)
            .and_then(|()| commons.store_file(&local, result_folder));
        match stored {
            Ok(entity) => report.returned.push(ReturnedFile {
                output,
                file_name: file.name,
                entity_id: entity.id,
            }),
            Err(err) => {
                tracing::warn!(output = %output, error = %err, "result transfer failed");
                report.failures.push(ReturnFailure {
                    output,
                    message: err.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(name: &str) -> Option<FileRef> {
        Some(FileRef {
            id: format!("id-{name}"),
            name: name.to_string(),
            size: None,
        })
    }

    #[test]
    fn partition_splits_by_suffix() {
        let mut outputs = OutputSet::new();
        outputs.insert("bam".into(), out("out.bam"));
        outputs.insert("qc".into(), out("qc.tsv"));
        outputs.insert("vcf".into(), None);
        let partition = partition_outputs(&outputs, &[".bam".to_string()]);
        assert_eq!(partition.excluded, vec!["bam"]);
        assert_eq!(partition.absent, vec!["vcf"]);
        assert_eq!(partition.returnable.len(), 1);
        assert_eq!(partition.returnable[0].1.name, "qc.tsv");
    }

    #[test]
    fn empty_suffix_list_returns_everything() {
        let mut outputs = OutputSet::new();
        outputs.insert("bam".into(), out("out.bam"));
        assert_eq!(partition_outputs(&outputs, &[]).returnable.len(), 1);
    }
}
