use std::collections::HashMap;

use tempfile::Builder;

use crate::app::{ProgressEvent, ProgressSink};
use crate::commons::CommonsClient;
use crate::domain::{FileRef, InputSet, InputValue, Project, SynapseId};
use crate::error::BridgeError;
use crate::execution::ExecutionClient;

/// Replaces every data-commons reference in `inputs` with a file uploaded
/// into `project`. Literals are carried over untouched.
///
/// After upload the project listing is re-queried by base name and exactly
/// one exact-name match is required; the listing is eventually consistent,
/// so a missing or duplicated name is reported instead of guessed.
pub fn stage_inputs<C, E>(
    commons: &C,
    exec: &E,
    inputs: &InputSet,
    project: &Project,
    sink: &dyn ProgressSink,
) -> Result<InputSet, BridgeError>
where
    C: CommonsClient + ?Sized,
    E: ExecutionClient + ?Sized,
{
    if inputs.is_staged() {
        return Ok(inputs.clone());
    }

    let scratch = Builder::new()
        .prefix("synbridge-stage")
        .tempdir()
        .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
    let mut uploaded: HashMap<SynapseId, FileRef> = HashMap::new();
    let mut staged = InputSet::new();

    for (key, value) in inputs.iter() {
        let Some(id) = value.as_reference() else {
            staged.insert(key.clone(), value.clone());
            continue;
        };
        if let Some(file) = uploaded.get(id) {
            staged.insert(key.clone(), InputValue::File(file.clone()));
            continue;
        }

        sink.event(ProgressEvent {
            message: format!("phase=Stage; {key} <- {id}"),
            elapsed: None,
        });
        let entity = commons.get_entity(id, Some(scratch.path()))?;
        let local = entity.path.ok_or_else(|| {
            BridgeError::Staging(format!("{id} has no downloadable file content"))
        })?;
        let file_name = local
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| BridgeError::Staging(format!("{id} downloaded to an invalid path")))?
            .to_string();

        exec.upload_file(&local, project)?;
        let file = single_match(id, &file_name, exec.list_files(project, Some(&file_name))?)?;
        tracing::info!(%id, file_id = %file.id, "staged {file_name}");

        uploaded.insert(id.clone(), file.clone());
        staged.insert(key.clone(), InputValue::File(file));
    }

    Ok(staged)
}

fn single_match(
    reference: &SynapseId,
    file_name: &str,
    listed: Vec<FileRef>,
) -> Result<FileRef, BridgeError> {
    let mut matches: Vec<FileRef> = listed
        .into_iter()
        .filter(|file| file.name == file_name)
        .collect();
    if matches.len() != 1 {
        return Err(BridgeError::StagingMatch {
            reference: reference.to_string(),
            file_name: file_name.to_string(),
            matches: matches.len(),
        });
    }
    Ok(matches.remove(0))
}
