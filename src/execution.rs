use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::config::ExecutionCredentials;
use crate::domain::{AppFilter, AppRef, FileRef, InputSet, InputValue, OutputSet, Project, Task, TaskRequest};
use crate::error::BridgeError;
use crate::http;

pub const PAGE_LIMIT: usize = 100;
const UPLOAD_PART_SIZE: u64 = 32 * 1024 * 1024;

/// Project, app, task and file operations of the workflow execution platform.
pub trait ExecutionClient: Send + Sync {
    fn list_projects(&self, name: Option<&str>) -> Result<Vec<Project>, BridgeError>;
    fn create_project(&self, name: &str) -> Result<Project, BridgeError>;
    fn list_apps(&self, filter: &AppFilter) -> Result<Vec<AppRef>, BridgeError>;
    fn copy_app(&self, app: &AppRef, project: &Project, name: &str)
    -> Result<AppRef, BridgeError>;
    fn create_task(&self, request: &TaskRequest) -> Result<Task, BridgeError>;
    fn get_task(&self, id: &str) -> Result<Task, BridgeError>;
    fn upload_file(&self, path: &Path, project: &Project) -> Result<FileRef, BridgeError>;
    fn list_files(&self, project: &Project, name: Option<&str>)
    -> Result<Vec<FileRef>, BridgeError>;
    fn download_file(&self, file: &FileRef, destination: &Path) -> Result<(), BridgeError>;
}

#[derive(Clone)]
pub struct SbgHttpClient {
    client: Client,
    transfer: Client,
    base_url: String,
    billing_group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    id: String,
    #[serde(default)]
    name: Option<String>,
    status: String,
    #[serde(default)]
    outputs: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    upload_id: String,
}

#[derive(Debug, Deserialize)]
struct PartUrl {
    url: String,
    #[serde(default)]
    method: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadInfo {
    url: String,
}

impl SbgHttpClient {
    pub fn new(credentials: &ExecutionCredentials) -> Result<Self, BridgeError> {
        let client = http::build_client(
            &[("x-sbg-auth-token", credentials.auth_token.clone())],
            Duration::from_secs(60),
            BridgeError::ExecutionHttp,
        )?;
        let transfer = http::build_client(&[], Duration::from_secs(600), BridgeError::ExecutionHttp)?;
        Ok(Self {
            client,
            transfer,
            base_url: credentials.api_endpoint.trim_end_matches('/').to_string(),
            billing_group: None,
        })
    }

    pub fn with_billing_group(mut self, billing_group: Option<String>) -> Self {
        self.billing_group = billing_group;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, BridgeError> {
        let url = self.url(path);
        let response = http::send_with_retries(
            || self.client.get(&url).query(params),
            BridgeError::ExecutionHttp,
        )?;
        http::check_status(response, status_error)?
            .json()
            .map_err(|err| BridgeError::ExecutionHttp(err.to_string()))
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        body: &Value,
    ) -> Result<T, BridgeError> {
        let url = self.url(path);
        let response = http::send_with_retries(
            || self.client.post(&url).query(params).json(body),
            BridgeError::ExecutionHttp,
        )?;
        http::check_status(response, status_error)?
            .json()
            .map_err(|err| BridgeError::ExecutionHttp(err.to_string()))
    }

    /// Walks every page of a listing endpoint.
    fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, BridgeError> {
        let mut items = Vec::new();
        let mut offset = 0usize;
        loop {
            let mut query = params.to_vec();
            query.push(("offset", offset.to_string()));
            query.push(("limit", PAGE_LIMIT.to_string()));
            let page: Page<T> = self.get_json(path, &query)?;
            let received = page.items.len();
            items.extend(page.items);
            match next_offset(offset, PAGE_LIMIT, received) {
                Some(next) => offset = next,
                None => break,
            }
        }
        Ok(items)
    }

    fn upload_part(
        &self,
        upload_id: &str,
        part_number: u64,
        bytes: Vec<u8>,
    ) -> Result<(), BridgeError> {
        let part: PartUrl = self.get_json(
            &format!("upload/multipart/{upload_id}/part/{part_number}"),
            &[],
        )?;
        let request = match part.method.as_deref() {
            Some("POST") => self.transfer.post(&part.url),
            _ => self.transfer.put(&part.url),
        };
        let response = request
            .body(bytes)
            .send()
            .map_err(|err| BridgeError::ExecutionHttp(err.to_string()))?;
        let response = http::check_status(response, status_error)?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .ok_or_else(|| {
                BridgeError::ExecutionHttp(format!("part {part_number} upload returned no ETag"))
            })?;
        let _: Value = self.post_json(
            &format!("upload/multipart/{upload_id}/part"),
            &[],
            &json!({
                "part_number": part_number,
                "response": { "headers": { "ETag": etag } }
            }),
        )?;
        Ok(())
    }
}

impl ExecutionClient for SbgHttpClient {
    fn list_projects(&self, name: Option<&str>) -> Result<Vec<Project>, BridgeError> {
        let mut params = Vec::new();
        if let Some(name) = name {
            params.push(("name", name.to_string()));
        }
        self.list_all("projects", &params)
    }

    fn create_project(&self, name: &str) -> Result<Project, BridgeError> {
        let mut body = json!({ "name": name });
        if let Some(group) = &self.billing_group {
            body["billing_group"] = Value::String(group.clone());
        }
        self.post_json("projects", &[], &body)
    }

    fn list_apps(&self, filter: &AppFilter) -> Result<Vec<AppRef>, BridgeError> {
        let params = match filter {
            AppFilter::Public => vec![("visibility", "public".to_string())],
            AppFilter::Project(project) => vec![("project", project.clone())],
        };
        self.list_all("apps", &params)
    }

    fn copy_app(
        &self,
        app: &AppRef,
        project: &Project,
        name: &str,
    ) -> Result<AppRef, BridgeError> {
        self.post_json(
            &format!("apps/{}/actions/copy", app.id),
            &[],
            &json!({ "project": project.id, "name": name }),
        )
    }

    fn create_task(&self, request: &TaskRequest) -> Result<Task, BridgeError> {
        let inputs = task_inputs_json(&request.inputs)?;
        let params = if request.run {
            vec![("action", "run".to_string())]
        } else {
            Vec::new()
        };
        let raw: RawTask = self.post_json(
            "tasks",
            &params,
            &json!({
                "name": request.name,
                "project": request.project.id,
                "app": request.app.id,
                "inputs": inputs,
            }),
        )?;
        Ok(task_from_raw(raw))
    }

    fn get_task(&self, id: &str) -> Result<Task, BridgeError> {
        let raw: RawTask = self.get_json(&format!("tasks/{id}"), &[])?;
        Ok(task_from_raw(raw))
    }

    fn upload_file(&self, path: &Path, project: &Project) -> Result<FileRef, BridgeError> {
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .ok_or_else(|| BridgeError::Filesystem(format!("invalid upload path {}", path.display())))?
            .to_string();
        let mut file = File::open(path)
            .map_err(|err| BridgeError::Filesystem(format!("open {}: {err}", path.display())))?;
        let size = file
            .metadata()
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?
            .len();

        let session: UploadSession = self.post_json(
            "upload/multipart",
            &[],
            &json!({
                "project": project.id,
                "name": name,
                "size": size,
                "part_size": UPLOAD_PART_SIZE,
            }),
        )?;

        for part_number in 1..=part_count(size, UPLOAD_PART_SIZE) {
            let start = (part_number - 1) * UPLOAD_PART_SIZE;
            let len = UPLOAD_PART_SIZE.min(size.saturating_sub(start));
            let mut bytes = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(start))
                .and_then(|_| file.read_exact(&mut bytes))
                .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
            self.upload_part(&session.upload_id, part_number, bytes)?;
        }

        self.post_json(
            &format!("upload/multipart/{}/complete", session.upload_id),
            &[],
            &json!({}),
        )
    }

    fn list_files(
        &self,
        project: &Project,
        name: Option<&str>,
    ) -> Result<Vec<FileRef>, BridgeError> {
        let mut params = vec![("project", project.id.clone())];
        if let Some(name) = name {
            params.push(("name", name.to_string()));
        }
        self.list_all("files", &params)
    }

    fn download_file(&self, file: &FileRef, destination: &Path) -> Result<(), BridgeError> {
        let info: DownloadInfo = self.get_json(&format!("files/{}/download_info", file.id), &[])?;
        let response = http::send_with_retries(
            || self.transfer.get(&info.url),
            BridgeError::ExecutionHttp,
        )?;
        let mut response = http::check_status(response, status_error)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        }
        let mut out = File::create(destination)
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut out)
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

fn status_error(status: u16, message: String) -> BridgeError {
    BridgeError::ExecutionStatus { status, message }
}

/// Offset of the next page, or `None` once a short page was received.
pub fn next_offset(offset: usize, limit: usize, received: usize) -> Option<usize> {
    if received == 0 || received < limit {
        return None;
    }
    Some(offset + received)
}

fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size).max(1)
}

/// Input payload for task creation. Unstaged references are rejected.
pub fn task_inputs_json(inputs: &InputSet) -> Result<Map<String, Value>, BridgeError> {
    let mut out = Map::new();
    for (key, value) in inputs.iter() {
        let json = match value {
            InputValue::Literal(value) => value.clone(),
            InputValue::File(file) => json!({
                "class": "File",
                "path": file.id,
                "name": file.name,
            }),
            InputValue::Reference(id) => {
                return Err(BridgeError::Staging(format!(
                    "input {key} still references {id}"
                )));
            }
        };
        out.insert(key.clone(), json);
    }
    Ok(out)
}

fn task_from_raw(raw: RawTask) -> Task {
    Task {
        name: raw.name.unwrap_or_else(|| raw.id.clone()),
        status: raw.status.into(),
        outputs: raw.outputs.as_ref().map(parse_outputs).unwrap_or_default(),
        id: raw.id,
    }
}

/// File-array outputs are flattened to `name[index]` entries.
pub fn parse_outputs(raw: &Value) -> OutputSet {
    let mut outputs = OutputSet::new();
    let Some(map) = raw.as_object() else {
        return outputs;
    };
    for (name, value) in map {
        match value {
            Value::Array(items) if !items.is_empty() => {
                for (idx, item) in items.iter().enumerate() {
                    outputs.insert(format!("{name}[{idx}]"), file_from_value(item));
                }
            }
            other => {
                outputs.insert(name.clone(), file_from_value(other));
            }
        }
    }
    outputs
}

fn file_from_value(value: &Value) -> Option<FileRef> {
    let object = value.as_object()?;
    let id = object
        .get("path")
        .or_else(|| object.get("id"))
        .and_then(|value| value.as_str())?;
    let name = object
        .get("name")
        .and_then(|value| value.as_str())
        .or_else(|| id.rsplit('/').next())?;
    Some(FileRef {
        id: id.to_string(),
        name: name.to_string(),
        size: object.get("size").and_then(|value| value.as_u64()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_stops_on_short_page() {
        assert_eq!(next_offset(0, 100, 100), Some(100));
        assert_eq!(next_offset(100, 100, 42), None);
        assert_eq!(next_offset(0, 100, 0), None);
    }

    #[test]
    fn part_count_rounds_up() {
        assert_eq!(part_count(0, 10), 1);
        assert_eq!(part_count(10, 10), 1);
        assert_eq!(part_count(11, 10), 2);
    }

    #[test]
    fn outputs_keep_missing_and_flatten_arrays() {
        let raw = json!({
            "bam": { "class": "File", "path": "f1", "name": "out.bam", "size": 10 },
            "qc": null,
            "counts": [
                { "class": "File", "path": "f2", "name": "a.tsv" },
                { "class": "File", "path": "f3", "name": "b.tsv" }
            ]
        });
        let outputs = parse_outputs(&raw);
        assert_eq!(outputs["bam"].as_ref().unwrap().name, "out.bam");
        assert_eq!(outputs["qc"], None);
        assert_eq!(outputs["counts[1]"].as_ref().unwrap().id, "f3");
    }
}
