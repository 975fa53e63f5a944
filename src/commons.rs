use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::CommonsCredentials;
use crate::domain::{Submission, SubmissionBundle, SubmissionState, SubmissionStatus, SynapseId};
use crate::error::BridgeError;
use crate::http;

const FOLDER_TYPE: &str = "org.sagebionetworks.repo.model.Folder";
const FILE_TYPE: &str = "org.sagebionetworks.repo.model.FileEntity";
const UPLOAD_PART_SIZE: u64 = 8 * 1024 * 1024;
const MAX_JOB_POLLS: u32 = 120;

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub owner_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub id: SynapseId,
    pub name: String,
    pub parent_id: Option<SynapseId>,
    pub concrete_type: String,
    pub etag: Option<String>,
    /// Local copy of the file content, when downloaded.
    pub path: Option<PathBuf>,
    pub annotations: BTreeMap<String, Vec<String>>,
    pub annotations_etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityHeader {
    pub id: SynapseId,
    pub name: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableRows {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TableRows {
    pub fn column(&self, name: &str) -> Vec<String> {
        let Some(index) = self.headers.iter().position(|header| header == name) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|row| row.get(index).cloned().flatten())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BundlePage {
    pub total: usize,
    pub bundles: Vec<SubmissionBundle>,
}

/// Entity, table and evaluation-queue operations of the data-commons
/// repository.
pub trait CommonsClient: Send + Sync {
    fn login(&self) -> Result<UserProfile, BridgeError>;
    /// Fetches an entity; file content is downloaded into `download_dir`
    /// when one is given.
    fn get_entity(
        &self,
        id: &SynapseId,
        download_dir: Option<&Path>,
    ) -> Result<Entity, BridgeError>;
    fn get_children(&self, parent: &SynapseId) -> Result<Vec<EntityHeader>, BridgeError>;
    fn store_folder(&self, name: &str, parent: &SynapseId) -> Result<Entity, BridgeError>;
    fn store_file(&self, path: &Path, parent: &SynapseId) -> Result<Entity, BridgeError>;
    fn store_annotations(&self, entity: &Entity) -> Result<Entity, BridgeError>;
    fn table_query(&self, table: &SynapseId, sql: &str) -> Result<TableRows, BridgeError>;
    fn submission_bundles(
        &self,
        evaluation_id: &str,
        status: &SubmissionStatus,
        offset: usize,
        limit: usize,
    ) -> Result<BundlePage, BridgeError>;
    fn get_submission(&self, id: &str, download_dir: &Path) -> Result<Submission, BridgeError>;
    fn store_submission_state(
        &self,
        state: &SubmissionState,
    ) -> Result<SubmissionState, BridgeError>;
}

#[derive(Clone)]
pub struct SynapseHttpClient {
    client: Client,
    transfer: Client,
    repo: String,
    file: String,
}

impl SynapseHttpClient {
    pub fn new(credentials: &CommonsCredentials) -> Result<Self, BridgeError> {
        let client = http::build_client(
            &[("authorization", format!("Bearer {}", credentials.auth_token))],
            Duration::from_secs(60),
            BridgeError::CommonsHttp,
        )?;
        let transfer = http::build_client(&[], Duration::from_secs(600), BridgeError::CommonsHttp)?;
        Ok(Self {
            client,
            transfer,
            repo: credentials.repo_endpoint.trim_end_matches('/').to_string(),
            file: credentials.file_endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/{}", self.repo, path.trim_start_matches('/'))
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}/{}", self.file, path.trim_start_matches('/'))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, BridgeError> {
        let response =
            http::send_with_retries(|| self.client.get(url).query(params), BridgeError::CommonsHttp)?;
        decode(http::check_status(response, status_error)?)
    }

    fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<String, BridgeError> {
        let response =
            http::send_with_retries(|| self.client.get(url).query(params), BridgeError::CommonsHttp)?;
        http::check_status(response, status_error)?
            .text()
            .map(|text| text.trim().to_string())
            .map_err(|err| BridgeError::CommonsHttp(err.to_string()))
    }

    fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        params: &[(&str, String)],
        body: &Value,
    ) -> Result<Response, BridgeError> {
        http::send_with_retries(
            || {
                self.client
                    .request(method.clone(), url)
                    .query(params)
                    .json(body)
            },
            BridgeError::CommonsHttp,
        )
    }

    fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, BridgeError> {
        let response = self.send_json(reqwest::Method::POST, url, &[], body)?;
        decode(http::check_status(response, status_error)?)
    }

    fn put_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        body: &Value,
    ) -> Result<T, BridgeError> {
        let response = self.send_json(reqwest::Method::PUT, url, params, body)?;
        decode(http::check_status(response, status_error)?)
    }

    /// Creates an entity; a name clash under the same parent resolves to the
    /// existing entity id instead.
    fn create_or_lookup(&self, body: &Value) -> Result<(SynapseId, bool), BridgeError> {
        let response = self.send_json(reqwest::Method::POST, &self.repo_url("entity"), &[], body)?;
        if response.status() == StatusCode::CONFLICT {
            let lookup: Value = self.post_json(
                &self.repo_url("entity/child"),
                &json!({ "parentId": body["parentId"], "entityName": body["name"] }),
            )?;
            let id = json_str(&lookup, "id")
                .ok_or_else(|| BridgeError::CommonsHttp("entity lookup returned no id".to_string()))?
                .parse()?;
            return Ok((id, false));
        }
        let created: Value = decode(http::check_status(response, status_error)?)?;
        let id = json_str(&created, "id")
            .ok_or_else(|| BridgeError::CommonsHttp("entity create returned no id".to_string()))?
            .parse()?;
        Ok((id, true))
    }

    fn download_entity_file(
        &self,
        id: &SynapseId,
        raw: &Value,
        dir: &Path,
    ) -> Result<PathBuf, BridgeError> {
        let handle_id = json_str(raw, "dataFileHandleId").ok_or_else(|| {
            BridgeError::CommonsHttp(format!("{id} has no file content to download"))
        })?;
        let handles: Value =
            self.get_json(&self.repo_url(&format!("entity/{id}/filehandles")), &[])?;
        let file_name = handles["list"]
            .as_array()
            .and_then(|list| {
                list.iter()
                    .find(|handle| json_str(handle, "id").as_deref() == Some(handle_id.as_str()))
            })
            .and_then(|handle| json_str(handle, "fileName"))
            .or_else(|| json_str(raw, "name"))
            .unwrap_or_else(|| id.to_string());
        let url = self.get_text(
            &self.repo_url(&format!("entity/{id}/file")),
            &[("redirect", "false".to_string())],
        )?;
        let destination = dir.join(sanitize_file_name(&file_name));
        self.download_url(&url, &destination)?;
        Ok(destination)
    }

    fn download_url(&self, url: &str, destination: &Path) -> Result<(), BridgeError> {
        let response = http::send_with_retries(|| self.transfer.get(url), BridgeError::CommonsHttp)?;
        let mut response = http::check_status(response, status_error)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        }
        let mut out =
            File::create(destination).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        io::copy(&mut response, &mut out).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Multipart upload into the default storage location; returns the new
    /// file handle id.
    fn upload_file_handle(&self, path: &Path) -> Result<String, BridgeError> {
        let file_name = path
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
        let content_md5 = md5_hex(&mut file)?;

        let status: Value = self.post_json(
            &self.file_url("file/multipart"),
            &json!({
                "concreteType": "org.sagebionetworks.repo.model.file.MultipartUploadRequest",
                "contentType": content_type(&file_name),
                "fileName": file_name,
                "fileSizeBytes": size,
                "partSizeBytes": UPLOAD_PART_SIZE,
                "contentMD5Hex": content_md5,
            }),
        )?;
        let upload_id = json_str(&status, "uploadId")
            .ok_or_else(|| BridgeError::CommonsHttp("multipart upload returned no id".to_string()))?;
        if json_str(&status, "state").as_deref() == Some("COMPLETED") {
            return json_str(&status, "resultFileHandleId").ok_or_else(|| {
                BridgeError::CommonsHttp("completed upload has no file handle".to_string())
            });
        }

        let parts = size.div_ceil(UPLOAD_PART_SIZE).max(1);
        let parts_state = json_str(&status, "partsState").unwrap_or_default();
        for part_number in 1..=parts {
            if parts_state.as_bytes().get(part_number as usize - 1) == Some(&b'1') {
                continue;
            }
            let start = (part_number - 1) * UPLOAD_PART_SIZE;
            let len = UPLOAD_PART_SIZE.min(size.saturating_sub(start));
            let mut bytes = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(start))
                .and_then(|_| file.read_exact(&mut bytes))
                .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
            self.upload_part(&upload_id, part_number, bytes)?;
        }

        let done: Value = self.put_json(
            &self.file_url(&format!("file/multipart/{upload_id}/complete")),
            &[],
            &json!({}),
        )?;
        json_str(&done, "resultFileHandleId")
            .ok_or_else(|| BridgeError::CommonsHttp("upload completed without file handle".to_string()))
    }

    fn upload_part(&self, upload_id: &str, part_number: u64, bytes: Vec<u8>) -> Result<(), BridgeError> {
        let part_md5 = hex::encode(Md5::digest(&bytes));
        let batch: Value = self.post_json(
            &self.file_url(&format!("file/multipart/{upload_id}/presigned/url/batch")),
            &json!({ "uploadId": upload_id, "partNumbers": [part_number] }),
        )?;
        let presigned = batch["partPresignedUrls"]
            .as_array()
            .and_then(|urls| urls.first())
            .ok_or_else(|| BridgeError::CommonsHttp("no presigned url for part".to_string()))?;
        let url = json_str(presigned, "uploadPresignedUrl")
            .ok_or_else(|| BridgeError::CommonsHttp("presigned url missing".to_string()))?;
        let mut request = self.transfer.put(&url);
        if let Some(headers) = presigned["signedHeaders"].as_object() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }
        let response = request
            .body(bytes)
            .send()
            .map_err(|err| BridgeError::CommonsHttp(err.to_string()))?;
        http::check_status(response, status_error)?;

        let added: Value = self.put_json(
            &self.file_url(&format!("file/multipart/{upload_id}/add/{part_number}")),
            &[("partMD5Hex", part_md5)],
            &json!({}),
        )?;
        if json_str(&added, "addPartState").as_deref() != Some("ADD_SUCCESS") {
            return Err(BridgeError::CommonsHttp(format!(
                "part {part_number} rejected: {}",
                json_str(&added, "errorMessage").unwrap_or_default()
            )));
        }
        Ok(())
    }
}

impl CommonsClient for SynapseHttpClient {
    fn login(&self) -> Result<UserProfile, BridgeError> {
        let profile: Value = self.get_json(&self.repo_url("userProfile"), &[])?;
        Ok(UserProfile {
            owner_id: json_str(&profile, "ownerId").unwrap_or_default(),
            user_name: json_str(&profile, "userName").unwrap_or_default(),
        })
    }

    fn get_entity(
        &self,
        id: &SynapseId,
        download_dir: Option<&Path>,
    ) -> Result<Entity, BridgeError> {
        let raw: Value = self.get_json(&self.repo_url(&format!("entity/{id}")), &[])?;
        let annotations: Value =
            self.get_json(&self.repo_url(&format!("entity/{id}/annotations2")), &[])?;
        let mut entity = entity_from_json(&raw, &annotations)?;
        if let Some(dir) = download_dir {
            if entity.concrete_type == FILE_TYPE {
                entity.path = Some(self.download_entity_file(id, &raw, dir)?);
            }
        }
        Ok(entity)
    }

    fn get_children(&self, parent: &SynapseId) -> Result<Vec<EntityHeader>, BridgeError> {
        let mut children = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut body = json!({
                "parentId": parent.as_str(),
                "includeTypes": ["file", "folder", "table"],
            });
            if let Some(token) = &token {
                body["nextPageToken"] = Value::String(token.clone());
            }
            let page: Value = self.post_json(&self.repo_url("entity/children"), &body)?;
            for item in page["page"].as_array().into_iter().flatten() {
                if let (Some(id), Some(name)) = (json_str(item, "id"), json_str(item, "name")) {
                    children.push(EntityHeader {
                        id: id.parse()?,
                        name,
                        entity_type: json_str(item, "type").unwrap_or_default(),
                    });
                }
            }
            token = json_str(&page, "nextPageToken");
            if token.is_none() {
                break;
            }
        }
        Ok(children)
    }

    fn store_folder(&self, name: &str, parent: &SynapseId) -> Result<Entity, BridgeError> {
        let (id, created) = self.create_or_lookup(&json!({
            "concreteType": FOLDER_TYPE,
            "name": name,
            "parentId": parent.as_str(),
        }))?;
        tracing::debug!(%id, created, "stored folder {name}");
        self.get_entity(&id, None)
    }

    fn store_file(&self, path: &Path, parent: &SynapseId) -> Result<Entity, BridgeError> {
        let handle_id = self.upload_file_handle(path)?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        let (id, created) = self.create_or_lookup(&json!({
            "concreteType": FILE_TYPE,
            "name": name,
            "parentId": parent.as_str(),
            "dataFileHandleId": handle_id,
        }))?;
        if !created {
            let url = self.repo_url(&format!("entity/{id}"));
            let mut raw: Value = self.get_json(&url, &[])?;
            if json_str(&raw, "dataFileHandleId").as_deref() != Some(handle_id.as_str()) {
                raw["dataFileHandleId"] = Value::String(handle_id);
                let _: Value = self.put_json(&url, &[("newVersion", "true".to_string())], &raw)?;
            }
        }
        let mut entity = self.get_entity(&id, None)?;
        entity.path = Some(path.to_path_buf());
        Ok(entity)
    }

    fn store_annotations(&self, entity: &Entity) -> Result<Entity, BridgeError> {
        let body = json!({
            "id": entity.id.as_str(),
            "etag": entity.annotations_etag,
            "annotations": annotations_to_json(&entity.annotations),
        });
        let stored: Value = self.put_json(
            &self.repo_url(&format!("entity/{}/annotations2", entity.id)),
            &[],
            &body,
        )?;
        let mut updated = entity.clone();
        updated.annotations = annotations_from_json(&stored["annotations"]);
        updated.annotations_etag = json_str(&stored, "etag");
        Ok(updated)
    }

    fn table_query(&self, table: &SynapseId, sql: &str) -> Result<TableRows, BridgeError> {
        let started: Value = self.post_json(
            &self.repo_url(&format!("entity/{table}/table/query/async/start")),
            &json!({
                "concreteType": "org.sagebionetworks.repo.model.table.QueryBundleRequest",
                "entityId": table.as_str(),
                "query": { "sql": sql },
                "partMask": 1,
            }),
        )?;
        let token = json_str(&started, "token")
            .ok_or_else(|| BridgeError::CommonsHttp("table query returned no job token".to_string()))?;
        let url = self.repo_url(&format!("entity/{table}/table/query/async/get/{token}"));
        for attempt in 0..MAX_JOB_POLLS {
            let response = http::send_with_retries(|| self.client.get(&url), BridgeError::CommonsHttp)?;
            if response.status() == StatusCode::ACCEPTED {
                thread::sleep(Duration::from_millis(250 * u64::from(attempt.min(8) + 1)));
                continue;
            }
            let bundle: Value = decode(http::check_status(response, status_error)?)?;
            if json_str(&bundle["queryResult"], "nextPageToken").is_some() {
                tracing::warn!(%table, "table query truncated to its first page");
            }
            return Ok(table_rows_from_json(&bundle["queryResult"]["queryResults"]));
        }
        Err(BridgeError::CommonsHttp(format!(
            "table query on {table} did not finish"
        )))
    }

    fn submission_bundles(
        &self,
        evaluation_id: &str,
        status: &SubmissionStatus,
        offset: usize,
        limit: usize,
    ) -> Result<BundlePage, BridgeError> {
        let page: Value = self.get_json(
            &self.repo_url(&format!("evaluation/{evaluation_id}/submission/bundle/all")),
            &[
                ("status", status.to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        bundle_page_from_json(&page)
    }

    fn get_submission(&self, id: &str, download_dir: &Path) -> Result<Submission, BridgeError> {
        let raw: Value = self.get_json(&self.repo_url(&format!("evaluation/submission/{id}")), &[])?;
        let mut submission = submission_from_json(&raw)?;
        if let Some((handle_id, file_name)) = submission_file_handle(&raw) {
            let url = self.get_text(
                &self.repo_url(&format!("evaluation/submission/{id}/file/{handle_id}")),
                &[("redirect", "false".to_string())],
            )?;
            let destination = download_dir.join(sanitize_file_name(&file_name));
            self.download_url(&url, &destination)?;
            submission.descriptor_path = Some(destination);
        }
        Ok(submission)
    }

    fn store_submission_state(
        &self,
        state: &SubmissionState,
    ) -> Result<SubmissionState, BridgeError> {
        let stored: Value = self.put_json(
            &self.repo_url(&format!("evaluation/submission/{}/status", state.submission_id)),
            &[],
            &state_to_json(state),
        )?;
        state_from_json(&stored)
    }
}

fn status_error(status: u16, message: String) -> BridgeError {
    BridgeError::CommonsStatus { status, message }
}

fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BridgeError> {
    response
        .json()
        .map_err(|err| BridgeError::CommonsHttp(err.to_string()))
}

fn json_str(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn md5_hex(file: &mut File) -> Result<String, BridgeError> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    file.seek(SeekFrom::Start(0))
        .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn content_type(file_name: &str) -> &'static str {
    if file_name.ends_with(".gz") {
        "application/gzip"
    } else if file_name.ends_with(".json") {
        "application/json"
    } else if file_name.ends_with(".tsv") || file_name.ends_with(".txt") {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Last path component of a remote name, safe to join under a local dir.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        "download".to_string()
    } else {
        base.to_string()
    }
}

/// Annotations v2 wire shape: `{key: {"type": ..., "value": [...]}}`.
pub fn annotations_from_json(value: &Value) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    let Some(map) = value.as_object() else {
        return out;
    };
    for (key, entry) in map {
        let values = entry["value"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text.clone()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.insert(key.clone(), values);
    }
    out
}

pub fn annotations_to_json(annotations: &BTreeMap<String, Vec<String>>) -> Value {
    let map = annotations
        .iter()
        .map(|(key, values)| {
            (
                key.clone(),
                json!({ "type": "STRING", "value": values }),
            )
        })
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

fn entity_from_json(raw: &Value, annotations: &Value) -> Result<Entity, BridgeError> {
    let id = json_str(raw, "id")
        .ok_or_else(|| BridgeError::CommonsHttp("entity without id".to_string()))?
        .parse()?;
    Ok(Entity {
        id,
        name: json_str(raw, "name").unwrap_or_default(),
        parent_id: json_str(raw, "parentId").and_then(|value| value.parse().ok()),
        concrete_type: json_str(raw, "concreteType").unwrap_or_default(),
        etag: json_str(raw, "etag"),
        path: None,
        annotations: annotations_from_json(&annotations["annotations"]),
        annotations_etag: json_str(annotations, "etag"),
    })
}

pub fn table_rows_from_json(results: &Value) -> TableRows {
    let headers = results["headers"]
        .as_array()
        .map(|headers| {
            headers
                .iter()
                .map(|header| json_str(header, "name").unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let rows = results["rows"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row["values"]
                        .as_array()
                        .map(|values| {
                            values
                                .iter()
                                .map(|value| value.as_str().map(|text| text.to_string()))
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();
    TableRows { headers, rows }
}

fn submission_from_json(raw: &Value) -> Result<Submission, BridgeError> {
    Ok(Submission {
        id: json_str(raw, "id")
            .ok_or_else(|| BridgeError::CommonsHttp("submission without id".to_string()))?,
        evaluation_id: json_str(raw, "evaluationId").unwrap_or_default(),
        name: json_str(raw, "name"),
        entity_id: json_str(raw, "entityId"),
        version_number: raw["versionNumber"].as_i64(),
        descriptor_path: None,
    })
}

/// File handle attached to a submission, read from its entity bundle.
fn submission_file_handle(raw: &Value) -> Option<(String, String)> {
    let bundle: Value = match &raw["entityBundleJSON"] {
        Value::String(text) => serde_json::from_str(text).ok()?,
        Value::Object(_) => raw["entityBundleJSON"].clone(),
        _ => return None,
    };
    let handle = bundle["fileHandles"].as_array()?.first()?;
    Some((json_str(handle, "id")?, json_str(handle, "fileName")?))
}

pub fn state_from_json(raw: &Value) -> Result<SubmissionState, BridgeError> {
    let annotations = annotations_from_json(&raw["submissionAnnotations"]["annotations"])
        .into_iter()
        .map(|(key, values)| (key, values.join(",")))
        .collect();
    Ok(SubmissionState {
        submission_id: json_str(raw, "id")
            .ok_or_else(|| BridgeError::CommonsHttp("submission status without id".to_string()))?,
        etag: json_str(raw, "etag").unwrap_or_default(),
        status: SubmissionStatus::from(json_str(raw, "status").unwrap_or_default()),
        status_version: raw["statusVersion"].as_i64(),
        annotations,
        annotations_etag: json_str(&raw["submissionAnnotations"], "etag"),
    })
}

pub fn state_to_json(state: &SubmissionState) -> Value {
    let annotations = state
        .annotations
        .iter()
        .map(|(key, value)| (key.clone(), vec![value.clone()]))
        .collect::<BTreeMap<_, _>>();
    let mut submission_annotations = json!({
        "id": state.submission_id,
        "annotations": annotations_to_json(&annotations),
    });
    if let Some(etag) = &state.annotations_etag {
        submission_annotations["etag"] = Value::String(etag.clone());
    }
    let mut body = json!({
        "id": state.submission_id,
        "etag": state.etag,
        "status": state.status.as_str(),
        "submissionAnnotations": submission_annotations,
    });
    if let Some(version) = state.status_version {
        body["statusVersion"] = json!(version);
    }
    body
}

pub fn bundle_page_from_json(page: &Value) -> Result<BundlePage, BridgeError> {
    let mut bundles = Vec::new();
    for item in page["results"].as_array().into_iter().flatten() {
        bundles.push(SubmissionBundle {
            submission: submission_from_json(&item["submission"])?,
            state: state_from_json(&item["submissionStatus"])?,
        });
    }
    Ok(BundlePage {
        total: page["totalNumberOfResults"]
            .as_u64()
            .map(|value| value as usize)
            .unwrap_or(bundles.len()),
        bundles,
    })
}
