#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use synbridge::app::{ProgressEvent, ProgressSink};
use synbridge::commons::{BundlePage, CommonsClient, Entity, EntityHeader, TableRows, UserProfile};
use synbridge::domain::{
    AppFilter, AppRef, FileRef, Project, Submission, SubmissionBundle, SubmissionState,
    SubmissionStatus, SynapseId, Task, TaskRequest, TaskStatus,
};
use synbridge::error::BridgeError;
use synbridge::execution::ExecutionClient;
use synbridge::monitor::{CancellationToken, Clock};

pub fn syn(value: &str) -> SynapseId {
    value.parse().unwrap()
}

pub fn file(id: &str, name: &str) -> FileRef {
    FileRef {
        id: id.to_string(),
        name: name.to_string(),
        size: None,
    }
}

pub fn bundle(id: &str, status: SubmissionStatus) -> SubmissionBundle {
    SubmissionBundle {
        submission: Submission {
            id: id.to_string(),
            evaluation_id: "9614112".to_string(),
            name: None,
            entity_id: None,
            version_number: None,
            descriptor_path: None,
        },
        state: SubmissionState {
            submission_id: id.to_string(),
            etag: format!("etag-{id}"),
            status,
            status_version: Some(1),
            annotations: BTreeMap::new(),
            annotations_etag: None,
        },
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for CollectingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

/// Records sleeps. With `cancel_on_sleep` set to `(n, token)` the n-th sleep
/// cancels the token, as a user pressing `q` mid-wait would.
#[derive(Default)]
pub struct FakeClock {
    pub sleeps: Mutex<Vec<Duration>>,
    pub cancel_on_sleep: Option<(usize, CancellationToken)>,
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration, _cancel: &CancellationToken) {
        let mut sleeps = self.sleeps.lock().unwrap();
        sleeps.push(duration);
        if let Some((nth, token)) = &self.cancel_on_sleep {
            if sleeps.len() == *nth {
                token.cancel();
            }
        }
    }
}

/// Execution platform double. Tasks walk through `task_statuses` one poll
/// at a time and finish with `task_outputs`.
#[derive(Default)]
pub struct FakeExec {
    pub projects: Mutex<Vec<Project>>,
    pub public_apps: Vec<AppRef>,
    pub project_apps: Mutex<Vec<AppRef>>,
    pub task_statuses: Mutex<VecDeque<TaskStatus>>,
    pub task_outputs: BTreeMap<String, Option<FileRef>>,
    pub project_files: Mutex<Vec<FileRef>>,
    /// File names registered twice on upload, to simulate duplicates.
    pub duplicate_uploads: Vec<String>,
    /// Uploads that never show up in the listing.
    pub hidden_uploads: Vec<String>,
    pub failing_downloads: Vec<String>,
    pub downloads: Mutex<Vec<PathBuf>>,
    pub created_tasks: Mutex<Vec<TaskRequest>>,
    pub uploads: Mutex<Vec<PathBuf>>,
    pub task_gets: Mutex<usize>,
}

impl FakeExec {
    pub fn with_app(name: &str) -> Self {
        Self {
            public_apps: vec![AppRef {
                id: "admin/public/rnaseq".to_string(),
                name: name.to_string(),
                project: None,
            }],
            ..Self::default()
        }
    }

    pub fn statuses(self, statuses: &[TaskStatus]) -> Self {
        *self.task_statuses.lock().unwrap() = statuses.iter().cloned().collect();
        self
    }
}

impl ExecutionClient for FakeExec {
    fn list_projects(&self, name: Option<&str>) -> Result<Vec<Project>, BridgeError> {
        Ok(self
            .projects
            .lock()
            .unwrap()
            .iter()
            .filter(|project| name.is_none_or(|name| project.name == name))
            .cloned()
            .collect())
    }

    fn create_project(&self, name: &str) -> Result<Project, BridgeError> {
        let project = Project {
            id: format!("user/{}", name.to_lowercase()),
            name: name.to_string(),
        };
        self.projects.lock().unwrap().push(project.clone());
        Ok(project)
    }

    fn list_apps(&self, filter: &AppFilter) -> Result<Vec<AppRef>, BridgeError> {
        match filter {
            AppFilter::Public => Ok(self.public_apps.clone()),
            AppFilter::Project(id) => Ok(self
                .project_apps
                .lock()
                .unwrap()
                .iter()
                .filter(|app| app.project.as_deref() == Some(id.as_str()))
                .cloned()
                .collect()),
        }
    }

    fn copy_app(
        &self,
        _app: &AppRef,
        project: &Project,
        name: &str,
    ) -> Result<AppRef, BridgeError> {
        let copied = AppRef {
            id: format!("{}/rnaseq", project.id),
            name: name.to_string(),
            project: Some(project.id.clone()),
        };
        self.project_apps.lock().unwrap().push(copied.clone());
        Ok(copied)
    }

    fn create_task(&self, request: &TaskRequest) -> Result<Task, BridgeError> {
        let mut created = self.created_tasks.lock().unwrap();
        created.push(request.clone());
        Ok(Task {
            id: format!("task-{}", created.len()),
            name: request.name.clone(),
            status: TaskStatus::Queued,
            outputs: BTreeMap::new(),
        })
    }

    fn get_task(&self, id: &str) -> Result<Task, BridgeError> {
        *self.task_gets.lock().unwrap() += 1;
        let status = self
            .task_statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TaskStatus::Completed);
        let outputs = if !status.is_in_progress() {
            self.task_outputs.clone()
        } else {
            BTreeMap::new()
        };
        Ok(Task {
            id: id.to_string(),
            name: id.to_string(),
            status,
            outputs,
        })
    }

    fn upload_file(&self, path: &Path, _project: &Project) -> Result<FileRef, BridgeError> {
        self.uploads.lock().unwrap().push(path.to_path_buf());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let mut files = self.project_files.lock().unwrap();
        let uploaded = file(&format!("file-{}", files.len() + 1), &name);
        if !self.hidden_uploads.contains(&name) {
            files.push(uploaded.clone());
            if self.duplicate_uploads.contains(&name) {
                let next = files.len() + 1;
                files.push(file(&format!("file-{next}"), &name));
            }
        }
        Ok(uploaded)
    }

    fn list_files(
        &self,
        _project: &Project,
        name: Option<&str>,
    ) -> Result<Vec<FileRef>, BridgeError> {
        Ok(self
            .project_files
            .lock()
            .unwrap()
            .iter()
            .filter(|file| name.is_none_or(|name| file.name == name))
            .cloned()
            .collect())
    }

    fn download_file(&self, file: &FileRef, destination: &Path) -> Result<(), BridgeError> {
        self.downloads.lock().unwrap().push(destination.to_path_buf());
        if self.failing_downloads.contains(&file.name) {
            return Err(BridgeError::ExecutionStatus {
                status: 404,
                message: format!("{} not found", file.id),
            });
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(destination, format!("content of {}", file.id)).unwrap();
        Ok(())
    }
}

/// Data-commons double backed by in-memory maps.
#[derive(Default)]
pub struct FakeCommons {
    pub bundles: Vec<SubmissionBundle>,
    /// Submission id to the JSON text of its attached file.
    pub descriptors: HashMap<String, String>,
    /// Entity id to file name.
    pub files: HashMap<SynapseId, String>,
    pub entity_annotations: HashMap<SynapseId, BTreeMap<String, Vec<String>>>,
    /// Rows returned for any query against the keyed table.
    pub tables: HashMap<SynapseId, TableRows>,
    pub states: Mutex<Vec<SubmissionState>>,
    pub folders: Mutex<Vec<(String, SynapseId)>>,
    pub stored_files: Mutex<Vec<(String, SynapseId, String)>>,
    pub annotated: Mutex<Vec<Entity>>,
    pub queries: Mutex<Vec<String>>,
    pub page_requests: Mutex<Vec<(usize, usize)>>,
    pub entity_fetches: Mutex<usize>,
    pub next_id: Mutex<u64>,
}

impl FakeCommons {
    fn next_id(&self) -> SynapseId {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        syn(&format!("syn{}", 9000 + *next))
    }

    pub fn last_state(&self) -> Option<SubmissionState> {
        self.states.lock().unwrap().last().cloned()
    }

    pub fn stored_file_names(&self) -> Vec<String> {
        self.stored_files
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    fn entity(&self, id: &SynapseId, name: &str, path: Option<PathBuf>) -> Entity {
        Entity {
            id: id.clone(),
            name: name.to_string(),
            parent_id: None,
            concrete_type: "org.sagebionetworks.repo.model.FileEntity".to_string(),
            etag: Some("etag".to_string()),
            path,
            annotations: self.entity_annotations.get(id).cloned().unwrap_or_default(),
            annotations_etag: Some("annotations-etag".to_string()),
        }
    }
}

impl CommonsClient for FakeCommons {
    fn login(&self) -> Result<UserProfile, BridgeError> {
        Ok(UserProfile {
            owner_id: "3324230".to_string(),
            user_name: "runner".to_string(),
        })
    }

    fn get_entity(&self, id: &SynapseId, download_dir: Option<&Path>) -> Result<Entity, BridgeError> {
        *self.entity_fetches.lock().unwrap() += 1;
        let name = self.files.get(id).ok_or_else(|| BridgeError::CommonsStatus {
            status: 404,
            message: format!("{id} not found"),
        })?;
        let path = match download_dir {
            Some(dir) => {
                let path = dir.join(name);
                fs::write(&path, format!("content of {id}")).unwrap();
                Some(path)
            }
            None => None,
        };
        Ok(self.entity(id, name, path))
    }

    fn get_children(&self, _parent: &SynapseId) -> Result<Vec<EntityHeader>, BridgeError> {
        Ok(Vec::new())
    }

    fn store_folder(&self, name: &str, parent: &SynapseId) -> Result<Entity, BridgeError> {
        self.folders
            .lock()
            .unwrap()
            .push((name.to_string(), parent.clone()));
        let id = self.next_id();
        let mut folder = self.entity(&id, name, None);
        folder.parent_id = Some(parent.clone());
        Ok(folder)
    }

    fn store_file(&self, path: &Path, parent: &SynapseId) -> Result<Entity, BridgeError> {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let content = fs::read_to_string(path).unwrap_or_default();
        self.stored_files
            .lock()
            .unwrap()
            .push((name.clone(), parent.clone(), content));
        let id = self.next_id();
        Ok(self.entity(&id, &name, None))
    }

    fn store_annotations(&self, entity: &Entity) -> Result<Entity, BridgeError> {
        self.annotated.lock().unwrap().push(entity.clone());
        Ok(entity.clone())
    }

    fn table_query(&self, table: &SynapseId, sql: &str) -> Result<TableRows, BridgeError> {
        self.queries.lock().unwrap().push(sql.to_string());
        let rows = self.tables.get(table).cloned().unwrap_or_default();
        // Only rows whose name column matches the `like '<prefix>%'` clause.
        let Some(prefix) = sql
            .split("like '")
            .nth(1)
            .and_then(|rest| rest.split('%').next())
        else {
            return Ok(rows);
        };
        let name_index = rows.headers.iter().position(|header| header == "name");
        let filtered = rows
            .rows
            .iter()
            .filter(|row| match name_index {
                Some(index) => row
                    .get(index)
                    .cloned()
                    .flatten()
                    .is_some_and(|name| name.starts_with(prefix)),
                None => true,
            })
            .cloned()
            .collect();
        Ok(TableRows {
            headers: rows.headers,
            rows: filtered,
        })
    }

    fn submission_bundles(
        &self,
        _evaluation_id: &str,
        status: &SubmissionStatus,
        offset: usize,
        limit: usize,
    ) -> Result<BundlePage, BridgeError> {
        self.page_requests.lock().unwrap().push((offset, limit));
        let matching: Vec<SubmissionBundle> = self
            .bundles
            .iter()
            .filter(|bundle| &bundle.state.status == status)
            .cloned()
            .collect();
        Ok(BundlePage {
            total: matching.len(),
            bundles: matching.into_iter().skip(offset).take(limit).collect(),
        })
    }

    fn get_submission(&self, id: &str, download_dir: &Path) -> Result<Submission, BridgeError> {
        let descriptor_path = match self.descriptors.get(id) {
            Some(text) => {
                let path = download_dir.join("inputs.json");
                fs::write(&path, text).unwrap();
                Some(path)
            }
            None => None,
        };
        Ok(Submission {
            id: id.to_string(),
            evaluation_id: "9614112".to_string(),
            name: Some(format!("{id}.json")),
            entity_id: Some("syn500".to_string()),
            version_number: Some(1),
            descriptor_path,
        })
    }

    fn store_submission_state(
        &self,
        state: &SubmissionState,
    ) -> Result<SubmissionState, BridgeError> {
        let mut stored = state.clone();
        stored.etag = format!("{}-next", state.etag);
        self.states.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

pub fn descriptor(value: Value) -> String {
    value.to_string()
}
