use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tempfile::Builder;

use crate::commons::CommonsClient;
use crate::config::{QueueSettings, ResolvedConfig};
use crate::domain::{
    AppRef, Project, SubmissionBundle, SubmissionStatus, SynapseId, TaskRequest,
};
use crate::error::BridgeError;
use crate::execution::ExecutionClient;
use crate::intake::{SubmissionQueue, read_descriptor};
use crate::monitor::{
    CancellationToken, Clock, PollPolicy, SystemClock, final_submission_status, wait_for_terminal,
};
use crate::provision::{copy_or_get_app, get_or_create_project};
use crate::returns::{ReturnFailure, ReturnedFile, return_results};
use crate::staging::stage_inputs;

pub const TASK_ID_ANNOTATION: &str = "task_id";
pub const TASK_OUTPUT_ANNOTATION: &str = "task_output";

/// Everything one queue run needs beyond the clients.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub project: String,
    pub app: String,
    pub result_parent: SynapseId,
    pub queue: QueueSettings,
    pub poll: PollPolicy,
    pub excluded_suffixes: Vec<String>,
}

impl RunSettings {
    pub fn from_config(
        config: &ResolvedConfig,
        queue_override: Option<&str>,
        max_polls_override: Option<u32>,
    ) -> Result<Self, BridgeError> {
        let mut queue = match (config.queue.clone(), queue_override) {
            (Some(mut queue), Some(id)) => {
                queue.evaluation_id = id.to_string();
                queue
            }
            (Some(queue), None) => queue,
            (None, Some(id)) => QueueSettings {
                evaluation_id: id.to_string(),
                status: SubmissionStatus::Received,
                page_size: 50,
            },
            (None, None) => {
                return Err(BridgeError::ConfigParse(
                    "queue.evaluation_id is required to run a queue".to_string(),
                ));
            }
        };
        queue.page_size = queue.page_size.max(1);
        let result_parent = config.result_parent.clone().ok_or_else(|| {
            BridgeError::ConfigParse("commons.result_parent is required to run a queue".to_string())
        })?;
        let mut poll = config.poll;
        if max_polls_override.is_some() {
            poll.max_polls = max_polls_override;
        }
        Ok(Self {
            project: config.project.clone(),
            app: config.app.clone(),
            result_parent,
            queue,
            poll,
            excluded_suffixes: config.excluded_suffixes.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub evaluation_id: String,
    pub status_filter: String,
    pub project: Project,
    pub app: AppRef,
    pub started_at: String,
    pub finished_at: String,
    pub cancelled: bool,
    /// Set when an error stopped the run before the queue was drained.
    pub aborted: Option<BatchAbort>,
    pub outcomes: Vec<SubmissionOutcome>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .count()
    }

    /// Turns an aborted run into its error once the report has been kept.
    pub fn abort_error(&self) -> Option<BridgeError> {
        self.aborted.as_ref().map(|abort| BridgeError::BatchAborted {
            submission_id: abort.submission_id.clone(),
            message: abort.error.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchAbort {
    pub submission_id: String,
    pub error_kind: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmissionOutcome {
    pub submission_id: String,
    pub status: Option<SubmissionStatus>,
    pub task_id: Option<String>,
    pub task_status: Option<String>,
    pub result_folder: Option<SynapseId>,
    pub returned: Vec<ReturnedFile>,
    pub excluded: Vec<String>,
    pub return_failures: Vec<ReturnFailure>,
    pub error_kind: Option<&'static str>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectResult {
    pub project: Project,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppResult {
    pub project: Project,
    pub app: AppRef,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Run,
    Project,
    App,
    Archive,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Drives evaluation-queue submissions through staging, execution and
/// result return.
#[derive(Clone)]
pub struct App<E: ExecutionClient, C: CommonsClient> {
    exec: E,
    commons: C,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl<E: ExecutionClient, C: CommonsClient> App<E, C> {
    pub fn new(exec: E, commons: C) -> Self {
        Self {
            exec,
            commons,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn exec(&self) -> &E {
        &self.exec
    }

    pub fn commons(&self) -> &C {
        &self.commons
    }

    pub fn ensure_project(
        &self,
        name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<ProjectResult, BridgeError> {
        sink.event(ProgressEvent {
            message: format!("phase=Intake; project {name}"),
            elapsed: None,
        });
        Ok(ProjectResult {
            project: get_or_create_project(&self.exec, name)?,
        })
    }

    pub fn ensure_app(
        &self,
        name: &str,
        project: &str,
        sink: &dyn ProgressSink,
    ) -> Result<AppResult, BridgeError> {
        let project = self.ensure_project(project, sink)?.project;
        sink.event(ProgressEvent {
            message: format!("phase=Intake; app {name}"),
            elapsed: None,
        });
        let app = copy_or_get_app(&self.exec, name, &project)?;
        Ok(AppResult { project, app })
    }

    /// Processes every submission of the queue that carries the configured
    /// status. Failures are recorded per submission. An unsupported task
    /// status or a cancellation stops the run, and the report returned so far
    /// carries `aborted`.
    pub fn run_queue(
        &self,
        settings: &RunSettings,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, BridgeError> {
        let started_at = Utc::now().to_rfc3339();
        let AppResult { project, app } = self.ensure_app(&settings.app, &settings.project, sink)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Intake; queue {} status {}",
                settings.queue.evaluation_id, settings.queue.status
            ),
            elapsed: None,
        });
        // Statuses change while processing, which would shift offset paging.
        let bundles = SubmissionQueue::new(
            &self.commons,
            settings.queue.evaluation_id.clone(),
            settings.queue.status.clone(),
            settings.queue.page_size,
        )
        .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            evaluation_id = %settings.queue.evaluation_id,
            count = bundles.len(),
            "submissions to process"
        );

        let mut outcomes = Vec::with_capacity(bundles.len());
        let mut cancelled = false;
        let mut aborted = None;
        for bundle in bundles {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let mut outcome = SubmissionOutcome {
                submission_id: bundle.submission.id.clone(),
                ..SubmissionOutcome::default()
            };
            let started = Instant::now();
            match self.process_submission(bundle, &project, &app, settings, &mut outcome, sink) {
                Ok(()) => {
                    sink.event(ProgressEvent {
                        message: format!(
                            "submission {} done: {}",
                            outcome.submission_id,
                            outcome.status.as_ref().map(|s| s.as_str()).unwrap_or("-")
                        ),
                        elapsed: Some(started.elapsed()),
                    });
                }
                Err(err) if err.aborts_batch() => {
                    tracing::error!(submission = %outcome.submission_id, error = %err, "aborting run");
                    cancelled = matches!(err, BridgeError::Cancelled(_));
                    outcome.error_kind = Some(err.kind());
                    outcome.error = Some(err.to_string());
                    aborted = Some(BatchAbort {
                        submission_id: outcome.submission_id.clone(),
                        error_kind: err.kind(),
                        error: err.to_string(),
                    });
                    outcomes.push(outcome);
                    break;
                }
                Err(err) => {
                    tracing::warn!(submission = %outcome.submission_id, error = %err, "submission failed");
                    outcome.error_kind = Some(err.kind());
                    outcome.error = Some(err.to_string());
                }
            }
            outcomes.push(outcome);
        }

        Ok(BatchReport {
            evaluation_id: settings.queue.evaluation_id.clone(),
            status_filter: settings.queue.status.to_string(),
            project,
            app,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
            cancelled,
            aborted,
            outcomes,
        })
    }

    fn process_submission(
        &self,
        bundle: SubmissionBundle,
        project: &Project,
        app: &AppRef,
        settings: &RunSettings,
        outcome: &mut SubmissionOutcome,
        sink: &dyn ProgressSink,
    ) -> Result<(), BridgeError> {
        let SubmissionBundle { submission, mut state } = bundle;
        sink.event(ProgressEvent {
            message: format!("phase=Intake; submission {}", submission.id),
            elapsed: None,
        });

        let scratch = Builder::new()
            .prefix("synbridge-intake")
            .tempdir()
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        let submission = self.commons.get_submission(&submission.id, scratch.path())?;
        let inputs = read_descriptor(submission.descriptor_path.as_deref())?;

        let inputs = stage_inputs(&self.commons, &self.exec, &inputs, project, sink)?;

        sink.event(ProgressEvent {
            message: format!("phase=Execute; creating task for {}", submission.id),
            elapsed: None,
        });
        let task = self.exec.create_task(&TaskRequest {
            name: submission.id.clone(),
            project: project.clone(),
            app: app.clone(),
            inputs,
            run: true,
        })?;
        outcome.task_id = Some(task.id.clone());
        tracing::info!(submission = %submission.id, task_id = %task.id, "task created");

        let folder = self.commons.store_folder(&task.id, &settings.result_parent)?;
        outcome.result_folder = Some(folder.id.clone());
        state.status = SubmissionStatus::EvaluationInProgress;
        state
            .annotations
            .insert(TASK_ID_ANNOTATION.to_string(), task.id.clone());
        state
            .annotations
            .insert(TASK_OUTPUT_ANNOTATION.to_string(), folder.id.to_string());
        let mut state = self.commons.store_submission_state(&state)?;
        outcome.status = Some(state.status.clone());

        let finished = wait_for_terminal(
            &self.exec,
            &task.id,
            &settings.poll,
            self.clock.as_ref(),
            &self.cancel,
            sink,
        )?;
        outcome.task_status = Some(finished.status.to_string());
        let status = final_submission_status(&finished.id, &finished.status)?;

        state.status = status;
        let state = self.commons.store_submission_state(&state)?;
        outcome.status = Some(state.status.clone());
        tracing::info!(submission = %submission.id, status = %state.status, "submission status stored");

        let report = return_results(
            &self.commons,
            &self.exec,
            &finished.outputs,
            &settings.excluded_suffixes,
            &folder.id,
            sink,
        )?;
        outcome.returned = report.returned;
        outcome.excluded = report.excluded;
        outcome.return_failures = report.failures;
        Ok(())
    }
}
