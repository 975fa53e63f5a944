use crate::domain::{AppFilter, AppRef, Project};
use crate::error::BridgeError;
use crate::execution::ExecutionClient;

/// Returns the project with exactly this name, creating it when absent.
///
/// Lookup and creation are two calls; two concurrent callers can both miss
/// the lookup and create duplicates.
pub fn get_or_create_project<E: ExecutionClient + ?Sized>(
    exec: &E,
    name: &str,
) -> Result<Project, BridgeError> {
    if let Some(project) = exec
        .list_projects(Some(name))?
        .into_iter()
        .find(|project| project.name == name)
    {
        tracing::debug!(project = %project.id, "reusing project {name}");
        return Ok(project);
    }
    let project = exec.create_project(name)?;
    tracing::info!(project = %project.id, "created project {name}");
    Ok(project)
}

/// Reuses an app named `name` in `project`, or copies the public app of that
/// name into it. Same-name apps resolve to the first one listed.
pub fn copy_or_get_app<E: ExecutionClient + ?Sized>(
    exec: &E,
    name: &str,
    project: &Project,
) -> Result<AppRef, BridgeError> {
    let public = first_named(exec.list_apps(&AppFilter::Public)?, name, "public")
        .ok_or_else(|| BridgeError::AppNotFound(name.to_string()))?;

    let filter = AppFilter::Project(project.id.clone());
    if let Some(existing) = first_named(exec.list_apps(&filter)?, name, "project") {
        tracing::debug!(app = %existing.id, "reusing app {name}");
        return Ok(existing);
    }

    let copied = exec.copy_app(&public, project, name)?;
    tracing::info!(app = %copied.id, source = %public.id, "copied app {name}");
    if first_named(exec.list_apps(&filter)?, name, "project").is_none() {
        tracing::warn!(app = %copied.id, "copied app not listed in {} yet", project.name);
    }
    Ok(copied)
}

fn first_named(apps: Vec<AppRef>, name: &str, scope: &str) -> Option<AppRef> {
    let mut matches = apps.into_iter().filter(|app| app.name == name);
    let first = matches.next()?;
    let others = matches.count();
    if others > 0 {
        tracing::warn!(app = %first.id, others, "several {scope} apps named {name}; using the first");
    }
    Some(first)
}
