use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{GeoSeriesId, SubmissionStatus, SynapseId};
use crate::error::BridgeError;
use crate::monitor::PollPolicy;

pub const CONFIG_FILE: &str = "synbridge.json";
pub const DEFAULT_SBG_ENDPOINT: &str = "https://cavatica-api.sbgenomics.com/v2";
pub const DEFAULT_SYNAPSE_REPO: &str = "https://repo-prod.prod.sagebase.org/repo/v1";
pub const DEFAULT_SYNAPSE_FILE: &str = "https://repo-prod.prod.sagebase.org/file/v1";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub commons: CommonsSection,
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub returns: ReturnsSection,
    #[serde(default)]
    pub archive: Option<ArchiveSection>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub billing_group: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CommonsSection {
    #[serde(default)]
    pub result_parent: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct QueueSection {
    pub evaluation_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PollSection {
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub max_polls: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReturnsSection {
    #[serde(default)]
    pub excluded_suffixes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ArchiveSection {
    #[serde(default)]
    pub series: Vec<String>,
    #[serde(default)]
    pub fastq_parent: Option<String>,
    #[serde(default)]
    pub fastq_table: Option<String>,
    #[serde(default)]
    pub s3_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub evaluation_id: String,
    pub status: SubmissionStatus,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub series: Vec<GeoSeriesId>,
    pub fastq_parent: Option<SynapseId>,
    pub fastq_table: Option<SynapseId>,
    pub s3_prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub profile: String,
    pub project: String,
    pub app: String,
    pub billing_group: Option<String>,
    pub result_parent: Option<SynapseId>,
    pub queue: Option<QueueSettings>,
    pub poll: PollPolicy,
    pub excluded_suffixes: Vec<String>,
    pub archive: Option<ArchiveSettings>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BridgeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(BridgeError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BridgeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BridgeError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BridgeError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(BridgeError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let result_parent = config
            .commons
            .result_parent
            .as_deref()
            .map(str::parse::<SynapseId>)
            .transpose()?;

        let queue = config.queue.map(|queue| QueueSettings {
            evaluation_id: queue.evaluation_id,
            status: queue
                .status
                .map(SubmissionStatus::from)
                .unwrap_or(SubmissionStatus::Received),
            page_size: queue.page_size.unwrap_or(50).max(1),
        });

        let default_poll = PollPolicy::default();
        let poll = PollPolicy {
            interval: config
                .poll
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default_poll.interval),
            max_polls: config.poll.max_polls.or(default_poll.max_polls),
        };

        let archive = config
            .archive
            .map(|archive| -> Result<ArchiveSettings, BridgeError> {
                Ok(ArchiveSettings {
                    series: archive
                        .series
                        .iter()
                        .map(|value| value.parse::<GeoSeriesId>())
                        .collect::<Result<Vec<_>, _>>()?,
                    fastq_parent: archive
                        .fastq_parent
                        .as_deref()
                        .map(str::parse::<SynapseId>)
                        .transpose()?,
                    fastq_table: archive
                        .fastq_table
                        .as_deref()
                        .map(str::parse::<SynapseId>)
                        .transpose()?,
                    s3_prefix: archive
                        .s3_prefix
                        .map(|prefix| prefix.trim_end_matches('/').to_string()),
                })
            })
            .transpose()?;

        Ok(ResolvedConfig {
            schema_version,
            profile: config
                .execution
                .profile
                .unwrap_or_else(|| "cavatica".to_string()),
            project: config.execution.project.unwrap_or_else(|| "Test".to_string()),
            app: config
                .execution
                .app
                .unwrap_or_else(|| "Kids First DRC RNAseq Workflow".to_string()),
            billing_group: config.execution.billing_group,
            result_parent,
            queue,
            poll,
            excluded_suffixes: config
                .returns
                .excluded_suffixes
                .unwrap_or_else(default_excluded_suffixes),
            archive,
        })
    }
}

pub fn default_excluded_suffixes() -> Vec<String> {
    vec![".bam".to_string()]
}

#[derive(Debug, Clone)]
pub struct ExecutionCredentials {
    pub api_endpoint: String,
    pub auth_token: String,
}

impl ExecutionCredentials {
    /// Environment first (`SB_AUTH_TOKEN`, `SB_API_ENDPOINT`), then the
    /// profile section of `~/.sevenbridges/credentials`.
    pub fn load(profile: &str) -> Result<Self, BridgeError> {
        let env_token = non_empty_env("SB_AUTH_TOKEN");
        let env_endpoint = non_empty_env("SB_API_ENDPOINT");
        if let Some(auth_token) = env_token {
            return Ok(Self {
                api_endpoint: env_endpoint.unwrap_or_else(|| DEFAULT_SBG_ENDPOINT.to_string()),
                auth_token,
            });
        }

        let path = home_file(&[".sevenbridges", "credentials"])?;
        let content = fs::read_to_string(&path).map_err(|_| {
            BridgeError::MissingCredentials(format!(
                "set SB_AUTH_TOKEN or create {}",
                path.display()
            ))
        })?;
        Self::from_ini(&content, profile)
            .map(|mut creds| {
                if let Some(endpoint) = env_endpoint {
                    creds.api_endpoint = endpoint;
                }
                creds
            })
    }

    pub fn from_ini(content: &str, profile: &str) -> Result<Self, BridgeError> {
        let section = ini_section(content, profile).ok_or_else(|| {
            BridgeError::MissingCredentials(format!("profile [{profile}] not found"))
        })?;
        let auth_token = section.get("auth_token").cloned().ok_or_else(|| {
            BridgeError::MissingCredentials(format!("profile [{profile}] has no auth_token"))
        })?;
        Ok(Self {
            api_endpoint: section
                .get("api_endpoint")
                .cloned()
                .unwrap_or_else(|| DEFAULT_SBG_ENDPOINT.to_string()),
            auth_token,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CommonsCredentials {
    pub auth_token: String,
    pub repo_endpoint: String,
    pub file_endpoint: String,
}

impl CommonsCredentials {
    /// `SYNAPSE_AUTH_TOKEN`, otherwise `authtoken` under `[authentication]`
    /// in `~/.synapseConfig`.
    pub fn load() -> Result<Self, BridgeError> {
        if let Some(token) = non_empty_env("SYNAPSE_AUTH_TOKEN") {
            return Ok(Self::with_token(token));
        }
        let path = home_file(&[".synapseConfig"])?;
        let content = fs::read_to_string(&path).map_err(|_| {
            BridgeError::MissingCredentials(format!(
                "set SYNAPSE_AUTH_TOKEN or create {}",
                path.display()
            ))
        })?;
        Self::from_ini(&content)
    }

    pub fn from_ini(content: &str) -> Result<Self, BridgeError> {
        ini_section(content, "authentication")
            .and_then(|section| section.get("authtoken").cloned())
            .map(Self::with_token)
            .ok_or_else(|| {
                BridgeError::MissingCredentials(
                    "no authtoken in [authentication] section".to_string(),
                )
            })
    }

    pub fn with_token(auth_token: String) -> Self {
        Self {
            auth_token,
            repo_endpoint: DEFAULT_SYNAPSE_REPO.to_string(),
            file_endpoint: DEFAULT_SYNAPSE_FILE.to_string(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn home_file(parts: &[&str]) -> Result<PathBuf, BridgeError> {
    let dirs = BaseDirs::new().ok_or_else(|| {
        BridgeError::MissingCredentials("unable to resolve home directory".to_string())
    })?;
    Ok(parts
        .iter()
        .fold(dirs.home_dir().to_path_buf(), |path, part| path.join(part)))
}

/// Key/value pairs of one `[section]` of an INI document.
pub fn ini_section(content: &str, section: &str) -> Option<BTreeMap<String, String>> {
    let mut current: Option<&str> = None;
    let mut found = false;
    let mut values = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            current = Some(name.trim());
            found |= name.trim() == section;
            continue;
        }
        if current != Some(section) {
            continue;
        }
        if let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    found.then_some(values)
}
