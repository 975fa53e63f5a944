use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::http;

pub const DEFAULT_DRS_HOST: &str = "https://cavatica-ga4gh-api.sbgenomics.com";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccessMethod {
    #[serde(default)]
    pub access_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DrsObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub access_methods: Vec<AccessMethod>,
}

#[derive(Debug, Deserialize)]
struct AccessUrl {
    url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrsDownload {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// GA4GH DRS v1 object lookup and transfer.
pub trait DrsClient: Send + Sync {
    fn get_object(&self, id: &str) -> Result<DrsObject, BridgeError>;
    fn access_url(&self, id: &str, access_id: &str) -> Result<String, BridgeError>;
    /// Streams `url` into `destination`, returning the byte count.
    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, BridgeError>;
}

#[derive(Clone)]
pub struct DrsHttpClient {
    client: Client,
    transfer: Client,
    host: String,
}

impl DrsHttpClient {
    pub fn new(auth_token: &str, host: Option<&str>) -> Result<Self, BridgeError> {
        let client = http::build_client(
            &[("x-sbg-auth-token", auth_token.to_string())],
            Duration::from_secs(60),
            BridgeError::DrsHttp,
        )?;
        let transfer = http::build_client(&[], Duration::from_secs(600), BridgeError::DrsHttp)?;
        Ok(Self {
            client,
            transfer,
            host: host
                .unwrap_or(DEFAULT_DRS_HOST)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BridgeError> {
        let url = format!("{}/ga4gh/drs/v1/{path}", self.host);
        let response = http::send_with_retries(|| self.client.get(&url), BridgeError::DrsHttp)?;
        http::check_status(response, status_error)?
            .json()
            .map_err(|err| BridgeError::DrsHttp(err.to_string()))
    }
}

impl DrsClient for DrsHttpClient {
    fn get_object(&self, id: &str) -> Result<DrsObject, BridgeError> {
        self.get_json(&format!("objects/{id}"))
    }

    fn access_url(&self, id: &str, access_id: &str) -> Result<String, BridgeError> {
        let access: AccessUrl = self.get_json(&format!("objects/{id}/access/{access_id}"))?;
        Ok(access.url)
    }

    fn fetch(&self, url: &str, destination: &Path) -> Result<u64, BridgeError> {
        let response = http::send_with_retries(|| self.transfer.get(url), BridgeError::DrsHttp)?;
        let mut response = http::check_status(response, status_error)?;
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        }
        let mut out =
            File::create(destination).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        io::copy(&mut response, &mut out).map_err(|err| BridgeError::Filesystem(err.to_string()))
    }
}

fn status_error(status: u16, message: String) -> BridgeError {
    BridgeError::DrsStatus { status, message }
}

/// Resolves the object, takes its first access method and writes the content
/// to `<dir>/<object name>`.
pub fn download_object<D: DrsClient + ?Sized>(
    drs: &D,
    id: &str,
    dir: &Path,
) -> Result<DrsDownload, BridgeError> {
    let object = drs.get_object(id)?;
    let access_id = object
        .access_methods
        .iter()
        .find_map(|method| method.access_id.clone())
        .ok_or_else(|| BridgeError::DrsHttp(format!("object {id} has no access id")))?;
    let url = drs.access_url(id, &access_id)?;

    let name = Path::new(&object.name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(id)
        .to_string();
    let path = dir.join(&name);
    let bytes = drs.fetch(&url, &path)?;
    tracing::info!(id, bytes, path = %path.display(), "DRS object downloaded");
    Ok(DrsDownload {
        id: object.id,
        name,
        path,
        bytes,
    })
}
