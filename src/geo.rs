use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use serde::Serialize;

use crate::domain::{GeoSampleId, GeoSeriesId, SrrId};
use crate::error::BridgeError;
use crate::http;
use crate::store::Store;

const GEO_TEXT_URL: &str = "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi";
const EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

pub type SoftMetadata = BTreeMap<String, Vec<String>>;

/// GEO records and the SRA experiment to run mapping.
pub trait GeoClient: Send + Sync {
    /// Quick text view of a GEO accession (`targ=self`).
    fn fetch_text(&self, accession: &str) -> Result<String, BridgeError>;
    /// Run accessions registered under an SRA experiment (`SRX...`).
    fn experiment_runs(&self, experiment: &str) -> Result<Vec<SrrId>, BridgeError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub series: GeoSeriesId,
    pub sample: GeoSampleId,
    pub run: SrrId,
    #[serde(skip)]
    pub metadata: SoftMetadata,
}

#[derive(Clone)]
pub struct GeoHttpClient {
    client: Client,
    cache: Option<Store>,
}

impl GeoHttpClient {
    pub fn new(cache: Option<Store>) -> Result<Self, BridgeError> {
        let client = http::build_client(&[], Duration::from_secs(60), BridgeError::GeoHttp)?;
        Ok(Self { client, cache })
    }

    fn get_text(&self, url: &str, params: &[(&str, String)]) -> Result<String, BridgeError> {
        let response =
            http::send_with_retries(|| self.client.get(url).query(params), BridgeError::GeoHttp)?;
        http::check_status(response, |status, message| BridgeError::GeoStatus {
            status,
            message,
        })?
        .text()
        .map_err(|err| BridgeError::GeoHttp(err.to_string()))
    }
}

impl GeoClient for GeoHttpClient {
    fn fetch_text(&self, accession: &str) -> Result<String, BridgeError> {
        let cached = self
            .cache
            .as_ref()
            .map(|store| store.geo_text_path(accession, "self"));
        if let Some(text) = cached.as_deref().and_then(Store::read_text) {
            tracing::debug!(accession, "GEO text from cache");
            return Ok(text);
        }

        let text = self.get_text(
            GEO_TEXT_URL,
            &[
                ("acc", accession.to_string()),
                ("targ", "self".to_string()),
                ("form", "text".to_string()),
                ("view", "quick".to_string()),
            ],
        )?;
        if !text.contains('!') {
            return Err(BridgeError::GeoStatus {
                status: 404,
                message: format!("no GEO record for {accession}"),
            });
        }
        if let Some(path) = cached {
            if let Err(err) = Store::write_bytes_atomic(&path, text.as_bytes()) {
                tracing::warn!(accession, error = %err, "unable to cache GEO text");
            }
        }
        Ok(text)
    }

    fn experiment_runs(&self, experiment: &str) -> Result<Vec<SrrId>, BridgeError> {
        let search = self.get_text(
            &format!("{EUTILS_URL}/esearch.fcgi"),
            &[
                ("db", "sra".to_string()),
                ("term", experiment.to_string()),
                ("retmode", "json".to_string()),
            ],
        )?;
        let search: serde_json::Value = serde_json::from_str(&search)
            .map_err(|err| BridgeError::GeoHttp(format!("esearch {experiment}: {err}")))?;
        let ids: Vec<String> = search["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let summary = self.get_text(
            &format!("{EUTILS_URL}/esummary.fcgi"),
            &[
                ("db", "sra".to_string()),
                ("id", ids.join(",")),
                ("retmode", "json".to_string()),
            ],
        )?;
        Ok(extract_runs(&summary))
    }
}

/// `!Prefix_key = value` lines of a GEO text record, keyed without the
/// prefix. Repeated keys keep every value in order.
pub fn parse_soft(text: &str) -> SoftMetadata {
    let mut out = SoftMetadata::new();
    for line in text.lines() {
        let Some(rest) = line.strip_prefix('!') else {
            continue;
        };
        let Some((key, value)) = rest.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = key.split_once('_').map(|(_, key)| key).unwrap_or(key);
        out.entry(key.to_string())
            .or_default()
            .push(value.trim().to_string());
    }
    out
}

pub fn series_samples(metadata: &SoftMetadata) -> Vec<GeoSampleId> {
    metadata
        .get("sample_id")
        .into_iter()
        .flatten()
        .filter_map(|value| value.parse().ok())
        .collect()
}

/// SRA experiment accessions linked from a sample's `relation` lines.
pub fn sample_experiments(metadata: &SoftMetadata) -> Vec<String> {
    let Ok(regex) = Regex::new(r"\b[SED]RX\d+\b") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for relation in metadata.get("relation").into_iter().flatten() {
        if !relation.starts_with("SRA") {
            continue;
        }
        for found in regex.find_iter(relation) {
            out.push(found.as_str().to_string());
        }
    }
    out.dedup();
    out
}

pub fn extract_runs(text: &str) -> Vec<SrrId> {
    let Ok(regex) = Regex::new(r"\b[SED]RR\d+\b") else {
        return Vec::new();
    };
    let mut runs: Vec<String> = regex
        .find_iter(text)
        .map(|found| found.as_str().to_string())
        .collect();
    runs.sort();
    runs.dedup();
    runs.iter().filter_map(|run| run.parse().ok()).collect()
}

/// Every run of a series, GSE to GSM to SRX to SRR, with the sample metadata.
pub fn series_runs<G: GeoClient + ?Sized>(
    geo: &G,
    series: &GeoSeriesId,
) -> Result<Vec<RunRecord>, BridgeError> {
    let series_meta = parse_soft(&geo.fetch_text(series.as_str())?);
    let mut records = Vec::new();
    for sample in series_samples(&series_meta) {
        let metadata = parse_soft(&geo.fetch_text(sample.as_str())?);
        let experiments = sample_experiments(&metadata);
        if experiments.is_empty() {
            tracing::warn!(%series, %sample, "sample has no SRA experiment");
        }
        for experiment in experiments {
            for run in geo.experiment_runs(&experiment)? {
                records.push(RunRecord {
                    series: series.clone(),
                    sample: sample.clone(),
                    run,
                    metadata: metadata.clone(),
                });
            }
        }
    }
    tracing::info!(%series, runs = records.len(), "resolved series runs");
    Ok(records)
}
