use std::collections::BTreeMap;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::commons::CommonsClient;
use crate::domain::{GeoSeriesId, SrrId, SynapseId};
use crate::error::BridgeError;
use crate::geo::{GeoClient, RunRecord, series_runs};
use crate::monitor::CancellationToken;
use crate::sra::SraToolkit;
use crate::store::Store;

/// GEO sample keys copied onto FASTQ entities, with their annotation names.
pub const SAMPLE_KEY_RENAMES: &[(&str, &str)] = &[
    ("source_name_ch1", "source_name"),
    ("organism_ch1", "organism"),
    ("platform_id", "platform_id"),
    ("instrument_model", "instrument_model"),
    ("library_selection", "library_selection"),
    ("library_source", "library_source"),
    ("library_strategy", "library_strategy"),
    ("title", "specimen_id"),
];

#[derive(Debug, Clone, Serialize)]
pub struct MirroredRun {
    pub series: GeoSeriesId,
    pub run: SrrId,
    pub uploaded: Vec<SynapseId>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesFailure {
    pub series: GeoSeriesId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorReport {
    pub runs: Vec<MirroredRun>,
    pub series_failures: Vec<SeriesFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedEntity {
    pub run: SrrId,
    pub entity_id: SynapseId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateFailure {
    pub run: Option<SrrId>,
    pub series: GeoSeriesId,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotateReport {
    pub annotated: Vec<AnnotatedEntity>,
    pub unmatched_runs: Vec<SrrId>,
    pub failures: Vec<AnnotateFailure>,
}

/// Mirrors GEO series runs from SRA into the data commons and annotates the
/// stored FASTQ files with their sample metadata.
pub struct ArchiveSync<C: CommonsClient, S: SraToolkit, G: GeoClient> {
    commons: C,
    sra: S,
    geo: G,
    store: Store,
    cancel: CancellationToken,
}

impl<C: CommonsClient, S: SraToolkit, G: GeoClient> ArchiveSync<C, S, G> {
    pub fn new(commons: C, sra: S, geo: G, store: Store) -> Self {
        Self {
            commons,
            sra,
            geo,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn commons(&self) -> &C {
        &self.commons
    }

    pub fn mirror(
        &self,
        series: &[GeoSeriesId],
        fastq_parent: &SynapseId,
        sink: &dyn ProgressSink,
    ) -> Result<MirrorReport, BridgeError> {
        let mut report = MirrorReport::default();
        for gse in series {
            sink.event(ProgressEvent {
                message: format!("phase=Archive; resolving runs of {gse}"),
                elapsed: None,
            });
            let records = match series_runs(&self.geo, gse) {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(series = %gse, error = %err, "series lookup failed");
                    report.series_failures.push(SeriesFailure {
                        series: gse.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            for record in records {
                if self.cancel.is_cancelled() {
                    return Err(BridgeError::Cancelled(format!("mirroring {gse}")));
                }
                report.runs.push(self.mirror_run(&record, fastq_parent, sink));
            }
        }
        Ok(report)
    }

    fn mirror_run(
        &self,
        record: &RunRecord,
        fastq_parent: &SynapseId,
        sink: &dyn ProgressSink,
    ) -> MirroredRun {
        let mut mirrored = MirroredRun {
            series: record.series.clone(),
            run: record.run.clone(),
            uploaded: Vec::new(),
            error: None,
        };
        let dir = self.store.sra_run_dir(&record.run);
        let result = self.transfer_run(&record.run, &dir, fastq_parent, &mut mirrored.uploaded, sink);
        if let Err(err) = Store::remove_dir(&dir) {
            tracing::warn!(run = %record.run, error = %err, "unable to clean run directory");
        }
        if let Err(err) = result {
            tracing::warn!(run = %record.run, error = %err, "run mirror failed");
            mirrored.error = Some(err.to_string());
        }
        mirrored
    }

    fn transfer_run(
        &self,
        run: &SrrId,
        dir: &camino::Utf8Path,
        fastq_parent: &SynapseId,
        uploaded: &mut Vec<SynapseId>,
        sink: &dyn ProgressSink,
    ) -> Result<(), BridgeError> {
        sink.event(ProgressEvent {
            message: format!("phase=Archive; prefetch {run}"),
            elapsed: None,
        });
        let sra = self.sra.prefetch(run, dir.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("phase=Archive; fasterq-dump {run}"),
            elapsed: None,
        });
        let fastq_files = self.sra.fasterq_dump(&sra, dir.as_std_path())?;
        for fastq in fastq_files {
            let gz = self.sra.compress(&fastq)?;
            sink.event(ProgressEvent {
                message: format!("phase=Archive; upload {}", gz.display()),
                elapsed: None,
            });
            let entity = self.commons.store_file(&gz, fastq_parent)?;
            uploaded.push(entity.id);
            std::fs::remove_file(&gz).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        }
        std::fs::remove_file(&sra).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn annotate(
        &self,
        series: &[GeoSeriesId],
        fastq_table: &SynapseId,
        s3_prefix: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateReport, BridgeError> {
        let mut report = AnnotateReport::default();
        for gse in series {
            sink.event(ProgressEvent {
                message: format!("phase=Archive; annotating runs of {gse}"),
                elapsed: None,
            });
            let records = match series_runs(&self.geo, gse) {
                Ok(records) => records,
                Err(err) => {
                    report.failures.push(AnnotateFailure {
                        run: None,
                        series: gse.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            for record in records {
                if self.cancel.is_cancelled() {
                    return Err(BridgeError::Cancelled(format!("annotating {gse}")));
                }
                match self.annotate_run(&record, fastq_table, s3_prefix) {
                    Ok(entities) if entities.is_empty() => {
                        report.unmatched_runs.push(record.run.clone())
                    }
                    Ok(entities) => report.annotated.extend(entities),
                    Err(err) => report.failures.push(AnnotateFailure {
                        run: Some(record.run.clone()),
                        series: gse.clone(),
                        message: err.to_string(),
                    }),
                }
            }
        }
        Ok(report)
    }

    fn annotate_run(
        &self,
        record: &RunRecord,
        fastq_table: &SynapseId,
        s3_prefix: Option<&str>,
    ) -> Result<Vec<AnnotatedEntity>, BridgeError> {
        let annotations = build_run_annotations(record);
        let rows = self
            .commons
            .table_query(fastq_table, &run_files_query(fastq_table, &record.run))?;
        let mut annotated = Vec::new();
        for id in rows.column("id") {
            let id: SynapseId = id.parse()?;
            let mut entity = self.commons.get_entity(&id, None)?;
            for (key, value) in &annotations {
                entity.annotations.insert(key.clone(), vec![value.clone()]);
            }
            if let Some(prefix) = s3_prefix {
                entity.annotations.insert(
                    "s3_path".to_string(),
                    vec![format!("{prefix}/{}", entity.name)],
                );
            }
            let stored = self.commons.store_annotations(&entity)?;
            tracing::debug!(run = %record.run, entity = %stored.id, "annotated");
            annotated.push(AnnotatedEntity {
                run: record.run.clone(),
                entity_id: stored.id,
                name: stored.name,
            });
        }
        Ok(annotated)
    }
}

pub fn run_files_query(table: &SynapseId, run: &SrrId) -> String {
    format!("select id from {table} where name like '{run}%'")
}

pub fn patient_id_for(specimen_id: Option<&str>) -> &'static str {
    match specimen_id {
        Some(specimen) if specimen.starts_with("HTP") => "HTP",
        _ => "cell line",
    }
}

/// Accessions plus the renamed sample metadata. Keys missing from the sample
/// record are left out.
pub fn build_run_annotations(record: &RunRecord) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert("gse_id".to_string(), record.series.to_string());
    annotations.insert("gsm_id".to_string(), record.sample.to_string());
    annotations.insert("sra_id".to_string(), record.run.to_string());
    for (source, target) in SAMPLE_KEY_RENAMES {
        if let Some(value) = record.metadata.get(*source).and_then(|values| values.first()) {
            annotations.insert(target.to_string(), value.clone());
        }
    }
    let patient = patient_id_for(annotations.get("specimen_id").map(String::as_str));
    annotations.insert("patient_id".to_string(), patient.to_string());
    annotations
}
