use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AppResult, BatchReport, ProgressEvent, ProgressSink, ProjectResult};
use crate::archive::{AnnotateReport, MirrorReport};
use crate::drs::DrsDownload;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_batch(result: &BatchReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_project(result: &ProjectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_app(result: &AppResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_mirror(result: &MirrorReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_annotate(result: &AnnotateReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_drs(result: &DrsDownload) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::debug!("{}", event.message),
        }
    }
}
