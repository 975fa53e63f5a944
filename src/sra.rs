use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::domain::SrrId;
use crate::error::BridgeError;

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub prefetch: Option<String>,
    pub fasterq_dump: Option<String>,
}

/// The SRA Toolkit steps the archive mirror needs.
pub trait SraToolkit: Send + Sync {
    /// Downloads the run archive into `dir` and returns the `.sra` path.
    fn prefetch(&self, run: &SrrId, dir: &Path) -> Result<PathBuf, BridgeError>;
    /// Converts an `.sra` archive into FASTQ files in `dir`.
    fn fasterq_dump(&self, sra: &Path, dir: &Path) -> Result<Vec<PathBuf>, BridgeError>;
    /// Gzips `path` next to itself and removes the original.
    fn compress(&self, path: &Path) -> Result<PathBuf, BridgeError> {
        gzip_file(path)
    }
    fn tool_info(&self) -> ToolInfo;
}

#[derive(Debug, Clone)]
pub enum SraToolStatus {
    Ready,
    Missing { message: String },
}

#[derive(Clone)]
pub struct SystemSraToolkit {
    prefetch: Option<PathBuf>,
    fasterq_dump: Option<PathBuf>,
}

impl SystemSraToolkit {
    pub fn new() -> Self {
        Self {
            prefetch: find_in_path("prefetch"),
            fasterq_dump: find_in_path("fasterq-dump"),
        }
    }

    pub fn tool_status(&self) -> SraToolStatus {
        match (&self.prefetch, &self.fasterq_dump) {
            (None, _) => SraToolStatus::Missing {
                message: "missing prefetch (SRA Toolkit)".to_string(),
            },
            (_, None) => SraToolStatus::Missing {
                message: "missing fasterq-dump (SRA Toolkit)".to_string(),
            },
            _ => SraToolStatus::Ready,
        }
    }

    fn run_cmd(&self, program: &Path, args: &[String]) -> Result<(), BridgeError> {
        tracing::debug!(program = %program.display(), ?args, "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| BridgeError::SraConversion(err.to_string()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", program.display())
        } else {
            stderr
        };
        Err(BridgeError::SraConversion(message))
    }
}

impl Default for SystemSraToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl SraToolkit for SystemSraToolkit {
    fn prefetch(&self, run: &SrrId, dir: &Path) -> Result<PathBuf, BridgeError> {
        let prefetch = self
            .prefetch
            .as_ref()
            .ok_or_else(|| BridgeError::MissingTool("prefetch".to_string()))?;
        fs::create_dir_all(dir).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        let args = vec![
            run.as_str().to_string(),
            "--output-directory".to_string(),
            dir.to_string_lossy().to_string(),
        ];
        self.run_cmd(prefetch, &args)?;
        find_exts(dir, "sra").into_iter().next().ok_or_else(|| {
            BridgeError::SraConversion(format!("prefetch did not produce an .sra file for {run}"))
        })
    }

    fn fasterq_dump(&self, sra: &Path, dir: &Path) -> Result<Vec<PathBuf>, BridgeError> {
        let fasterq = self
            .fasterq_dump
            .as_ref()
            .ok_or_else(|| BridgeError::MissingTool("fasterq-dump".to_string()))?;
        let args = vec![
            sra.to_string_lossy().to_string(),
            "--split-files".to_string(),
            "--outdir".to_string(),
            dir.to_string_lossy().to_string(),
        ];
        self.run_cmd(fasterq, &args)?;
        let mut fastq = find_exts(dir, "fastq");
        fastq.sort();
        if fastq.is_empty() {
            return Err(BridgeError::SraConversion(format!(
                "fasterq-dump produced no FASTQ for {}",
                sra.display()
            )));
        }
        Ok(fastq)
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo {
            prefetch: self
                .prefetch
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
            fasterq_dump: self
                .fasterq_dump
                .as_ref()
                .and_then(|path| tool_version(path, &["--version"])),
        }
    }
}

/// Writes `<path>.gz` and removes `path` once the archive is complete.
pub fn gzip_file(path: &Path) -> Result<PathBuf, BridgeError> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let input = File::open(path)
        .map_err(|err| BridgeError::Filesystem(format!("open {}: {err}", path.display())))?;
    let output = File::create(&target)
        .map_err(|err| BridgeError::Filesystem(format!("create {}: {err}", target.display())))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)
        .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
    fs::remove_file(path).map_err(|err| BridgeError::Filesystem(err.to_string()))?;
    Ok(target)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn tool_version(path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new(path).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}

/// Files below `root` with extension `ext`, case-insensitive.
pub fn find_exts(root: &Path, ext: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let Ok(entries) = fs::read_dir(&path) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .and_then(|value| value.to_str())
                .is_some_and(|value| value.eq_ignore_ascii_case(ext))
            {
                out.push(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn gzip_replaces_source() {
        let dir = tempfile::tempdir().unwrap();
        let fastq = dir.path().join("SRR1_1.fastq");
        fs::write(&fastq, b"@r1\nACGT\n+\nIIII\n").unwrap();

        let gz = gzip_file(&fastq).unwrap();
        assert_eq!(gz, dir.path().join("SRR1_1.fastq.gz"));
        assert!(!fastq.exists());

        let mut text = String::new();
        GzDecoder::new(File::open(&gz).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.starts_with("@r1"));
    }

    #[test]
    fn find_exts_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("SRR1")).unwrap();
        fs::write(dir.path().join("SRR1").join("SRR1.sra"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let found = find_exts(dir.path(), "SRA");
        assert_eq!(found.len(), 1);
    }
}
