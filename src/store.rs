use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::Serialize;

use crate::domain::SrrId;
use crate::error::BridgeError;

/// Local working area (`./.synbridge`) and the per-user cache
/// (`~/.cache/synbridge`).
#[derive(Debug, Clone)]
pub struct Store {
    work_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, BridgeError> {
        let cwd =
            std::env::current_dir().map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        let work_root = Utf8PathBuf::from_path_buf(cwd.join(".synbridge"))
            .map_err(|_| BridgeError::Filesystem("invalid working path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("synbridge")).ok()
            })
            .ok_or_else(|| {
                BridgeError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            work_root,
            cache_root,
        })
    }

    pub fn new_with_paths(work_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            work_root,
            cache_root,
        }
    }

    pub fn work_root(&self) -> &Utf8Path {
        &self.work_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn sra_run_dir(&self, run: &SrrId) -> Utf8PathBuf {
        self.work_root.join("sra").join(run.as_str())
    }

    /// Cached GEO text record, keyed by accession and the requested target.
    pub fn geo_text_path(&self, accession: &str, target: &str) -> Utf8PathBuf {
        self.cache_root
            .join("geo")
            .join(format!("{accession}.{target}.txt"))
    }

    pub fn drs_dir(&self) -> Utf8PathBuf {
        self.work_root.join("drs")
    }

    pub fn report_path(&self, label: &str, at: DateTime<Utc>) -> Utf8PathBuf {
        let label: String = label
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' })
            .collect();
        self.work_root
            .join("reports")
            .join(format!("{label}-{}.json", at.format("%Y%m%dT%H%M%SZ")))
    }

    pub fn read_text(path: &Utf8Path) -> Option<String> {
        fs::read_to_string(path.as_std_path()).ok()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BridgeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), BridgeError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn remove_dir(path: &Utf8Path) -> Result<(), BridgeError> {
        if path.as_std_path().exists() {
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| BridgeError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new_with_paths(
            Utf8PathBuf::from("/work/.synbridge"),
            Utf8PathBuf::from("/home/u/.cache/synbridge"),
        );
        let run: SrrId = "SRR3308970".parse().unwrap();
        assert!(store.sra_run_dir(&run).ends_with("sra/SRR3308970"));
        assert!(
            store
                .geo_text_path("GSE79842", "self")
                .ends_with("geo/GSE79842.self.txt")
        );
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        assert!(
            store
                .report_path("queue 9614", at)
                .ends_with("reports/queue_9614-20260301T123005Z.json")
        );
    }
}
