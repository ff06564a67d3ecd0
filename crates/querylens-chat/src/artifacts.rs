//! Attributing a result file to a turn.
//!
//! Resolution runs three stages in order: the file name the agent announced,
//! then the newest result file written since the pre-stream snapshot, then
//! regeneration by re-running the turn's SQL.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use querylens_core::config::ArtifactConfig;
use querylens_core::ArtifactRef;

use crate::agent::{ArtifactStore, QueryTable, SqlExecutor};
use crate::error::ChatError;

/// Prefix of generated result file names.
pub const RESULT_FILE_PREFIX: &str = "query_results";

/// State of the results directory just before a turn starts streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSnapshot {
    /// The newest candidate file and its modification time, if any.
    pub newest: Option<(PathBuf, SystemTime)>,
    pub taken_at: SystemTime,
}

/// Outcome of [`ArtifactLocator::resolve`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub artifact: Option<ArtifactRef>,
    /// Set when regeneration was attempted and the SQL failed to run.
    pub execution_failure: Option<String>,
}

/// Finds result files under one results directory.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    results_dir: PathBuf,
    extension: String,
    window: Duration,
}

impl ArtifactLocator {
    pub fn new(results_dir: impl Into<PathBuf>, extension: &str, window: Duration) -> Self {
        Self {
            results_dir: results_dir.into(),
            extension: extension.trim_start_matches('.').to_lowercase(),
            window,
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(
            &config.results_dir,
            &config.extension,
            Duration::from_secs(config.recency_window_secs),
        )
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record the newest candidate file before streaming starts.
    pub fn snapshot(&self) -> ArtifactSnapshot {
        let newest = self
            .candidates()
            .into_iter()
            .max_by_key(|(_, modified)| *modified);
        ArtifactSnapshot {
            newest,
            taken_at: SystemTime::now(),
        }
    }

    /// A file named `name` anywhere under the results directory, matched
    /// exactly first and then case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Option<PathBuf> {
        let direct = self.results_dir.join(name);
        if direct.is_file() {
            return Some(direct);
        }
        let files = walk_files(&self.results_dir);
        if let Some(exact) = files.iter().find(|p| file_name_of(p) == name) {
            return Some(exact.clone());
        }
        let lowered = name.to_lowercase();
        files
            .into_iter()
            .find(|p| file_name_of(p).to_lowercase() == lowered)
    }

    /// The most recently modified candidate written since `snapshot` and
    /// within `window` of now.
    pub fn find_recent(&self, snapshot: &ArtifactSnapshot, window: Duration) -> Option<PathBuf> {
        let now = SystemTime::now();
        self.candidates()
            .into_iter()
            .filter(|(_, modified)| age(now, *modified) <= window)
            .filter(|(path, modified)| match &snapshot.newest {
                None => true,
                Some((old_path, old_modified)) => {
                    modified > old_modified || (path != old_path && modified >= old_modified)
                }
            })
            .max_by_key(|(_, modified)| *modified)
            .map(|(path, _)| path)
    }

    /// Attribute a result file to the turn.
    ///
    /// Regeneration only runs when the first two stages miss, `sql` is
    /// present and an executor is available. An empty result table produces
    /// no file.
    pub async fn resolve(
        &self,
        announced: Option<&str>,
        snapshot: &ArtifactSnapshot,
        sql: Option<&str>,
        executor: Option<&dyn SqlExecutor>,
        store: &dyn ArtifactStore,
    ) -> Resolution {
        if let Some(name) = announced {
            if let Some(path) = self.find_by_name(name) {
                debug!(file = %path.display(), "Artifact found by announced name");
                return Resolution {
                    artifact: Some(store.reference(&path)),
                    execution_failure: None,
                };
            }
            debug!(name, "Announced artifact not found on disk");
        }

        if let Some(path) = self.find_recent(snapshot, self.window) {
            debug!(file = %path.display(), "Artifact found by recency");
            return Resolution {
                artifact: Some(store.reference(&path)),
                execution_failure: None,
            };
        }

        let (Some(sql), Some(executor)) = (sql.filter(|s| !s.trim().is_empty()), executor) else {
            return Resolution::default();
        };

        match executor.run_sql(sql).await {
            Ok(table) if table.is_empty() => {
                debug!("Regenerated query returned no rows");
                Resolution::default()
            }
            Ok(table) => match store.save(sql, &table) {
                Ok(artifact) => {
                    info!(url = %artifact.url, rows = table.rows.len(), "Artifact regenerated");
                    Resolution {
                        artifact: Some(artifact),
                        execution_failure: None,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to save regenerated artifact");
                    Resolution::default()
                }
            },
            Err(e) => {
                warn!(error = %e, "Regenerating artifact failed");
                Resolution {
                    artifact: None,
                    execution_failure: Some(e.to_string()),
                }
            }
        }
    }

    fn candidates(&self) -> Vec<(PathBuf, SystemTime)> {
        walk_files(&self.results_dir)
            .into_iter()
            .filter(|p| {
                p.extension()
                    .map(|e| e.to_string_lossy().to_lowercase() == self.extension)
                    .unwrap_or(false)
            })
            .filter_map(|p| {
                let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((p, modified))
            })
            .collect()
    }
}

/// CSV-file backed [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct CsvArtifactStore {
    results_dir: PathBuf,
    url_prefix: String,
}

impl CsvArtifactStore {
    pub fn new(results_dir: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            results_dir: results_dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(&config.results_dir, &config.url_prefix)
    }

    /// Deterministic file name for the results of `sql`.
    pub fn file_name_for(sql: &str) -> String {
        let digest = hex::encode(Sha256::digest(sql.as_bytes()));
        format!("{}_{}.csv", RESULT_FILE_PREFIX, &digest[..8])
    }
}

impl ArtifactStore for CsvArtifactStore {
    fn save(&self, sql: &str, table: &QueryTable) -> Result<ArtifactRef, ChatError> {
        fs::create_dir_all(&self.results_dir)?;
        let path = self.results_dir.join(Self::file_name_for(sql));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        debug!(file = %path.display(), rows = table.rows.len(), "Result file written");
        Ok(self.reference(&path))
    }

    fn reference(&self, path: &Path) -> ArtifactRef {
        ArtifactRef {
            path: path.to_path_buf(),
            url: format!("{}/{}", self.url_prefix, file_name_of(path)),
        }
    }
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_dir() => pending.push(path),
                Ok(t) if t.is_file() => files.push(path),
                _ => {}
            }
        }
    }
    files.sort();
    files
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}
