//! Job history
//!
//! Every accounted job is appended to a JSON array in the data folder for
//! later audit. A missing or corrupt history file starts a fresh list.

use crate::accounting::PrintJob;
use spoolbridge_common::fs::{file_lock, write_json_atomic};
use spoolbridge_common::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct JobHistory {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl JobHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = file_lock(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All recorded jobs, oldest first
    pub fn load(&self) -> Vec<PrintJob> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_file()
    }

    /// Append `job` and rewrite the file
    pub fn append(&self, job: &PrintJob) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut jobs = self.read_file();
        jobs.push(job.clone());
        write_json_atomic(&self.path, &jobs)?;
        info!(
            job_id = ?job.job_id,
            total = jobs.len(),
            "Job saved to {}",
            self.path.display()
        );
        Ok(jobs.len())
    }

    fn read_file(&self) -> Vec<PrintJob> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Job history {} unreadable ({}), starting empty", self.path.display(), e);
                return Vec::new();
            }
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Job history {} is corrupt ({}), starting empty", self.path.display(), e);
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_accumulates() {
        let dir = TempDir::new().unwrap();
        let history = JobHistory::new(dir.path().join("tasks.json"));
        assert!(history.load().is_empty());

        let first = PrintJob {
            job_id: Some("1".into()),
            ..PrintJob::default()
        };
        let second = PrintJob {
            job_id: Some("2".into()),
            percent_complete: 100.0,
            ..PrintJob::default()
        };
        assert_eq!(history.append(&first).unwrap(), 1);
        assert_eq!(history.append(&second).unwrap(), 2);

        assert_eq!(history.load(), vec![first, second]);
    }

    #[test]
    fn test_corrupt_history_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "not json").unwrap();
        let history = JobHistory::new(&path);

        assert!(history.load().is_empty());
        assert_eq!(history.append(&PrintJob::default()).unwrap(), 1);
    }
}
