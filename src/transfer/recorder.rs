//! Append-only per-run transcript of job outcomes

use crate::error::Result;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Writes one line per completed job. Each line goes out in a single write
/// followed by a flush, so an interrupted run leaves only whole lines.
#[derive(Debug)]
pub struct ResultRecorder {
    path: PathBuf,
    file: File,
}

impl ResultRecorder {
    /// Create `{dir}/{prefix}_{YYYYmmdd_HHMMSS}.log`
    pub fn create(dir: &Path, prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = format!("{}_{}.log", prefix, Local::now().format("%Y%m%d_%H%M%S"));
        Self::open(&dir.join(name))
    }

    /// Open an existing transcript, or start one, in append mode
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, reference: &str, outcome: &str, elapsed: Duration) -> Result<()> {
        self.record_at(Local::now(), reference, outcome, elapsed)
    }

    pub fn record_at(
        &mut self,
        at: DateTime<Local>,
        reference: &str,
        outcome: &str,
        elapsed: Duration,
    ) -> Result<()> {
        let line = format_line(at, reference, outcome, elapsed);
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

pub fn format_line(at: DateTime<Local>, reference: &str, outcome: &str, elapsed: Duration) -> String {
    format!(
        "{}, {}, {}, Elapsed time: {:.2} seconds\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        reference,
        outcome,
        elapsed.as_secs_f64()
    )
}
