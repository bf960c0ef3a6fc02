//! Receipt text extraction via poppler's `pdftotext`.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use meily_core::{errors::Error, ports::TextExtractor, Result};
use tokio::process::Command;
use tracing::{debug, warn};

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Runs `pdftotext -layout <file> -` and returns trimmed, non-empty lines.
#[derive(Clone, Debug)]
pub struct PdftotextExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl PdftotextExtractor {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn scratch_path() -> PathBuf {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("meily-receipt-{}-{n}.pdf", std::process::id()))
    }

    async fn run(&self, path: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-layout")
            .arg(path)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::External(format!(
                    "{} timed out after {:?}",
                    self.program.display(),
                    self.timeout
                ))
            })?
            .map_err(|e| Error::External(format!("failed to run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::External(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Trim every line and drop the blank ones.
pub fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl TextExtractor for PdftotextExtractor {
    async fn extract_lines(&self, pdf: &[u8]) -> Result<Vec<String>> {
        let path = Self::scratch_path();
        tokio::fs::write(&path, pdf).await?;

        let result = self.run(&path).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove scratch receipt");
        }

        let lines = split_lines(&result?);
        debug!(lines = lines.len(), "receipt text extracted");
        Ok(lines)
    }
}
