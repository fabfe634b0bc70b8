//! Output sinks for completed transactions.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mars_core::Transaction;
use parking_lot::Mutex;
use tracing::info;

use crate::error::Result;
use crate::sink::Output;

/// Logs a one-line summary of each transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

impl Output for LogOutput {
    fn write(&self, tx: &Transaction) -> Result<()> {
        let outcome = match (tx.status(), tx.error()) {
            (Some(status), _) => status.to_string(),
            (None, Some(error)) => format!("error: {}", error),
            (None, None) => "-".to_string(),
        };

        info!(
            target: "mars::transaction",
            id = %tx.id,
            client = %tx.client_ip,
            server = %tx.server_ip,
            duration_ms = tx.duration.as_millis() as u64,
            "{} {} {}",
            tx.request.method,
            tx.request.url,
            outcome
        );
        Ok(())
    }
}

/// Appends each transaction as one JSON document per line.
pub struct JsonLinesOutput {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesOutput {
    /// Opens `path` for appending, creating it and its parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Output for JsonLinesOutput {
    fn write(&self, tx: &Transaction) -> Result<()> {
        let line = serde_json::to_vec(tx)?;

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Writes to every inner output.
///
/// All outputs are attempted; the first error is returned.
#[derive(Default, Clone)]
pub struct FanOutOutput {
    outputs: Vec<Arc<dyn Output>>,
}

impl FanOutOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an output.
    pub fn with(mut self, output: Arc<dyn Output>) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Output for FanOutOutput {
    fn write(&self, tx: &Transaction) -> Result<()> {
        let mut first_error = None;
        for output in &self.outputs {
            if let Err(e) = output.write(tx) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::fixtures::sample_transaction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl Output for Counting {
        fn write(&self, _tx: &Transaction) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Output for Failing {
        fn write(&self, _tx: &Transaction) -> Result<()> {
            Err(StorageError::Backend("sink offline".to_string()))
        }
    }

    #[test]
    fn log_output_accepts_any_transaction() {
        let mut tx = sample_transaction("http://a.test/");
        assert!(LogOutput.write(&tx).is_ok());

        tx.record_error("timed out");
        assert!(LogOutput.write(&tx).is_ok());
    }

    #[test]
    fn json_lines_appends_one_line_per_transaction() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out").join("tx.jsonl");
        let output = JsonLinesOutput::open(&path).unwrap();

        output.write(&sample_transaction("http://a.test/1")).unwrap();
        output.write(&sample_transaction("http://a.test/2")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: Transaction = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.request.url, "http://a.test/2");
    }

    #[test]
    fn fan_out_attempts_every_output() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let fan_out = FanOutOutput::new()
            .with(Arc::new(Failing))
            .with(counter.clone());

        let result = fan_out.write(&sample_transaction("http://a.test/"));

        assert!(result.is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_fan_out_is_ok() {
        let fan_out = FanOutOutput::new();
        assert!(fan_out.is_empty());
        assert!(fan_out.write(&sample_transaction("http://a.test/")).is_ok());
    }
}
