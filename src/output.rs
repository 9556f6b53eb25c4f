use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::metrics::METRICS;
use crate::schema::{CSV_HEADER, TraceResult};

/// Append-only CSV result stream.
///
/// One writer per run:
/// - The results directory is created if missing.
/// - The file name is unique per run (`<unix_millis>_results.csv`).
/// - The fixed header is written exactly once, at creation.
/// - Each record appends one line; rows are never updated or
///   deleted (merging across runs is an external concern).
///
/// CONCURRENCY:
/// - Credential shards append concurrently; the mutex keeps each
///   row a single uninterleaved line.
pub struct ResultsWriter {
    file: Mutex<File>,
    path: PathBuf,
}

impl ResultsWriter {
    /// Creates the results directory and a fresh output file with
    /// the header row.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating results dir {:?}", dir))?;

        let path = dir.join(format!(
            "{}_results.csv",
            chrono::Utc::now().timestamp_millis()
        ));

        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("creating output file {:?}", path))?;

        writeln!(file, "{}", CSV_HEADER)?;

        Ok(Self { file: Mutex::new(file), path })
    }

    /// Appends one record as a single CSV line.
    pub async fn append(&self, result: &TraceResult) -> Result<()> {
        let mut file = self.file.lock().await;
        writeln!(file, "{}", result.csv_row())?;
        METRICS.rows_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends a batch of records.
    pub async fn append_all(&self, results: &[TraceResult]) -> Result<()> {
        for r in results {
            self.append(r).await?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn header_once_then_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::create(dir.path()).unwrap();

        let r = TraceResult {
            balancer_id: Some("x1".into()),
            balancer_colocation_center: Some("AMS".into()),
            ..Default::default()
        };
        writer.append(&r).await.unwrap();
        writer.append(&r).await.unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains(",x1,"));
        assert_eq!(lines[1], lines[2]);
    }

    #[tokio::test]
    async fn file_name_is_timestamped_inside_the_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultsWriter::create(dir.path()).unwrap();

        let name = writer.path().file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_results.csv"));
        let stamp = name.trim_end_matches("_results.csv");
        assert!(stamp.parse::<i64>().is_ok());
        assert_eq!(writer.path().parent().unwrap(), dir.path());
    }
}
