use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_RECORDS: usize = 10_000;

/// How the response body was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeMode {
    Json,
    NativeStream,
    SynthesizedStream,
    Rejected,
}

/// One client exchange, as seen by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub timestamp: DateTime<Utc>,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub model: String,
    pub mode: ExchangeMode,
    pub status: u16,
    /// SSE frames written to the client; absent for JSON responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<usize>,
    pub elapsed_ms: u64,
}

impl ExchangeRecord {
    pub fn new(route: impl Into<String>, model: impl Into<String>, mode: ExchangeMode, status: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            route: route.into(),
            backend: None,
            model: model.into(),
            mode,
            status,
            frames: None,
            elapsed_ms: 0,
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    #[must_use]
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = Some(frames);
        self
    }

    #[must_use]
    pub fn with_elapsed(mut self, elapsed: std::time::Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Ring buffer of exchange records, persisted as JSONL.
pub struct Journal {
    records: VecDeque<ExchangeRecord>,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    /// Open (or create) the journal file and reload the most recent records.
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut records = VecDeque::with_capacity(MAX_RECORDS);

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(record) = serde_json::from_str::<ExchangeRecord>(&line) {
                    if records.len() >= MAX_RECORDS {
                        records.pop_front();
                    }
                    records.push_back(record);
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(file_path)?;

        Ok(Self {
            records,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A journal that keeps records in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: VecDeque::new(),
            writer: None,
        }
    }

    pub fn record(&mut self, record: ExchangeRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                if let Err(e) = writeln!(writer, "{json}").and_then(|()| writer.flush()) {
                    tracing::warn!(error = %e, "Failed to append to exchange journal");
                }
            }
        }
        if self.records.len() >= MAX_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ExchangeRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Journal::open(file_path)?))))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Journal::in_memory())))
    }

    /// Record an exchange and mirror it to the tracing log.
    pub fn record(&self, record: ExchangeRecord) {
        tracing::info!(
            route = %record.route,
            backend = record.backend.as_deref().unwrap_or("-"),
            model = %record.model,
            mode = ?record.mode,
            status = record.status,
            frames = ?record.frames,
            elapsed_ms = record.elapsed_ms,
            "Exchange completed"
        );
        if let Ok(mut journal) = self.0.lock() {
            journal.record(record);
        }
    }

    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<ExchangeRecord> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().map(|j| j.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("exchanges.jsonl");

        let journal = SharedJournal::open(&path).unwrap();
        journal.record(
            ExchangeRecord::new("/v1/chat/completions", "gemini-pro", ExchangeMode::SynthesizedStream, 200)
                .with_backend("gemini")
                .with_frames(4),
        );
        journal.record(ExchangeRecord::new("/v1/embeddings", "gpt-4", ExchangeMode::Rejected, 404));
        assert_eq!(journal.len(), 2);
        drop(journal);

        let reopened = SharedJournal::open(&path).unwrap();
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, 404);
        assert_eq!(recent[1].frames, Some(4));
        assert_eq!(recent[1].backend.as_deref(), Some("gemini"));
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut journal = Journal::in_memory();
        for i in 0..MAX_RECORDS + 5 {
            journal.record(ExchangeRecord::new("/health", format!("m{i}"), ExchangeMode::Json, 200));
        }
        assert_eq!(journal.len(), MAX_RECORDS);
        assert_eq!(journal.recent(1)[0].model, format!("m{}", MAX_RECORDS + 4));
    }

    #[test]
    fn test_record_serialization_omits_unknowns() {
        let json = serde_json::to_value(ExchangeRecord::new(
            "/v1/chat/completions",
            "gpt-4",
            ExchangeMode::Json,
            200,
        ))
        .unwrap();
        assert_eq!(json["mode"], "json");
        assert!(json.get("frames").is_none());
        assert!(json.get("backend").is_none());
    }
}
