//! FileSink - appends push messages to a JSON Lines file

use contracts::{ContractError, PushMessage, PushSink};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output directory
    pub base_path: PathBuf,
    /// File name inside `base_path`
    pub file_name: String,
    /// Skip `intersection_status` messages
    pub events_only: bool,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));
        let file_name = params
            .get("file")
            .cloned()
            .unwrap_or_else(|| "aisc.jsonl".to_string());
        let events_only = params
            .get("events_only")
            .is_some_and(|v| v == "true");

        Self {
            base_path,
            file_name,
            events_only,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.base_path.join(&self.file_name)
    }
}

/// Observer that records every push message as one JSON line
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: Option<BufWriter<File>>,
    lines: u64,
}

impl FileSink {
    /// Create a new FileSink, creating the directory and appending to the file
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.path())?;

        Ok(Self {
            name: name.into(),
            config,
            writer: Some(BufWriter::new(file)),
            lines: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    /// Lines written so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, ContractError> {
        self.writer
            .as_mut()
            .ok_or_else(|| ContractError::sink_write(&self.name, "file already closed"))
    }
}

impl PushSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, message),
        fields(sink = %self.name, kind = message.kind())
    )]
    async fn write(&mut self, message: &PushMessage) -> Result<(), ContractError> {
        if self.config.events_only && message.intersection_status().is_some() {
            return Ok(());
        }

        let line = serde_json::to_vec(message)
            .map_err(|e| ContractError::sink_write(&self.name, format!("json error: {e}")))?;
        let name = self.name.clone();
        let writer = self.writer()?;
        writer
            .write_all(&line)
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| ContractError::sink_write(&name, e.to_string()))?;
        self.lines += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        let name = self.name.clone();
        self.writer()?
            .flush()
            .map_err(|e| ContractError::sink_write(&name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        }
        debug!(sink = %self.name, lines = self.lines, path = %self.config.path().display(), "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{AlertOutcome, AlertOutcomeKind, Lane};
    use tempfile::tempdir;

    fn outcome() -> PushMessage {
        PushMessage::AlertOutcome(AlertOutcome {
            intersection_id: "x1".into(),
            alert_id: "a1".to_string(),
            kind: AlertOutcomeKind::Honored,
            target_lane: Lane::West,
            priority_level: 5,
            at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_file_sink_writes_json_lines() {
        let dir = tempdir().unwrap();
        let mut params = HashMap::new();
        params.insert("base_path".to_string(), dir.path().display().to_string());
        params.insert("file".to_string(), "out.jsonl".to_string());

        let mut sink = FileSink::from_params("file", &params).unwrap();
        sink.write(&outcome()).await.unwrap();
        sink.write(&outcome()).await.unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["type"], "alert_outcome");
        assert_eq!(value["data"]["kind"], "honored");
    }

    #[tokio::test]
    async fn test_file_sink_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let config = FileSinkConfig {
            base_path: dir.path().to_path_buf(),
            file_name: "x.jsonl".to_string(),
            events_only: false,
        };
        let mut sink = FileSink::new("file", config).unwrap();
        sink.close().await.unwrap();
        assert!(sink.write(&outcome()).await.is_err());
    }
}
