//! Output sink boundary and the built-in sinks.
//!
//! The scheduler hands every normalized finding to an [`OutputSink`] as soon
//! as it is accepted. Sinks are called from many tasks at once and must not
//! block indefinitely; a refused finding is counted and logged, the run
//! carries on.

use async_trait::async_trait;
use posture_core::NormalizedFinding;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Errors returned by output sinks
#[derive(Error, Debug)]
pub enum SinkError {
    /// The consumer has gone away
    #[error("sink is closed")]
    Closed,

    /// Writing failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The sink refused the finding
    #[error("finding rejected: {0}")]
    Rejected(String),
}

/// Consumer of normalized findings
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Accept one finding
    async fn accept(&self, finding: NormalizedFinding) -> Result<(), SinkError>;

    /// Flush buffered output; called once when the run ends
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards findings over a bounded channel
///
/// The receiving half is a stream, so a consumer can process findings while
/// the run is still going. When the buffer is full `accept` waits, which
/// applies backpressure to the checks producing findings.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NormalizedFinding>,
}

impl ChannelSink {
    /// Create a sink and the stream that receives its findings
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, ReceiverStream<NormalizedFinding>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn accept(&self, finding: NormalizedFinding) -> Result<(), SinkError> {
        self.tx.send(finding).await.map_err(|_| SinkError::Closed)
    }
}

/// Keeps every finding in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    findings: Mutex<Vec<NormalizedFinding>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NormalizedFinding>> {
        self.findings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of everything received so far, in arrival order
    #[must_use]
    pub fn findings(&self) -> Vec<NormalizedFinding> {
        self.lock().clone()
    }

    /// Drain everything received so far
    #[must_use]
    pub fn take(&self) -> Vec<NormalizedFinding> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of findings received
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing was received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn accept(&self, finding: NormalizedFinding) -> Result<(), SinkError> {
        self.lock().push(finding);
        Ok(())
    }
}

/// Writes one JSON document per line to an async writer
///
/// Concurrent findings queue on an async lock, so a slow writer parks the
/// submitting task instead of blocking a runtime thread.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: tokio::sync::Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutputSink for JsonLinesSink<W> {
    async fn accept(&self, finding: NormalizedFinding) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&finding)?;
        line.push(b'\n');
        self.writer.lock().await.write_all(&line).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::tests::sample_finding;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_channel_sink_streams() {
        let (sink, mut stream) = ChannelSink::bounded(4);
        sink.accept(sample_finding("f-1")).await.unwrap();
        sink.accept(sample_finding("f-2")).await.unwrap();
        drop(sink);

        let mut ids = Vec::new();
        while let Some(finding) = stream.next().await {
            ids.push(finding.id);
        }
        assert_eq!(ids, ["f-1", "f-2"]);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, stream) = ChannelSink::bounded(1);
        drop(stream);
        assert!(matches!(
            sink.accept(sample_finding("f-1")).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.accept(sample_finding("f-1")).await.unwrap();
        sink.accept(sample_finding("f-2")).await.unwrap();
        sink.flush().await.unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["Id"], "f-1");
        assert_eq!(first["SchemaVersion"], "2018-10-08");
    }

    #[tokio::test]
    async fn test_json_lines_sink_keeps_lines_whole_under_concurrency() {
        let sink = std::sync::Arc::new(JsonLinesSink::new(Vec::new()));
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let sink = std::sync::Arc::clone(&sink);
                tokio::spawn(async move { sink.accept(sample_finding(&format!("f-{i}"))).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let sink = std::sync::Arc::into_inner(sink).unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let mut ids: Vec<String> = output
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["Id"].to_string())
            .collect();
        ids.sort();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids[0], "\"f-0\"");
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemorySink::new();
        sink.accept(sample_finding("f-1")).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.is_empty());
    }
}
