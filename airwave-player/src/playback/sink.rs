//! Outgoing audio sink
//!
//! Downstream consumer of the PCM produced by the transcoder (a voice
//! connection in production). A failing sink means the outgoing channel is
//! gone.

use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Consumer of 48kHz stereo s16le PCM
#[async_trait]
pub trait OutgoingSink: Send + Sync {
    /// Deliver one chunk of PCM
    async fn send(&self, pcm: &[u8]) -> Result<()>;
}

/// Sink writing PCM to any async writer (file, stdout, socket)
pub struct PipeSink<W> {
    writer: Mutex<W>,
}

impl<W> PipeSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> OutgoingSink for PipeSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn send(&self, pcm: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(pcm)
            .await
            .map_err(|e| Error::Sink(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pipe_sink_appends_chunks() {
        let sink = PipeSink::new(Vec::new());
        sink.send(&[1, 2, 3, 4]).await.unwrap();
        sink.send(&[5, 6, 7, 8]).await.unwrap();
        assert_eq!(sink.into_inner(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_closed_pipe_reports_sink_error() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);
        let sink = PipeSink::new(writer);
        let err = sink.send(&[0; 16]).await.unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
    }
}
