//! Play statistics hook
//!
//! Called once the transcoder confirms a resolved (non-radio) track is really
//! playing. Calls are fire-and-forget: failures never reach playback.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// One confirmed play
#[derive(Debug, Clone, Serialize)]
pub struct PlayRecord {
    pub request_id: Uuid,
    pub requested_by: String,
    pub identifier: String,
    pub title: String,
    pub url: String,
    pub started_at: DateTime<Utc>,
}

/// Statistics sink
#[async_trait]
pub trait PlayStatistics: Send + Sync {
    async fn record_play(&self, record: PlayRecord) -> Result<()>;
}

/// Writes each play as a structured log record
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStatistics;

#[async_trait]
impl PlayStatistics for LoggingStatistics {
    async fn record_play(&self, record: PlayRecord) -> Result<()> {
        info!(
            request_id = %record.request_id,
            requested_by = %record.requested_by,
            identifier = %record.identifier,
            title = %record.title,
            started_at = %record.started_at,
            "Track played"
        );
        Ok(())
    }
}
