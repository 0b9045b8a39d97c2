//! Stream resolution
//!
//! Turns an opaque request identifier into a fetchable URL plus display title.
//! Every registered [`StreamProvider`] is raced with its own timeout; the first
//! success wins and the remaining attempts are dropped. When every provider
//! fails the request is unresolvable, which the orchestrator treats as
//! terminal (no retry).

pub mod providers;

pub use providers::{is_direct_media_url, DirectUrlProvider, RadioStationProvider, YtDlpProvider};

use crate::config::ResolverSettings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Where a resolved stream came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Individually resolved track; plays are recorded in statistics
    Track,
    /// Static radio station; plays are not recorded
    Radio,
}

/// Playable source for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub url: String,
    pub title: String,
    pub kind: StreamKind,
}

/// One strategy for resolving identifiers
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Short name used in logs and error reports
    fn name(&self) -> &str;

    /// Resolve `identifier`, or fail if this provider cannot handle it
    async fn resolve(&self, identifier: &str) -> Result<ResolvedStream>;
}

/// Races registered providers
pub struct StreamResolver {
    providers: Vec<Arc<dyn StreamProvider>>,
    provider_timeout: Duration,
}

impl StreamResolver {
    pub fn new(providers: Vec<Arc<dyn StreamProvider>>, provider_timeout: Duration) -> Self {
        Self {
            providers,
            provider_timeout,
        }
    }

    /// Standard provider set: radio stations (if any), direct URLs, yt-dlp (if enabled)
    pub fn from_settings(settings: &ResolverSettings) -> Self {
        let mut providers: Vec<Arc<dyn StreamProvider>> = Vec::new();
        if !settings.radio_stations.is_empty() {
            providers.push(Arc::new(RadioStationProvider::new(
                settings.radio_stations.clone(),
            )));
        }
        providers.push(Arc::new(DirectUrlProvider));
        if let Some(program) = &settings.yt_dlp_program {
            providers.push(Arc::new(YtDlpProvider::with_args(
                program.clone(),
                settings.yt_dlp_args.clone(),
            )));
        }
        Self::new(providers, settings.provider_timeout)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve `identifier` with every provider concurrently
    pub async fn resolve(&self, identifier: &str) -> Result<ResolvedStream> {
        if self.providers.is_empty() {
            return Err(Error::Resolution {
                identifier: identifier.to_string(),
                reason: "no stream providers registered".to_string(),
            });
        }

        let mut attempts: FuturesUnordered<_> = self
            .providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let limit = self.provider_timeout;
                async move {
                    let result = match timeout(limit, provider.resolve(identifier)).await {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
                    };
                    (provider.name().to_string(), result)
                }
            })
            .collect();

        let mut failures = Vec::new();
        while let Some((name, result)) = attempts.next().await {
            match result {
                Ok(stream) => {
                    debug!(
                        provider = %name,
                        identifier = %identifier,
                        title = %stream.title,
                        "Resolved stream"
                    );
                    return Ok(stream);
                }
                Err(reason) => {
                    debug!(provider = %name, identifier = %identifier, reason = %reason, "Provider failed");
                    failures.push(format!("{}: {}", name, reason));
                }
            }
        }

        warn!(identifier = %identifier, "No provider could resolve identifier");
        Err(Error::Resolution {
            identifier: identifier.to_string(),
            reason: failures.join("; "),
        })
    }
}
