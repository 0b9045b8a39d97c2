//! Built-in stream providers

use super::{ResolvedStream, StreamKind, StreamProvider};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Prefix selecting a radio station explicitly (`radio:jazz`)
pub const RADIO_PREFIX: &str = "radio:";

/// Path extensions [`DirectUrlProvider`] treats as playable media
pub const MEDIA_EXTENSIONS: [&str; 14] = [
    "mp3", "ogg", "oga", "opus", "flac", "wav", "m4a", "aac", "webm", "weba", "mka", "m3u8",
    "m3u", "pls",
];

fn unresolved(identifier: &str, reason: impl Into<String>) -> Error {
    Error::Resolution {
        identifier: identifier.to_string(),
        reason: reason.into(),
    }
}

fn is_http_url(identifier: &str) -> bool {
    identifier.starts_with("http://") || identifier.starts_with("https://")
}

/// Static radio stations from the `[radio.stations]` table
pub struct RadioStationProvider {
    stations: BTreeMap<String, String>,
}

impl RadioStationProvider {
    pub fn new(stations: BTreeMap<String, String>) -> Self {
        Self { stations }
    }
}

#[async_trait]
impl StreamProvider for RadioStationProvider {
    fn name(&self) -> &str {
        "radio"
    }

    async fn resolve(&self, identifier: &str) -> Result<ResolvedStream> {
        let name = identifier.strip_prefix(RADIO_PREFIX).unwrap_or(identifier).trim();
        let (station, url) = self
            .stations
            .iter()
            .find(|(station, _)| station.eq_ignore_ascii_case(name))
            .ok_or_else(|| unresolved(identifier, "unknown radio station"))?;

        Ok(ResolvedStream {
            url: url.clone(),
            title: station.clone(),
            kind: StreamKind::Radio,
        })
    }
}

/// Final path segment of an http(s) URL, ignoring query and fragment
fn url_file_name(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    let path = rest[..end].split_once('/').map(|(_, path)| path)?;
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

/// True when `url` points straight at an audio file or playlist
pub fn is_direct_media_url(url: &str) -> bool {
    if !is_http_url(url) {
        return false;
    }
    url_file_name(url)
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, extension)| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(extension))
        })
        .unwrap_or(false)
}

/// http(s) URLs pointing directly at media files
///
/// Page URLs (video pages, share links) are rejected so a page resolver can
/// answer for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectUrlProvider;

#[async_trait]
impl StreamProvider for DirectUrlProvider {
    fn name(&self) -> &str {
        "direct-url"
    }

    async fn resolve(&self, identifier: &str) -> Result<ResolvedStream> {
        let url = identifier.trim();
        if !is_direct_media_url(url) {
            return Err(unresolved(identifier, "not a direct media URL"));
        }
        let title = url_file_name(url).unwrap_or(url).to_string();

        Ok(ResolvedStream {
            url: url.to_string(),
            title,
            kind: StreamKind::Track,
        })
    }
}

/// Resolves page URLs and free-text searches through yt-dlp
pub struct YtDlpProvider {
    program: String,
    leading_args: Vec<String>,
}

impl YtDlpProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_args(program, Vec::new())
    }

    /// `leading_args` go before the generated arguments
    pub fn with_args(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Non-URL identifiers become a single-result search
    pub fn arguments(&self, identifier: &str) -> Vec<String> {
        let target = if is_http_url(identifier) {
            identifier.to_string()
        } else {
            format!("ytsearch1:{}", identifier)
        };
        let mut args = self.leading_args.clone();
        args.extend([
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--get-title".to_string(),
            "--get-url".to_string(),
            "-f".to_string(),
            "bestaudio".to_string(),
            "--".to_string(),
            target,
        ]);
        args
    }
}

/// Title on the first line, URL on the second
pub fn parse_yt_dlp_output(stdout: &str) -> Option<(String, String)> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let title = lines.next()?;
    let url = lines.next()?;
    is_http_url(url).then(|| (title.to_string(), url.to_string()))
}

#[async_trait]
impl StreamProvider for YtDlpProvider {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, identifier: &str) -> Result<ResolvedStream> {
        let output = Command::new(&self.program)
            .args(self.arguments(identifier.trim()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| unresolved(identifier, format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(unresolved(
                identifier,
                format!("{} exited with {}: {}", self.program, output.status, last),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (title, url) = parse_yt_dlp_output(&stdout)
            .ok_or_else(|| unresolved(identifier, "unexpected yt-dlp output"))?;
        debug!(identifier = %identifier, title = %title, "yt-dlp resolved");

        Ok(ResolvedStream {
            url,
            title,
            kind: StreamKind::Track,
        })
    }
}
