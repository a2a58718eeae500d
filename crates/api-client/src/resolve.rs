//! Link resolution and metadata extraction
//!
//! Turns a public track or playlist link into typed metadata through the
//! gateway. Payload fields are read leniently: anything missing or of the
//! wrong type becomes `None` rather than an error.

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::constants::{RESOLVE_ENDPOINT, VALID_HOSTS};
use crate::error::{Error, Result};
use crate::gateway::Gateway;

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_TITLE: &str = "Unknown Title";

/// Whether `url` is an http(s) link on a supported host with a non-root path.
pub fn validate_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") || parsed.port().is_some() {
        return false;
    }
    let host_ok = parsed
        .host_str()
        .is_some_and(|host| VALID_HOSTS.iter().any(|h| h.eq_ignore_ascii_case(host)));
    host_ok && !parsed.path().is_empty() && parsed.path() != "/"
}

/// Artist and item slug taken from the first two path segments of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkParts {
    pub artist: String,
    pub slug: String,
}

pub fn parse_link(url: &str) -> Option<LinkParts> {
    if !validate_url(url) {
        return None;
    }
    let parsed = Url::parse(url.trim()).ok()?;
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let artist = segments.next()?.to_string();
    let slug = segments.next()?.to_string();
    Some(LinkParts { artist, slug })
}

/// One encoding of a track's audio. `url` points at an API endpoint that
/// returns the actual media location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcoding {
    pub url: Option<String>,
    pub protocol: Option<String>,
    pub mime_type: Option<String>,
    pub preset: Option<String>,
}

impl Transcoding {
    fn from_value(v: &Value) -> Self {
        let format = v.get("format");
        Self {
            url: string(v, "url"),
            protocol: format.and_then(|f| string(f, "protocol")),
            mime_type: format.and_then(|f| string(f, "mime_type")),
            preset: string(v, "preset"),
        }
    }

    /// Direct single-file download, as opposed to segmented streaming.
    pub fn is_progressive(&self) -> bool {
        self.protocol.as_deref() == Some("progressive")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_ms: Option<u64>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub artwork_url: Option<String>,
    pub transcodings: Vec<Transcoding>,
    pub created_at: Option<String>,
    pub permalink_url: Option<String>,
}

impl TrackInfo {
    pub fn from_value(v: &Value) -> Self {
        Self {
            id: v.get("id").and_then(Value::as_u64),
            title: string(v, "title"),
            artist: v.get("user").and_then(|u| string(u, "username")),
            duration_ms: v.get("duration").and_then(Value::as_u64),
            genre: string(v, "genre"),
            description: string(v, "description"),
            artwork_url: string(v, "artwork_url"),
            transcodings: v
                .get("media")
                .and_then(|m| m.get("transcodings"))
                .and_then(Value::as_array)
                .map(|items| items.iter().map(Transcoding::from_value).collect())
                .unwrap_or_default(),
            created_at: string(v, "created_at"),
            permalink_url: string(v, "permalink_url"),
        }
    }

    pub fn artist_or_default(&self) -> &str {
        non_blank(self.artist.as_deref()).unwrap_or(UNKNOWN_ARTIST)
    }

    pub fn title_or_default(&self) -> &str {
        non_blank(self.title.as_deref()).unwrap_or(UNKNOWN_TITLE)
    }

    /// "artist - title", with placeholders for missing parts.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist_or_default(), self.title_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistInfo {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artwork_url: Option<String>,
    pub permalink_url: Option<String>,
    pub track_count: Option<u64>,
    pub tracks: Vec<TrackInfo>,
}

impl PlaylistInfo {
    pub fn from_value(v: &Value) -> Self {
        Self {
            id: v.get("id").and_then(Value::as_u64),
            title: string(v, "title"),
            artist: v.get("user").and_then(|u| string(u, "username")),
            artwork_url: string(v, "artwork_url"),
            permalink_url: string(v, "permalink_url"),
            track_count: v.get("track_count").and_then(Value::as_u64),
            tracks: v
                .get("tracks")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(TrackInfo::from_value).collect())
                .unwrap_or_default(),
        }
    }
}

/// What a link resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolved {
    Track(TrackInfo),
    Playlist(PlaylistInfo),
}

/// Link and media lookups on top of a gateway session.
pub struct Resolver {
    gateway: Gateway,
}

impl Resolver {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Raw resolve payload for a validated link.
    pub async fn resolve(&self, url: &str) -> Result<Value> {
        let url = url.trim();
        if !validate_url(url) {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        info!(url, "resolving link");
        self.gateway.request(RESOLVE_ENDPOINT, &[("url", url)]).await
    }

    /// Resolve a link into track or playlist metadata.
    pub async fn lookup(&self, url: &str) -> Result<Resolved> {
        let data = self.resolve(url).await?;
        match data.get("kind").and_then(Value::as_str) {
            Some("track") => {
                let track = TrackInfo::from_value(&data);
                info!(track = %track.display_name(), "resolved track");
                Ok(Resolved::Track(track))
            }
            Some("playlist" | "system-playlist") => {
                let playlist = PlaylistInfo::from_value(&data);
                info!(
                    title = playlist.title.as_deref().unwrap_or_default(),
                    tracks = playlist.tracks.len(),
                    "resolved playlist"
                );
                Ok(Resolved::Playlist(playlist))
            }
            Some(other) => Err(Error::NotFound(format!(
                "link points to unsupported content kind {other:?}"
            ))),
            None => Err(Error::NotFound("link resolved to nothing playable".into())),
        }
    }

    /// Resolve a link that must be a single track.
    pub async fn track(&self, url: &str) -> Result<TrackInfo> {
        match self.lookup(url).await? {
            Resolved::Track(track) => Ok(track),
            Resolved::Playlist(_) => Err(Error::NotFound(format!("{url} is not a track"))),
        }
    }

    /// Media location for a track.
    ///
    /// Progressive transcodings are tried first, in order, then the first
    /// transcoding of any kind. A failing candidate moves on to the next one;
    /// if nothing yields a URL the last failure is returned. An exhausted
    /// credential pool stops the search immediately.
    pub async fn stream_url(&self, track: &TrackInfo) -> Result<Option<String>> {
        let mut candidates: Vec<&str> = track
            .transcodings
            .iter()
            .filter(|t| t.is_progressive())
            .filter_map(|t| t.url.as_deref())
            .collect();
        if let Some(first) = track.transcodings.first().and_then(|t| t.url.as_deref())
            && !candidates.contains(&first)
        {
            candidates.push(first);
        }

        if candidates.is_empty() {
            warn!(track = %track.display_name(), "track has no transcodings");
            return Ok(None);
        }

        let mut last_error = None;
        for endpoint in candidates {
            match self.media_url(endpoint).await {
                Ok(Some(url)) => return Ok(Some(url)),
                Ok(None) => warn!(endpoint, "media lookup returned no url"),
                Err(e @ Error::Exhausted(_)) => return Err(e),
                Err(e) => {
                    warn!(endpoint, error = %e, "media lookup failed, trying next transcoding");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Follow one transcoding endpoint to its `{"url": ...}` payload.
    pub async fn media_url(&self, endpoint: &str) -> Result<Option<String>> {
        let data = self.gateway.request(endpoint, &[]).await?;
        Ok(string(&data, "url"))
    }
}

fn string(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}
