/// Playback data model: the track the renderer reports, its transport state,
/// and how far into the track we are.
use std::fmt;
use std::time::{Duration, Instant};

/// Transport state as published by the renderer's AVTransport service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
}

impl TransportState {
    /// Map a `TransportState` token. Anything unrecognised is `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token.trim() {
            "PLAYING" => TransportState::Playing,
            // UPnP spells the paused state PAUSED_PLAYBACK; some firmwares send PAUSED
            "PAUSED" | "PAUSED_PLAYBACK" => TransportState::Paused,
            "STOPPED" => TransportState::Stopped,
            _ => TransportState::Unknown,
        }
    }
}

/// Where the album art for an item comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtReference {
    /// Remote image, fetched over HTTP
    Uri(String),
    /// `data:` URI carrying the image inline
    Inline(String),
}

impl ArtReference {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else if raw.starts_with("data:") {
            Some(ArtReference::Inline(raw.to_string()))
        } else {
            Some(ArtReference::Uri(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ArtReference::Uri(s) | ArtReference::Inline(s) => s,
        }
    }
}

impl fmt::Display for ArtReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtReference::Uri(uri) => f.write_str(uri),
            ArtReference::Inline(data) => write!(f, "inline artwork ({} bytes)", data.len()),
        }
    }
}

/// One track's metadata. Replaced wholesale on every metadata notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackItem {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub subtitle: Option<String>,
    pub art_reference: Option<ArtReference>,
    pub duration: Option<Duration>,
}

impl PlaybackItem {
    /// Album line shown on screen: the album, or the subtitle when the album is empty
    pub fn display_album(&self) -> &str {
        if self.album.is_empty() {
            self.subtitle.as_deref().unwrap_or("")
        } else {
            &self.album
        }
    }
}

/// Track position, anchored on the last known value and advanced by wall time
/// while running.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    duration: Option<Duration>,
    position: Duration,
    running_since: Option<Instant>,
}

impl Progress {
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Option<Duration>) {
        self.duration = duration;
    }

    pub fn position(&self, now: Instant) -> Duration {
        let elapsed = self
            .running_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        let position = self.position + elapsed;
        match self.duration {
            Some(d) if !d.is_zero() => position.min(d),
            _ => position,
        }
    }

    /// Re-anchor on a position reported by the renderer
    pub fn seek(&mut self, position: Duration, now: Instant) {
        self.position = position;
        if self.running_since.is_some() {
            self.running_since = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        self.position = self.position(now);
        self.running_since = None;
    }

    fn restart(&mut self, duration: Option<Duration>, now: Instant, running: bool) {
        self.duration = duration;
        self.position = Duration::ZERO;
        self.running_since = running.then_some(now);
    }
}

/// Artwork bytes together with the reference they were loaded from
#[derive(Debug, Clone)]
pub struct Artwork {
    pub reference: ArtReference,
    pub bytes: Vec<u8>,
}

/// Everything the display knows about the renderer right now.
/// Owned by the player task; there is no history.
#[derive(Debug, Default)]
pub struct PlaybackState {
    item: PlaybackItem,
    transport: TransportState,
    progress: Progress,
    artwork: Option<Artwork>,
}

impl PlaybackState {
    pub fn item(&self) -> &PlaybackItem {
        &self.item
    }

    pub fn transport(&self) -> TransportState {
        self.transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport == TransportState::Playing
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }

    /// Artwork loaded for the current item, if any
    pub fn artwork(&self) -> Option<&Artwork> {
        self.artwork
            .as_ref()
            .filter(|art| self.item.art_reference.as_ref() == Some(&art.reference))
    }

    /// Replace the current item. Returns true if it is a different track
    /// than the one it replaces.
    pub fn replace_item(&mut self, item: PlaybackItem, now: Instant) -> bool {
        let changed = item != self.item;
        if changed {
            self.progress.restart(item.duration, now, self.is_playing());
        }
        if self
            .artwork
            .as_ref()
            .is_some_and(|art| item.art_reference.as_ref() != Some(&art.reference))
        {
            self.artwork = None;
        }
        self.item = item;
        changed
    }

    /// Replace the transport state. Returns true on a transition into Playing.
    pub fn set_transport(&mut self, transport: TransportState, now: Instant) -> bool {
        let was_playing = self.is_playing();
        self.transport = transport;
        if self.is_playing() {
            self.progress.resume(now);
        } else {
            self.progress.pause(now);
        }
        !was_playing && self.is_playing()
    }

    /// Store artwork if it still belongs to the current item.
    /// Returns false (and drops the bytes) for a superseded reference.
    pub fn accept_artwork(&mut self, reference: &ArtReference, bytes: Vec<u8>) -> bool {
        if self.item.art_reference.as_ref() != Some(reference) {
            return false;
        }
        self.artwork = Some(Artwork {
            reference: reference.clone(),
            bytes,
        });
        true
    }
}

/// Parse a UPnP time value (`H+:MM:SS[.F+]`). `NOT_IMPLEMENTED` and
/// malformed values give `None`.
pub fn parse_time(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.trim_start_matches('+').parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(Duration::from_secs(hours * 3600 + minutes * 60) + Duration::from_secs_f64(seconds))
}
