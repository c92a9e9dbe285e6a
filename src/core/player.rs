/// Player: the one task that owns playback state and the display. Everything
/// else talks to it through `PlayerEvent`s.
use std::io::{Seek, Write};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::playback::decoder::{self, Decoded};
use crate::playback::model::{ArtReference, PlaybackState, TransportState};
use crate::render::renderer::Renderer;
use crate::services::artwork::{self, ArtworkError, ArtworkFetcher};
use crate::upnp::event::Notification;

/// How often the progress bar (or, when idle, the clock) is refreshed
pub const REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// Events sent to the player by the listener, the idle clock and artwork fetches
#[derive(Debug)]
pub enum PlayerEvent {
    /// One state variable from a NOTIFY
    Notification(Notification),
    /// Idle clock heartbeat
    IdleTick,
    /// A spawned artwork fetch finished
    ArtworkLoaded {
        reference: ArtReference,
        result: Result<Vec<u8>, ArtworkError>,
    },
    Shutdown,
}

pub struct Player<W, F> {
    renderer: Renderer<W>,
    state: PlaybackState,
    fetcher: F,
    /// Handed to artwork fetch tasks so they can report back
    events_tx: mpsc::Sender<PlayerEvent>,
    /// In-flight artwork fetch and the reference it is loading
    pending_art: Option<(ArtReference, JoinHandle<()>)>,
}

impl<W: Write + Seek, F: ArtworkFetcher> Player<W, F> {
    pub fn new(renderer: Renderer<W>, fetcher: F, events_tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self {
            renderer,
            state: PlaybackState::default(),
            fetcher,
            events_tx,
            pending_art: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn renderer(&self) -> &Renderer<W> {
        &self.renderer
    }

    /// Blank the display and show the clock
    pub fn start(&mut self) {
        self.renderer.clear();
        self.renderer.render_clock(true);
    }

    /// Process events until `Shutdown` or until every sender is gone
    pub async fn run(mut self, mut events: mpsc::Receiver<PlayerEvent>) {
        let mut refresh = time::interval(REFRESH_PERIOD);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if !self.handle_event(event) {
                        break;
                    }
                }
                _ = refresh.tick() => self.refresh(),
            }
        }

        self.abort_artwork();
        info!("Player stopped");
    }

    /// Apply one event. Returns false once the player should stop.
    pub fn handle_event(&mut self, event: PlayerEvent) -> bool {
        match event {
            PlayerEvent::Notification(notification) => self.on_notification(&notification),
            PlayerEvent::IdleTick => {
                if !self.state.is_playing() {
                    self.renderer.render_clock(true);
                }
            }
            PlayerEvent::ArtworkLoaded { reference, result } => {
                self.on_artwork_loaded(reference, result)
            }
            PlayerEvent::Shutdown => {
                self.abort_artwork();
                return false;
            }
        }
        true
    }

    fn refresh(&mut self) {
        if self.state.is_playing() {
            self.render_progress(Instant::now());
        } else {
            self.renderer.render_clock(false);
        }
    }

    fn on_notification(&mut self, notification: &Notification) {
        let now = Instant::now();
        let decoded = match decoder::decode(notification) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    service = notification.service_id.as_str(),
                    variable = notification.variable_name.as_str(),
                    "Skipping variable: {}",
                    e
                );
                return;
            }
        };

        match decoded {
            Decoded::Item { item, skipped } => {
                for e in &skipped {
                    warn!(service = notification.service_id.as_str(), "{}", e);
                }
                if self.state.replace_item(item, now) {
                    let item = self.state.item();
                    info!("Now playing: {} - {}", item.artist, item.title);
                }
                if self.state.is_playing() {
                    self.render_now_playing(now);
                }
                self.request_artwork();
            }
            Decoded::Transport(transport) => {
                let was_playing = self.state.is_playing();
                self.state.set_transport(transport, now);
                debug!(?transport, "Transport state");
                if transport == TransportState::Playing {
                    self.render_now_playing(now);
                    self.request_artwork();
                } else if was_playing {
                    self.renderer.render_clock(true);
                }
            }
            Decoded::Duration(Some(duration)) => {
                self.state.progress_mut().set_duration(Some(duration));
                if self.state.is_playing() {
                    self.render_progress(now);
                }
            }
            Decoded::Position(position) => {
                self.state.progress_mut().seek(position, now);
                if self.state.is_playing() {
                    self.render_progress(now);
                }
            }
            Decoded::Duration(None) | Decoded::Ignored => {}
        }
    }

    fn render_now_playing(&mut self, now: Instant) {
        self.renderer.render_metadata(self.state.item());
        self.render_progress(now);
        match self.state.artwork() {
            Some(art) => self.renderer.render_artwork(&art.bytes),
            None => self.renderer.clear_artwork(),
        }
    }

    fn render_progress(&mut self, now: Instant) {
        let progress = self.state.progress();
        let seek = progress.position(now).as_secs_f64();
        let duration = progress.duration().unwrap_or_default().as_secs_f64();
        self.renderer.render_progress(seek, duration);
    }

    /// Start loading art for the current item unless it is already loaded
    /// or on its way. A fetch for any other reference is aborted.
    fn request_artwork(&mut self) {
        let Some(reference) = self.state.item().art_reference.clone() else {
            self.abort_artwork();
            return;
        };
        if self.state.artwork().is_some() {
            return;
        }
        if let Some((pending, handle)) = &self.pending_art {
            if *pending == reference && !handle.is_finished() {
                return;
            }
        }
        self.abort_artwork();

        debug!("Loading artwork from {}", reference);
        let fetcher = self.fetcher.clone();
        let events_tx = self.events_tx.clone();
        let task_reference = reference.clone();
        let handle = tokio::spawn(async move {
            let result = artwork::load(&fetcher, &task_reference).await;
            let _ = events_tx
                .send(PlayerEvent::ArtworkLoaded {
                    reference: task_reference,
                    result,
                })
                .await;
        });
        self.pending_art = Some((reference, handle));
    }

    fn on_artwork_loaded(&mut self, reference: ArtReference, result: Result<Vec<u8>, ArtworkError>) {
        if let Some((_, handle)) = self
            .pending_art
            .take_if(|(pending, _)| *pending == reference)
        {
            handle.abort();
        }

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Artwork from {} unavailable: {}", reference, e);
                return;
            }
        };
        if !self.state.accept_artwork(&reference, bytes) {
            debug!("Discarding artwork for a previous track: {}", reference);
            return;
        }
        if self.state.is_playing() {
            if let Some(art) = self.state.artwork() {
                self.renderer.render_artwork(&art.bytes);
            }
        }
    }

    fn abort_artwork(&mut self) {
        if let Some((reference, handle)) = self.pending_art.take() {
            debug!("Cancelling artwork fetch for {}", reference);
            handle.abort();
        }
    }
}
