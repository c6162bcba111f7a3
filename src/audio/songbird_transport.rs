use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::YoutubeDl, tracks::TrackHandle, Call, Event, EventContext,
    EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc::UnboundedSender, Mutex};
use tracing::{debug, info, warn};

use super::{
    equalizer::EqProfile,
    queue::Track,
    transport::{TransportError, TransportEvent, VoiceTransport},
};

/// [`VoiceTransport`] over songbird's driver, streaming tracks through yt-dlp.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    events: UnboundedSender<TransportEvent>,
    /// Track currently owned by each guild; end events of any other track are stale.
    tracks: Arc<DashMap<GuildId, TrackHandle>>,
    volumes: DashMap<GuildId, f32>,
}

impl SongbirdTransport {
    pub fn new(
        manager: Arc<Songbird>,
        http: reqwest::Client,
        events: UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            manager,
            http,
            events,
            tracks: Arc::new(DashMap::new()),
            volumes: DashMap::new(),
        }
    }

    fn call(&self, guild_id: GuildId) -> Result<Arc<Mutex<Call>>, TransportError> {
        self.manager
            .get(guild_id)
            .ok_or(TransportError::NotConnected)
    }

    fn current(&self, guild_id: GuildId) -> Result<TrackHandle, TransportError> {
        self.tracks
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::NoTrack)
    }

    fn notifier(&self, guild_id: GuildId) -> TrackNotifier {
        TrackNotifier {
            guild_id,
            tracks: self.tracks.clone(),
            events: self.events.clone(),
        }
    }
}

fn control_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Control(e.to_string())
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), TransportError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("⚠️ No se pudo ensordecer el bot en guild {}: {}", guild_id, e);
        }

        info!("🔗 Conectado al canal {} en guild {}", channel_id, guild_id);
        Ok(())
    }

    async fn play(&self, guild_id: GuildId, track: Track) -> Result<(), TransportError> {
        let call = self.call(guild_id)?;
        let input = YoutubeDl::new(self.http.clone(), track.id.clone());

        // The replaced track's end event must not look like the new one's.
        self.tracks.remove(&guild_id);
        let handle = call.lock().await.play_only_input(input.into());
        self.tracks.insert(guild_id, handle.clone());

        let volume = self.volumes.get(&guild_id).map(|v| *v).unwrap_or(1.0);
        handle.set_volume(volume).map_err(control_error)?;
        handle
            .add_event(Event::Track(TrackEvent::End), self.notifier(guild_id))
            .map_err(control_error)?;
        handle
            .add_event(Event::Track(TrackEvent::Error), self.notifier(guild_id))
            .map_err(control_error)?;

        debug!("▶️ Stream iniciado en guild {}: {}", guild_id, track.id);
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> Result<(), TransportError> {
        self.current(guild_id)?.stop().map_err(control_error)
    }

    async fn set_pause(&self, guild_id: GuildId, paused: bool) -> Result<(), TransportError> {
        let handle = self.current(guild_id)?;
        if paused {
            handle.pause().map_err(control_error)
        } else {
            handle.play().map_err(control_error)
        }
    }

    async fn seek(&self, guild_id: GuildId, position_ms: u64) -> Result<(), TransportError> {
        self.current(guild_id)?
            .seek_async(Duration::from_millis(position_ms))
            .await
            .map_err(control_error)?;
        Ok(())
    }

    async fn position(&self, guild_id: GuildId) -> Result<u64, TransportError> {
        let state = self
            .current(guild_id)?
            .get_info()
            .await
            .map_err(control_error)?;
        Ok(u64::try_from(state.position.as_millis()).unwrap_or(u64::MAX))
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<(), TransportError> {
        let volume = f32::from(volume) / 100.0;
        self.volumes.insert(guild_id, volume);
        if let Ok(handle) = self.current(guild_id) {
            handle.set_volume(volume).map_err(control_error)?;
        }
        Ok(())
    }

    async fn set_equalizer(&self, guild_id: GuildId, profile: EqProfile) -> Result<(), TransportError> {
        // The driver mixes without a filter stage, so only the choice is kept.
        debug!(
            "🎛️ Perfil '{}' registrado para guild {}: {:?}",
            profile,
            guild_id,
            profile.gains()
        );
        Ok(())
    }

    async fn destroy(&self, guild_id: GuildId) -> Result<(), TransportError> {
        self.tracks.remove(&guild_id);
        self.volumes.remove(&guild_id);

        if self.manager.get(guild_id).is_some() {
            self.manager
                .remove(guild_id)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

/// Forwards end and error events of a guild's current track.
struct TrackNotifier {
    guild_id: GuildId,
    tracks: Arc<DashMap<GuildId, TrackHandle>>,
    events: UnboundedSender<TransportEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(track_list) = ctx else {
            return None;
        };

        for (state, handle) in *track_list {
            let current = self
                .tracks
                .remove_if(&self.guild_id, |_, current| current.uuid() == handle.uuid());
            if current.is_none() {
                debug!("Evento de un track reemplazado en guild {}, ignorado", self.guild_id);
                continue;
            }

            let event = match &state.playing {
                songbird::tracks::PlayMode::Errored(e) => TransportEvent::TrackException {
                    guild_id: self.guild_id,
                    message: e.to_string(),
                },
                _ => TransportEvent::TrackEnd {
                    guild_id: self.guild_id,
                },
            };
            if self.events.send(event).is_err() {
                warn!("⚠️ Canal de eventos de audio cerrado");
            }
        }

        None
    }
}
