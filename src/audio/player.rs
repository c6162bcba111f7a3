use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::{
    sync::{mpsc::UnboundedReceiver, Mutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    dj::{Caller, Denied, DjGate, SwapTarget},
    equalizer::EqProfile,
    queue::{QueueFull, QueuePage, Track},
    session::{Session, SessionState},
    transport::{Announcer, TransportError, TransportEvent, VoiceTransport},
};

pub const MAX_VOLUME: u16 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Debes estar en un canal de voz o indicar uno.")]
    NoVoiceChannel,
    #[error("Ya estoy conectado a un canal de voz.")]
    AlreadyActive,
    #[error("No estoy conectado a un canal de voz.")]
    NotActive,
    #[error("No hay nada para reproducir.")]
    NoTracks,
    #[error("No se está reproduciendo nada.")]
    NothingPlaying,
    #[error("Debes estar en un canal de voz para usar este comando.")]
    NotInVoice,
    #[error("Debes estar en mi mismo canal de voz para usar este comando.")]
    OtherVoiceChannel,
    #[error("La reproducción ya está pausada.")]
    AlreadyPaused,
    #[error("La reproducción no está pausada.")]
    NotPaused,
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
    #[error(transparent)]
    NotAllowed(#[from] Denied),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type PlayerResult<T> = Result<T, PlayerError>;

/// Everything needed to open a session for a guild.
#[derive(Debug)]
pub struct StartRequest {
    pub guild_id: GuildId,
    /// Channel to join. `None` when the invoker is not in voice and gave none.
    pub voice_channel: Option<ChannelId>,
    pub text_channel: ChannelId,
    pub invoker: UserId,
    pub tracks: Vec<Track>,
}

type SessionHandle = Arc<Mutex<Session>>;

/// Registro de sesiones de reproducción, una por guild.
///
/// Each session sits behind its own async mutex, held for the whole of a
/// command including its transport calls, so commands and track-end events
/// for one guild never interleave. Track-end events reach the registry through
/// a single channel ([`spawn_event_loop`](Self::spawn_event_loop)) and are
/// handled after the command that caused them released the lock.
pub struct PlayerRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    transport: Arc<dyn VoiceTransport>,
    announcer: Arc<dyn Announcer>,
    max_queue_size: usize,
    default_volume: u16,
}

impl PlayerRegistry {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        announcer: Arc<dyn Announcer>,
        max_queue_size: usize,
        default_volume: u16,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            transport,
            announcer,
            max_queue_size,
            default_volume: default_volume.min(MAX_VOLUME),
        }
    }

    /// Session accessor for the command layer.
    pub fn session(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.sessions.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Joins the voice channel and opens an idle session with the invoker as DJ.
    pub async fn connect(&self, request: StartRequest) -> PlayerResult<ChannelId> {
        let (_, session) = self.open(request).await?;
        Ok(session.voice_channel)
    }

    /// Opens a session and starts playing the first of `request.tracks`.
    pub async fn start(&self, mut request: StartRequest) -> PlayerResult<Track> {
        if request.tracks.is_empty() {
            return Err(PlayerError::NoTracks);
        }
        let tracks = std::mem::take(&mut request.tracks);
        let guild_id = request.guild_id;
        let (handle, mut session) = self.open(request).await?;

        let started = match session.queue.extend(tracks) {
            Ok(_) => self.play_next(&mut session).await,
            Err(e) => Err(e.into()),
        };

        match started {
            Ok(Some(track)) => Ok(track),
            Ok(None) => {
                self.close(guild_id, &handle, &mut session).await;
                Err(PlayerError::NoTracks)
            }
            Err(e) => {
                self.close(guild_id, &handle, &mut session).await;
                Err(e)
            }
        }
    }

    /// Appends tracks to the queue, returning how many fit.
    ///
    /// An idle session starts playing right away.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        caller: &Caller,
        tracks: Vec<Track>,
    ) -> PlayerResult<usize> {
        if tracks.is_empty() {
            return Err(PlayerError::NoTracks);
        }
        let (handle, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;

        let added = session.queue.extend(tracks)?;
        if session.state == SessionState::Idle {
            if let Err(e) = self.play_next(&mut session).await {
                self.close(guild_id, &handle, &mut session).await;
                return Err(e);
            }
        }
        Ok(added)
    }

    /// Moves to the next track after the current one ended.
    ///
    /// Running out of tracks tears the session down; that is the normal end of
    /// a session, so `Ok(None)` is returned.
    pub async fn advance(&self, guild_id: GuildId) -> PlayerResult<Option<Track>> {
        let Some(handle) = self.session(guild_id) else {
            debug!("Evento para guild {} sin sesión, ignorado", guild_id);
            return Ok(None);
        };
        let mut session = handle.clone().lock_owned().await;
        if !matches!(session.state, SessionState::Playing | SessionState::Paused) {
            return Ok(None);
        }

        match self.play_next(&mut session).await {
            Ok(Some(track)) => Ok(Some(track)),
            Ok(None) => {
                self.close(guild_id, &handle, &mut session).await;
                Ok(None)
            }
            Err(e) => {
                self.close(guild_id, &handle, &mut session).await;
                Err(e)
            }
        }
    }

    /// Ends the current track; the end event advances the queue.
    pub async fn skip(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (_, session) = self.lock_playing(guild_id, caller).await?;
        self.transport.stop(session.guild_id).await?;
        info!("⏭️ Track saltado en guild {}", guild_id);
        Ok(())
    }

    /// Goes back one track.
    ///
    /// The cursor steps back two and the current track is stopped; the end
    /// event then advances by one. The event is only handled once this lock is
    /// released, so the order of the stop and the rewind here does not matter.
    pub async fn previous(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (_, mut session) = self.lock_playing(guild_id, caller).await?;
        self.transport.stop(session.guild_id).await?;
        session.queue.rewind();
        info!("⏮️ Volviendo al track anterior en guild {}", guild_id);
        Ok(())
    }

    /// Removes every queue entry of `track`, returning how many went.
    pub async fn remove(&self, guild_id: GuildId, caller: &Caller, track: &Track) -> PlayerResult<usize> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;
        Ok(session.queue.remove_matching(track))
    }

    pub async fn shuffle(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;
        session.queue.shuffle();
        Ok(())
    }

    pub async fn pause(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (_, mut session) = self.lock_playing(guild_id, caller).await?;
        if session.state == SessionState::Paused {
            return Err(PlayerError::AlreadyPaused);
        }
        self.transport.set_pause(guild_id, true).await?;
        session.state = SessionState::Paused;
        info!("⏸️ Reproducción pausada en guild {}", guild_id);
        Ok(())
    }

    pub async fn resume(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (_, mut session) = self.lock_playing(guild_id, caller).await?;
        if session.state != SessionState::Paused {
            return Err(PlayerError::NotPaused);
        }
        self.transport.set_pause(guild_id, false).await?;
        session.state = SessionState::Playing;
        info!("▶️ Reproducción reanudada en guild {}", guild_id);
        Ok(())
    }

    pub async fn toggle_repeat(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<bool> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;
        Ok(session.queue.toggle_repeat())
    }

    pub async fn toggle_loop(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<bool> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;
        Ok(session.queue.toggle_loop())
    }

    /// Sets the volume, clamped to [`MAX_VOLUME`], and returns what was applied.
    pub async fn set_volume(&self, guild_id: GuildId, caller: &Caller, volume: u16) -> PlayerResult<u16> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;

        let volume = volume.min(MAX_VOLUME);
        self.transport.set_volume(guild_id, volume).await?;
        session.volume = volume;
        info!("🔊 Volumen ajustado a {}% en guild {}", volume, guild_id);
        Ok(volume)
    }

    pub async fn set_equalizer(
        &self,
        guild_id: GuildId,
        caller: &Caller,
        profile: EqProfile,
    ) -> PlayerResult<()> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;

        self.transport.set_equalizer(guild_id, profile).await?;
        session.equalizer = profile;
        info!("🎛️ Perfil de ecualizador '{}' registrado en guild {}", profile, guild_id);
        Ok(())
    }

    /// Seeks `offset_ms` from the current position, never before the start.
    /// Returns the new position.
    pub async fn seek_relative(
        &self,
        guild_id: GuildId,
        caller: &Caller,
        offset_ms: i64,
    ) -> PlayerResult<u64> {
        let (_, _session) = self.lock_playing(guild_id, caller).await?;

        let position = self.transport.position(guild_id).await?;
        let target = if offset_ms.is_negative() {
            position.saturating_sub(offset_ms.unsigned_abs())
        } else {
            position.saturating_add(offset_ms.unsigned_abs())
        };
        self.transport.seek(guild_id, target).await?;
        debug!("⏩ Posición {} → {} ms en guild {}", position, target, guild_id);
        Ok(target)
    }

    /// Toggles the DJ lock, returning whether the session is now locked.
    pub async fn toggle_lock(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<bool> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        Ok(session.gate.toggle_lock(caller)?)
    }

    pub async fn swap_dj(&self, guild_id: GuildId, caller: &Caller, target: &SwapTarget) -> PlayerResult<()> {
        let (_, mut session) = self.lock_as(guild_id, caller).await?;
        let channel = session.voice_channel;
        Ok(session.gate.swap(caller, target, channel)?)
    }

    /// Clears the DJ when they leave the voice channel.
    pub async fn member_left_voice(&self, guild_id: GuildId, user_id: UserId) -> bool {
        match self.lock(guild_id).await {
            Ok((_, mut session)) => session.gate.member_left(user_id),
            Err(_) => false,
        }
    }

    /// Leaves the voice channel on behalf of a member.
    pub async fn disconnect(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (handle, mut session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;
        self.close(guild_id, &handle, &mut session).await;
        Ok(())
    }

    /// Tears the session down, whatever state it is in.
    ///
    /// Returns whether there was a session. Calling it again is a no-op.
    pub async fn destroy(&self, guild_id: GuildId) -> bool {
        let Some((_, handle)) = self.sessions.remove(&guild_id) else {
            return false;
        };
        let mut session = handle.lock().await;
        self.teardown(&mut session).await;
        true
    }

    pub async fn destroy_all(&self) -> usize {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let mut destroyed = 0;
        for guild_id in guilds {
            if self.destroy(guild_id).await {
                destroyed += 1;
            }
        }
        destroyed
    }

    pub async fn queue_page(&self, guild_id: GuildId, page: usize, per_page: usize) -> PlayerResult<QueuePage> {
        let (_, session) = self.lock(guild_id).await?;
        Ok(session.queue.page(page, per_page))
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        let (_, session) = self.lock(guild_id).await.ok()?;
        session.queue.current().cloned()
    }

    pub async fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let (_, session) = self.lock(guild_id).await.ok()?;
        Some(session.voice_channel)
    }

    /// Registers an interactive menu closed when the session goes away.
    pub async fn open_menu(&self, guild_id: GuildId) -> Option<CancellationToken> {
        let (_, mut session) = self.lock(guild_id).await.ok()?;
        Some(session.open_menu())
    }

    /// Fails unless `caller` is in the voice channel of the guild's session.
    pub async fn check_presence(&self, guild_id: GuildId, caller: &Caller) -> PlayerResult<()> {
        let (_, session) = self.lock(guild_id).await?;
        check_presence(&session, caller)
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        let guild_id = event.guild_id();
        match &event {
            TransportEvent::TrackEnd { .. } => debug!("🔚 Track terminado en guild {}", guild_id),
            TransportEvent::TrackException { message, .. } => {
                warn!("⚠️ Error reproduciendo en guild {}: {}", guild_id, message)
            }
        }

        if let Err(e) = self.advance(guild_id).await {
            error!("❌ No se pudo avanzar la cola en guild {}: {}", guild_id, e);
        }
    }

    /// Consumes transport events in arrival order until `shutdown` fires.
    pub fn spawn_event_loop(
        self: Arc<Self>,
        mut events: UnboundedReceiver<TransportEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("🎧 Procesador de eventos de audio iniciado");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    },
                }
            }
            info!("🎧 Procesador de eventos de audio detenido");
        })
    }

    async fn open(&self, request: StartRequest) -> PlayerResult<(SessionHandle, OwnedMutexGuard<Session>)> {
        let voice_channel = request.voice_channel.ok_or(PlayerError::NoVoiceChannel)?;
        let guild_id = request.guild_id;

        let handle = Arc::new(Mutex::new(Session::new(
            guild_id,
            voice_channel,
            request.text_channel,
            self.max_queue_size,
            self.default_volume,
        )));
        // Locked before it is published so commands wait for the connection.
        let mut session = handle.clone().lock_owned().await;

        match self.sessions.entry(guild_id) {
            Entry::Occupied(_) => return Err(PlayerError::AlreadyActive),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }

        if let Err(e) = self.transport.connect(guild_id, voice_channel).await {
            warn!("🔌 No se pudo conectar a {} en guild {}: {}", voice_channel, guild_id, e);
            self.close(guild_id, &handle, &mut session).await;
            return Err(e.into());
        }

        if let Err(e) = self.transport.set_volume(guild_id, session.volume).await {
            warn!("⚠️ No se pudo aplicar el volumen inicial: {}", e);
        }
        session.gate = DjGate::new(Some(request.invoker));
        session.state = SessionState::Idle;
        info!("🔊 Conectado a {} en guild {}", voice_channel, guild_id);

        Ok((handle, session))
    }

    /// Plays the next queued track and announces it.
    async fn play_next(&self, session: &mut Session) -> PlayerResult<Option<Track>> {
        if let Some(message_id) = session.now_playing.take() {
            if let Err(e) = self.announcer.delete(session.text_channel, message_id).await {
                debug!("No se pudo borrar el mensaje anterior: {}", e);
            }
        }

        let Some(track) = session.queue.next_track() else {
            return Ok(None);
        };

        self.transport.play(session.guild_id, track.clone()).await?;
        session.state = SessionState::Playing;
        info!("🎵 Reproduciendo en guild {}: {}", session.guild_id, track);

        match self.announcer.now_playing(session.text_channel, &track).await {
            Ok(message_id) => session.now_playing = Some(message_id),
            Err(e) => warn!("⚠️ No se pudo anunciar el track: {}", e),
        }
        Ok(Some(track))
    }

    async fn lock(&self, guild_id: GuildId) -> PlayerResult<(SessionHandle, OwnedMutexGuard<Session>)> {
        let handle = self.session(guild_id).ok_or(PlayerError::NotActive)?;
        let session = handle.clone().lock_owned().await;
        if !session.state.is_active() {
            return Err(PlayerError::NotActive);
        }
        Ok((handle, session))
    }

    /// Locks the session for a member command.
    ///
    /// Only members listening in the session's voice channel may use it.
    async fn lock_as(
        &self,
        guild_id: GuildId,
        caller: &Caller,
    ) -> PlayerResult<(SessionHandle, OwnedMutexGuard<Session>)> {
        let (handle, session) = self.lock(guild_id).await?;
        check_presence(&session, caller)?;
        Ok((handle, session))
    }

    /// Locks a session that has a current track and checks `caller` against the lock.
    async fn lock_playing(
        &self,
        guild_id: GuildId,
        caller: &Caller,
    ) -> PlayerResult<(SessionHandle, OwnedMutexGuard<Session>)> {
        let (handle, session) = self.lock_as(guild_id, caller).await?;
        session.gate.check_lock(caller)?;
        if session.state == SessionState::Idle {
            return Err(PlayerError::NothingPlaying);
        }
        Ok((handle, session))
    }

    /// Tears down `session` and unregisters it if it is still the guild's.
    async fn close(&self, guild_id: GuildId, handle: &SessionHandle, session: &mut Session) {
        self.teardown(session).await;
        self.sessions
            .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, handle));
    }

    /// Best-effort teardown: every step runs even if an earlier one failed.
    async fn teardown(&self, session: &mut Session) {
        if session.state == SessionState::Destroyed {
            return;
        }

        if let Some(message_id) = session.now_playing.take() {
            if let Err(e) = self.announcer.delete(session.text_channel, message_id).await {
                debug!("No se pudo borrar el mensaje de reproducción: {}", e);
            }
        }
        let menus = session.close_menus();
        if let Err(e) = self.transport.destroy(session.guild_id).await {
            warn!("⚠️ Error liberando la conexión de voz: {}", e);
        }
        session.queue.clear();
        session.state = SessionState::Destroyed;

        info!(
            "🛑 Sesión destruida en guild {} ({} menús cerrados)",
            session.guild_id, menus
        );
    }
}

fn check_presence(session: &Session, caller: &Caller) -> PlayerResult<()> {
    match caller.voice_channel {
        None => Err(PlayerError::NotInVoice),
        Some(channel) if channel != session.voice_channel => Err(PlayerError::OtherVoiceChannel),
        Some(_) => Ok(()),
    }
}
