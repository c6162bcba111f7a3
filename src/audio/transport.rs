use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId};

use super::{equalizer::EqProfile, queue::Track};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to join voice channel: {0}")]
    Connect(String),
    #[error("no voice connection for this guild")]
    NotConnected,
    #[error("nothing is playing in this guild")]
    NoTrack,
    #[error("playback control failed: {0}")]
    Control(String),
}

/// Notifications emitted by the transport, tagged with their session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The track finished or was stopped.
    TrackEnd { guild_id: GuildId },
    /// The track failed while playing.
    TrackException { guild_id: GuildId, message: String },
}

impl TransportEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            TransportEvent::TrackEnd { guild_id } => *guild_id,
            TransportEvent::TrackException { guild_id, .. } => *guild_id,
        }
    }
}

/// Voice connection and playback primitives, one connection per guild.
///
/// Implementations report the end of every track, including tracks ended by
/// [`stop`](VoiceTransport::stop), as a [`TransportEvent`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), TransportError>;
    /// Starts `track`, replacing whatever was playing.
    async fn play(&self, guild_id: GuildId, track: Track) -> Result<(), TransportError>;
    async fn stop(&self, guild_id: GuildId) -> Result<(), TransportError>;
    async fn set_pause(&self, guild_id: GuildId, paused: bool) -> Result<(), TransportError>;
    async fn seek(&self, guild_id: GuildId, position_ms: u64) -> Result<(), TransportError>;
    /// Playback position of the current track in milliseconds.
    async fn position(&self, guild_id: GuildId) -> Result<u64, TransportError>;
    /// `volume` ranges over `0..=1000`, 100 being unchanged.
    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<(), TransportError>;
    async fn set_equalizer(&self, guild_id: GuildId, profile: EqProfile) -> Result<(), TransportError>;
    /// Stops playback and leaves the voice channel.
    async fn destroy(&self, guild_id: GuildId) -> Result<(), TransportError>;
}

/// Chat side of a session: the "Now Playing" message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn now_playing(&self, channel_id: ChannelId, track: &Track) -> anyhow::Result<MessageId>;
    async fn delete(&self, channel_id: ChannelId, message_id: MessageId) -> anyhow::Result<()>;
}
