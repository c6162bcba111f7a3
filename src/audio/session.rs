use serenity::model::id::{ChannelId, GuildId, MessageId};
use tokio_util::sync::CancellationToken;

use super::{dj::DjGate, equalizer::EqProfile, queue::TrackQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Joining the voice channel.
    Connecting,
    /// Connected with nothing playing yet.
    Idle,
    Playing,
    Paused,
    /// Torn down. Terminal.
    Destroyed,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Idle | Self::Playing | Self::Paused)
    }
}

/// Playback context of one guild.
#[derive(Debug)]
pub struct Session {
    pub guild_id: GuildId,
    pub voice_channel: ChannelId,
    /// Where "Now Playing" messages are posted.
    pub text_channel: ChannelId,
    pub queue: TrackQueue,
    pub gate: DjGate,
    pub state: SessionState,
    pub volume: u16,
    pub equalizer: EqProfile,
    pub now_playing: Option<MessageId>,
    menus: Vec<CancellationToken>,
}

impl Session {
    pub fn new(
        guild_id: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        max_queue_size: usize,
        volume: u16,
    ) -> Self {
        Self {
            guild_id,
            voice_channel,
            text_channel,
            queue: TrackQueue::new(max_queue_size),
            gate: DjGate::default(),
            state: SessionState::Connecting,
            volume,
            equalizer: EqProfile::default(),
            now_playing: None,
            menus: Vec::new(),
        }
    }

    /// Registers an interactive menu; its token is cancelled on teardown.
    pub fn open_menu(&mut self) -> CancellationToken {
        self.menus.retain(|token| !token.is_cancelled());
        let token = CancellationToken::new();
        self.menus.push(token.clone());
        token
    }

    pub(crate) fn close_menus(&mut self) -> usize {
        let count = self.menus.len();
        for token in self.menus.drain(..) {
            token.cancel();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_menus_cancels_their_tokens() {
        let mut session = Session::new(GuildId::new(1), ChannelId::new(2), ChannelId::new(3), 10, 40);
        let first = session.open_menu();
        let second = session.open_menu();

        assert_eq!(session.close_menus(), 2);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(session.close_menus(), 0);
    }
}
