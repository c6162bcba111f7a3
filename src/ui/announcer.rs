use async_trait::async_trait;
use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;

use super::embeds;
use crate::audio::{queue::Track, transport::Announcer};

/// Posts "Now Playing" embeds to the session's text channel.
pub struct ChannelAnnouncer {
    http: Arc<Http>,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Announcer for ChannelAnnouncer {
    async fn now_playing(&self, channel_id: ChannelId, track: &Track) -> anyhow::Result<MessageId> {
        let message = channel_id
            .send_message(
                &self.http,
                CreateMessage::new().embed(embeds::now_playing_embed(track)),
            )
            .await?;
        Ok(message.id)
    }

    async fn delete(&self, channel_id: ChannelId, message_id: MessageId) -> anyhow::Result<()> {
        channel_id.delete_message(&self.http, message_id).await?;
        Ok(())
    }
}
