//! # Bot Module
//!
//! Discord event handling for PB Bot.
//!
//! [`PbBot`] implements Serenity's [`EventHandler`] and owns the two process-wide
//! services every command goes through:
//!
//! - [`CacheManager`]: guild prefixes, blacklist, todo lists and command stats
//! - [`PlayerRegistry`]: one playback session per guild
//!
//! Messages are matched against the guild prefixes ([`prefix`]), checked
//! against the blacklist and the per-user [`cooldown`], then handed to
//! [`commands::dispatch`].

use serenity::{
    all::{Context, EventHandler, Guild, Message, Ready, UnavailableGuild, VoiceState},
    async_trait,
    builder::CreateMessage,
    model::id::GuildId,
};
use std::{sync::Arc, time::Instant};
use tracing::{error, info, warn};

pub mod commands;
pub mod cooldown;
pub mod maintenance;
pub mod prefix;
pub mod search;

use crate::{audio::player::PlayerRegistry, cache::CacheManager, config::Config, ui::embeds};
use cooldown::Cooldown;
use prefix::{resolve_prefix, Invocation};

pub struct PbBot {
    pub config: Arc<Config>,
    pub cache: Arc<CacheManager>,
    pub player: Arc<PlayerRegistry>,
    /// Límite de comandos por usuario
    pub cooldown: Arc<Cooldown>,
    /// Cliente HTTP compartido con yt-dlp
    pub http: reqwest::Client,
}

impl PbBot {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<CacheManager>,
        player: Arc<PlayerRegistry>,
        cooldown: Arc<Cooldown>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            cache,
            player,
            cooldown,
            http,
        }
    }

    /// Guild prefixes, or the defaults when the guild has none (or in DMs).
    pub fn prefixes_for(&self, guild_id: Option<GuildId>) -> Vec<String> {
        guild_id
            .and_then(|id| self.cache.guilds.get(id.get()))
            .map(|config| config.prefixes)
            .filter(|prefixes| !prefixes.is_empty())
            .unwrap_or_else(|| self.config.default_prefixes.clone())
    }
}

#[async_trait]
impl EventHandler for PbBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let prefixes = self.prefixes_for(msg.guild_id);
        let bot_id = ctx.cache.current_user().id;
        let line = match resolve_prefix(&msg.content, &prefixes, bot_id) {
            Some(Invocation::Command(line)) => line,
            Some(Invocation::BareMention) => "prefix",
            None => return,
        };

        if let Some(reason) = self.cache.blacklist.reason(msg.author.id.get()) {
            info!("🚫 Comando ignorado de usuario bloqueado {}", msg.author.id);
            let embed = embeds::error_embed(
                "Bloqueado",
                &format!(
                    "<@{}>, fuiste bloqueado de este bot. Razón: {}",
                    msg.author.id, reason
                ),
            );
            if let Err(e) = msg
                .channel_id
                .send_message(&ctx.http, CreateMessage::new().embed(embed))
                .await
            {
                warn!("⚠️ No se pudo avisar al usuario bloqueado: {:?}", e);
            }
            return;
        }

        if let Err(retry_after) = self.cooldown.check(msg.author.id.get(), Instant::now()) {
            warn!("🐌 Usuario {} limitado por spam ({:?})", msg.author.id, retry_after);
            let embed = embeds::error_embed(
                "Más despacio",
                &format!(
                    "<@{}>, deja de hacer spam. Intenta de nuevo en {:.1}s.",
                    msg.author.id,
                    retry_after.as_secs_f32()
                ),
            );
            if let Err(e) = msg
                .channel_id
                .send_message(&ctx.http, CreateMessage::new().embed(embed))
                .await
            {
                warn!("⚠️ No se pudo avisar del límite de comandos: {:?}", e);
            }
            return;
        }

        commands::dispatch(&ctx, &msg, self, line).await;
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An outage also reports the guild as deleted.
        if incomplete.unavailable {
            return;
        }

        info!("👋 Eliminado del servidor {}", incomplete.id);
        self.player.destroy(incomplete.id).await;
        if let Err(e) = self.cache.guilds.delete(incomplete.id.get()).await {
            error!("❌ No se pudo borrar la configuración de {}: {:?}", incomplete.id, e);
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        // Detectar si el bot fue desconectado
        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id {
            if new.channel_id.is_none() && self.player.destroy(guild_id).await {
                info!("🔌 Bot desconectado en guild {}", guild_id);
            }
            return;
        }

        let Some(session_channel) = self.player.voice_channel(guild_id).await else {
            return;
        };
        let was_here = old.and_then(|state| state.channel_id) == Some(session_channel);
        if was_here && new.channel_id != Some(session_channel) {
            self.player.member_left_voice(guild_id, new.user_id).await;
        }
    }
}
