use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, GuildId, Message, Permissions, UserId},
    builder::{CreateEmbed, CreateMessage},
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    prefix::split_command,
    search::{resolve_track, resolve_tracks},
    PbBot,
};
use crate::{
    audio::{
        dj::{Caller, SwapTarget},
        equalizer::EqProfile,
        player::{PlayerError, StartRequest},
    },
    cache::CacheError,
    storage::CounterMap,
    ui::embeds::{self, QUEUE_PAGE_SIZE},
};

/// How long a queue listing stays up before it is removed.
const MENU_TIMEOUT: Duration = Duration::from_secs(120);

/// Errores del comando que se muestran tal cual al usuario
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Uso: `{0}`")]
    Usage(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("Este comando solo se puede usar en un servidor.")]
    GuildOnly,
    #[error("Solo el dueño del bot puede usar este comando.")]
    OwnerOnly,
    #[error("Necesitas el permiso `Gestionar servidor` para hacer esto.")]
    MissingPermission,
    #[error("No se encontraron resultados para `{0}`.")]
    NoResults(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Prefix,
    Todo,
    Blacklist,
    Stats,
    Play,
    Connect,
    Disconnect,
    Skip,
    Previous,
    Pause,
    Resume,
    Repeat,
    Loop,
    Shuffle,
    Volume,
    Equalizer,
    FastForward,
    Rewind,
    DjLock,
    SwapDj,
    Remove,
    Queue,
    NowPlaying,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        let command = match name {
            "prefix" | "prefixes" => Self::Prefix,
            "todo" => Self::Todo,
            "blacklist" => Self::Blacklist,
            "stats" => Self::Stats,
            "play" | "p" => Self::Play,
            "connect" | "join" => Self::Connect,
            "disconnect" | "dc" | "leave" => Self::Disconnect,
            "skip" | "next" => Self::Skip,
            "previous" | "prev" | "back" => Self::Previous,
            "pause" => Self::Pause,
            "resume" | "unpause" => Self::Resume,
            "repeat" => Self::Repeat,
            "loop" => Self::Loop,
            "shuffle" => Self::Shuffle,
            "volume" | "vol" => Self::Volume,
            "eq" | "equalizer" => Self::Equalizer,
            "fastforward" | "ff" => Self::FastForward,
            "rewind" | "rw" => Self::Rewind,
            "djlock" => Self::DjLock,
            "swapdj" => Self::SwapDj,
            "remove" => Self::Remove,
            "queue" | "q" => Self::Queue,
            "nowplaying" | "np" => Self::NowPlaying,
            _ => return None,
        };
        Some(command)
    }

    /// Nombre canónico, usado en las estadísticas
    pub fn name(self) -> &'static str {
        match self {
            Self::Prefix => "prefix",
            Self::Todo => "todo",
            Self::Blacklist => "blacklist",
            Self::Stats => "stats",
            Self::Play => "play",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Skip => "skip",
            Self::Previous => "previous",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Repeat => "repeat",
            Self::Loop => "loop",
            Self::Shuffle => "shuffle",
            Self::Volume => "volume",
            Self::Equalizer => "eq",
            Self::FastForward => "fastforward",
            Self::Rewind => "rewind",
            Self::DjLock => "djlock",
            Self::SwapDj => "swapdj",
            Self::Remove => "remove",
            Self::Queue => "queue",
            Self::NowPlaying => "nowplaying",
        }
    }
}

/// Parses and runs one command line. Errors end up as a reply.
pub async fn dispatch(ctx: &Context, msg: &Message, bot: &PbBot, line: &str) {
    let Some((name, args)) = split_command(line) else {
        return;
    };
    let Some(command) = Command::parse(&name) else {
        debug!("Comando desconocido: {}", name);
        return;
    };

    bot.cache.stats.record(command.name(), msg.author.id.get());
    debug!("⚡ {} ejecuta '{}'", msg.author.name, command.name());

    if let Err(e) = run(ctx, msg, bot, command, args).await {
        let description = match user_message(&e) {
            Some(message) => message,
            None => {
                error!("❌ Error en comando '{}': {:?}", command.name(), e);
                "Algo salió mal, inténtalo de nuevo más tarde.".to_string()
            }
        };
        if let Err(e) = reply(ctx, msg, embeds::error_embed("Error", &description)).await {
            warn!("⚠️ No se pudo enviar el error: {:?}", e);
        }
    }
}

/// Message for errors the user can act on; `None` for internal failures.
fn user_message(error: &anyhow::Error) -> Option<String> {
    if let Some(e) = error.downcast_ref::<CommandError>() {
        return Some(e.to_string());
    }
    if let Some(e) = error.downcast_ref::<PlayerError>() {
        return match e {
            PlayerError::Transport(_) => None,
            other => Some(other.to_string()),
        };
    }
    if let Some(e) = error.downcast_ref::<CacheError>() {
        return match e {
            CacheError::Store(_) => None,
            other => Some(other.to_string()),
        };
    }
    None
}

async fn run(ctx: &Context, msg: &Message, bot: &PbBot, command: Command, args: &str) -> Result<()> {
    match command {
        Command::Prefix => prefix(ctx, msg, bot, args).await,
        Command::Todo => todo(ctx, msg, bot, args).await,
        Command::Blacklist => blacklist(ctx, msg, bot, args).await,
        Command::Stats => stats(ctx, msg, bot).await,
        Command::Play => play(ctx, msg, bot, args).await,
        Command::Connect => connect(ctx, msg, bot, args).await,
        Command::Queue => queue(ctx, msg, bot, args).await,
        Command::NowPlaying => now_playing(ctx, msg, bot).await,
        _ => player_control(ctx, msg, bot, command, args).await,
    }
}

async fn reply(ctx: &Context, msg: &Message, embed: CreateEmbed) -> Result<Message> {
    let sent = msg
        .channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed).reference_message(msg))
        .await?;
    Ok(sent)
}

async fn author_permissions(ctx: &Context, msg: &Message, guild_id: GuildId) -> Result<Permissions> {
    let member = msg.member(ctx).await?;
    let permissions = ctx
        .cache
        .guild(guild_id)
        .map(|guild| guild.member_permissions(&member))
        .unwrap_or_else(Permissions::empty);
    Ok(permissions)
}

async fn caller(ctx: &Context, msg: &Message) -> Result<(GuildId, Caller)> {
    let guild_id = msg.guild_id.ok_or(CommandError::GuildOnly)?;
    let permissions = author_permissions(ctx, msg, guild_id).await?;
    let caller = Caller::new(msg.author.id, permissions.administrator())
        .in_voice(voice_channel_of(ctx, guild_id, msg.author.id));
    Ok((guild_id, caller))
}

fn voice_channel_of(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&user_id).and_then(|state| state.channel_id)
}

/// Accepts `<@id>`, `<@!id>`, `<#id>` or a bare id.
fn parse_id(arg: &str) -> Option<u64> {
    let digits = arg
        .trim()
        .trim_start_matches("<@!")
        .trim_start_matches("<@")
        .trim_start_matches("<#")
        .trim_end_matches('>');
    digits.parse::<u64>().ok().filter(|id| *id != 0)
}

async fn prefix(ctx: &Context, msg: &Message, bot: &PbBot, args: &str) -> Result<()> {
    let guild_id = msg.guild_id.ok_or(CommandError::GuildOnly)?;
    let (action, value) = split_command(args).unwrap_or_default();
    let key = guild_id.get();

    if !matches!(action.as_str(), "" | "list") {
        let permissions = author_permissions(ctx, msg, guild_id).await?;
        if !permissions.manage_guild() {
            return Err(CommandError::MissingPermission.into());
        }
    }

    let embed = match action.as_str() {
        "" | "list" => {
            let prefixes = bot.prefixes_for(Some(guild_id));
            embeds::list_embed("📝 Prefijos", &prefixes, "No hay prefijos.")
        }
        "add" => {
            if value.is_empty() {
                return Err(CommandError::Usage("prefix add <prefijo>").into());
            }
            if !bot.cache.guilds.add_prefix(key, value).await? {
                return Err(CommandError::Invalid(format!("`{}` ya es un prefijo.", value)).into());
            }
            embeds::success_embed("Prefijo agregado", &format!("Ahora también respondo a `{}`.", value))
        }
        "remove" => {
            if value.is_empty() {
                return Err(CommandError::Usage("prefix remove <prefijo>").into());
            }
            if !bot.cache.guilds.remove_prefix(key, value).await? {
                return Err(CommandError::Invalid(format!("`{}` no es un prefijo de este servidor.", value)).into());
            }
            embeds::success_embed("Prefijo eliminado", &format!("Ya no respondo a `{}`.", value))
        }
        "clear" => {
            bot.cache.guilds.clear_prefixes(key).await?;
            embeds::success_embed("Prefijos reiniciados", "Se usarán los prefijos por defecto.")
        }
        _ => return Err(CommandError::Usage("prefix [list|add|remove|clear] [prefijo]").into()),
    };

    reply(ctx, msg, embed).await?;
    Ok(())
}

async fn todo(ctx: &Context, msg: &Message, bot: &PbBot, args: &str) -> Result<()> {
    let (action, value) = split_command(args).unwrap_or_default();
    let user_id = msg.author.id.get();

    let embed = match action.as_str() {
        "" | "list" => {
            let tasks = bot.cache.todos.get(user_id).unwrap_or_default();
            embeds::list_embed(
                &format!("📋 Tareas de {}", msg.author.name),
                &tasks,
                "Tu lista de tareas está vacía.",
            )
        }
        "add" => {
            if value.is_empty() {
                return Err(CommandError::Usage("todo add <tarea>").into());
            }
            let count = bot.cache.todos.add_task(user_id, value).await?;
            embeds::success_embed("Tarea agregada", &format!("Tarea **#{}** agregada.", count))
        }
        "remove" => {
            if value.is_empty() {
                return Err(CommandError::Usage("todo remove <número|tarea>").into());
            }
            // A number refers to the listed position.
            let tasks = bot.cache.todos.get(user_id).unwrap_or_default();
            let task = value
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| tasks.get(i).cloned())
                .unwrap_or_else(|| value.to_string());

            if bot.cache.todos.remove_task(user_id, &task).await? == 0 {
                return Err(CommandError::Invalid("Esa tarea no está en tu lista.".into()).into());
            }
            embeds::success_embed("Tarea eliminada", &format!("~~{}~~", task))
        }
        "clear" => {
            bot.cache.todos.clear_tasks(user_id).await?;
            embeds::success_embed("Tareas eliminadas", "Tu lista de tareas está vacía.")
        }
        _ => return Err(CommandError::Usage("todo [list|add|remove|clear] [tarea]").into()),
    };

    reply(ctx, msg, embed).await?;
    Ok(())
}

async fn blacklist(ctx: &Context, msg: &Message, bot: &PbBot, args: &str) -> Result<()> {
    if bot.config.owner_id != Some(msg.author.id.get()) {
        return Err(CommandError::OwnerOnly.into());
    }

    let (action, rest) = split_command(args).unwrap_or_default();
    let (target, reason) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let user_id = parse_id(target).ok_or(CommandError::Usage("blacklist [add|remove] <usuario> [razón]"))?;

    let embed = match action.as_str() {
        "add" => {
            let reason = match reason.trim() {
                "" => "Sin razón",
                reason => reason,
            };
            bot.cache.blacklist.add(user_id, reason).await?;
            info!("🚫 Usuario {} bloqueado: {}", user_id, reason);
            embeds::success_embed("Usuario bloqueado", &format!("<@{}> fue bloqueado: {}", user_id, reason))
        }
        "remove" => {
            if !bot.cache.blacklist.remove(user_id).await? {
                return Err(CommandError::Invalid(format!("<@{}> no está bloqueado.", user_id)).into());
            }
            embeds::success_embed("Usuario desbloqueado", &format!("<@{}> fue desbloqueado.", user_id))
        }
        _ => return Err(CommandError::Usage("blacklist [add|remove] <usuario> [razón]").into()),
    };

    reply(ctx, msg, embed).await?;
    Ok(())
}

async fn stats(ctx: &Context, msg: &Message, bot: &PbBot) -> Result<()> {
    let format_top = |map: CounterMap| {
        bot.cache
            .stats
            .top(map, 5)
            .into_iter()
            .map(|(command, count)| format!("`{}`: {}", command, count))
            .collect::<Vec<_>>()
    };

    let embed = embeds::list_embed("📊 Comandos más usados hoy", &format_top(CounterMap::CommandsToday), "Nada por ahora.")
        .field(
            "Histórico",
            {
                let overall = format_top(CounterMap::CommandsOverall);
                if overall.is_empty() {
                    "Nada por ahora.".to_string()
                } else {
                    overall.join("\n")
                }
            },
            false,
        );

    reply(ctx, msg, embed).await?;
    Ok(())
}

async fn play(ctx: &Context, msg: &Message, bot: &PbBot, args: &str) -> Result<()> {
    let (guild_id, caller) = caller(ctx, msg).await?;
    if args.is_empty() {
        return Err(CommandError::Usage("play <canción|url>").into());
    }

    // Members outside the bot's channel can't queue while it is connected.
    if bot.player.session(guild_id).is_some() {
        bot.player.check_presence(guild_id, &caller).await?;
    }

    let tracks = resolve_tracks(&bot.http, args, msg.author.id)
        .await
        .map_err(|e| {
            warn!("🔍 Búsqueda fallida para '{}': {:?}", args, e);
            CommandError::NoResults(args.to_string())
        })?;
    let requested = tracks.len();
    let first = tracks
        .first()
        .cloned()
        .ok_or_else(|| CommandError::NoResults(args.to_string()))?;

    if bot.player.session(guild_id).is_none() {
        let request = StartRequest {
            guild_id,
            voice_channel: caller.voice_channel,
            text_channel: msg.channel_id,
            invoker: msg.author.id,
            tracks: tracks.clone(),
        };
        match bot.player.start(request).await {
            // The registry announces the first track itself.
            Ok(_) => {
                if requested > 1 {
                    let added = bot.player.queue_page(guild_id, 1, 1).await?.total_items;
                    reply(ctx, msg, embeds::playlist_added_embed(added, requested)).await?;
                }
                return Ok(());
            }
            Err(PlayerError::AlreadyActive) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let added = bot.player.enqueue(guild_id, &caller, tracks).await?;
    let embed = if requested > 1 {
        embeds::playlist_added_embed(added, requested)
    } else {
        let position = bot
            .player
            .queue_page(guild_id, 1, 1)
            .await
            .map(|page| page.total_items)
            .unwrap_or(1);
        embeds::track_added_embed(&first, position)
    };
    reply(ctx, msg, embed).await?;
    Ok(())
}

async fn connect(ctx: &Context, msg: &Message, bot: &PbBot, args: &str) -> Result<()> {
    let guild_id = msg.guild_id.ok_or(CommandError::GuildOnly)?;
    let voice_channel = match args {
        "" => voice_channel_of(ctx, guild_id, msg.author.id),
        target => Some(ChannelId::new(
            parse_id(target).ok_or(CommandError::Usage("connect [canal]"))?,
        )),
    };

    let channel = bot
        .player
        .connect(StartRequest {
            guild_id,
            voice_channel,
            text_channel: msg.channel_id,
            invoker: msg.author.id,
            tracks: Vec::new(),
        })
        .await?;

    reply(ctx, msg, embeds::success_embed("Conectado", &format!("Conectado a <#{}>.", channel))).await?;
    Ok(())
}

async fn queue(ctx: &Context, msg: &Message, bot: &PbBot, args: &str) -> Result<()> {
    let (guild_id, caller) = caller(ctx, msg).await?;
    bot.player.check_presence(guild_id, &caller).await?;
    let page = args.parse::<usize>().unwrap_or(1);

    let page = bot.player.queue_page(guild_id, page, QUEUE_PAGE_SIZE).await?;
    let listing = reply(ctx, msg, embeds::queue_embed(&page)).await?;

    // The listing goes away with the session or after a while.
    if let Some(menu) = bot.player.open_menu(guild_id).await {
        let http = ctx.http.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = menu.cancelled() => {}
                _ = tokio::time::sleep(MENU_TIMEOUT) => menu.cancel(),
            }
            if let Err(e) = listing.delete(&http).await {
                debug!("No se pudo borrar la cola: {}", e);
            }
        });
    }
    Ok(())
}

async fn now_playing(ctx: &Context, msg: &Message, bot: &PbBot) -> Result<()> {
    let (guild_id, caller) = caller(ctx, msg).await?;
    bot.player.check_presence(guild_id, &caller).await?;
    let track = bot
        .player
        .now_playing(guild_id)
        .await
        .ok_or(PlayerError::NothingPlaying)?;
    reply(ctx, msg, embeds::now_playing_embed(&track)).await?;
    Ok(())
}

/// Commands that act on the guild's session and answer with a short confirmation.
async fn player_control(
    ctx: &Context,
    msg: &Message,
    bot: &PbBot,
    command: Command,
    args: &str,
) -> Result<()> {
    let (guild_id, caller) = caller(ctx, msg).await?;
    let player = &bot.player;

    let (title, description) = match command {
        Command::Disconnect => {
            player.disconnect(guild_id, &caller).await?;
            ("Desconectado", "Hasta luego 👋".to_string())
        }
        Command::Skip => {
            player.skip(guild_id, &caller).await?;
            ("Saltado", "⏭️ Pasando al siguiente track.".to_string())
        }
        Command::Previous => {
            player.previous(guild_id, &caller).await?;
            ("Anterior", "⏮️ Volviendo al track anterior.".to_string())
        }
        Command::Pause => {
            player.pause(guild_id, &caller).await?;
            ("Pausado", "⏸️ Reproducción pausada.".to_string())
        }
        Command::Resume => {
            player.resume(guild_id, &caller).await?;
            ("Reanudado", "▶️ Reproducción reanudada.".to_string())
        }
        Command::Repeat => {
            let on = player.toggle_repeat(guild_id, &caller).await?;
            ("Repetir", format!("🔂 Repetir {}.", on_off(on)))
        }
        Command::Loop => {
            let on = player.toggle_loop(guild_id, &caller).await?;
            ("Bucle", format!("🔁 Bucle de la cola {}.", on_off(on)))
        }
        Command::Shuffle => {
            player.shuffle(guild_id, &caller).await?;
            ("Mezclado", "🔀 Cola mezclada.".to_string())
        }
        Command::Volume => {
            let requested = args
                .parse::<u32>()
                .map_err(|_| CommandError::Usage("volume <0-1000>"))?;
            let volume = u16::try_from(requested).unwrap_or(u16::MAX);
            let applied = player.set_volume(guild_id, &caller, volume).await?;
            ("Volumen", format!("🔊 Volumen al {}%.", applied))
        }
        Command::Equalizer => {
            let profile = args
                .parse::<EqProfile>()
                .map_err(|e| CommandError::Invalid(e.to_string()))?;
            player.set_equalizer(guild_id, &caller, profile).await?;
            ("Ecualizador", equalizer_reply(profile))
        }
        Command::FastForward | Command::Rewind => {
            let seconds = args
                .parse::<u32>()
                .map_err(|_| CommandError::Usage("fastforward|rewind <segundos>"))?;
            let offset = i64::from(seconds) * 1000;
            let offset = if command == Command::Rewind { -offset } else { offset };
            let position = player.seek_relative(guild_id, &caller, offset).await?;
            (
                "Posición",
                format!(
                    "⏩ Ahora en `{}`.",
                    embeds::format_duration(Duration::from_millis(position))
                ),
            )
        }
        Command::DjLock => {
            let locked = player.toggle_lock(guild_id, &caller).await?;
            let description = if locked {
                "🔒 Solo el DJ y los administradores pueden controlar la música."
            } else {
                "🔓 Todos pueden controlar la música."
            };
            ("Bloqueo DJ", description.to_string())
        }
        Command::SwapDj => {
            let user_id = UserId::new(parse_id(args).ok_or(CommandError::Usage("swapdj <@miembro>"))?);
            let member = guild_id.member(ctx, user_id).await?;
            let target = SwapTarget {
                user_id,
                is_bot: member.user.bot,
                voice_channel: voice_channel_of(ctx, guild_id, user_id),
            };
            player.swap_dj(guild_id, &caller, &target).await?;
            ("Nuevo DJ", format!("🎧 <@{}> es ahora el DJ.", user_id))
        }
        Command::Remove => {
            if args.is_empty() {
                return Err(CommandError::Usage("remove <canción|url>").into());
            }
            let track = resolve_track(&bot.http, args, msg.author.id)
                .await
                .map_err(|_| CommandError::NoResults(args.to_string()))?;
            let removed = player.remove(guild_id, &caller, &track).await?;
            if removed == 0 {
                return Err(CommandError::Invalid(format!("**{}** no está en la cola.", track)).into());
            }
            ("Eliminado", format!("🗑️ **{}** eliminado de la cola ({}).", track, removed))
        }
        other => {
            warn!("Comando '{}' sin manejador de reproducción", other.name());
            return Ok(());
        }
    };

    reply(ctx, msg, embeds::success_embed(title, &description)).await?;
    Ok(())
}

fn on_off(on: bool) -> &'static str {
    if on {
        "activado"
    } else {
        "desactivado"
    }
}

/// The profile is only recorded; the reply must not claim the sound changed.
fn equalizer_reply(profile: EqProfile) -> String {
    format!(
        "🎛️ Perfil `{}` guardado para esta sesión. El audio todavía no pasa por el ecualizador.",
        profile
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{dj::Denied, queue::QueueFull, transport::TransportError};
    use crate::storage::StoreError;

    #[test]
    fn aliases_map_to_canonical_names() {
        assert_eq!(Command::parse("p").map(Command::name), Some("play"));
        assert_eq!(Command::parse("dc").map(Command::name), Some("disconnect"));
        assert_eq!(Command::parse("ff"), Some(Command::FastForward));
        assert_eq!(Command::parse("dance"), None);
    }

    #[test]
    fn ids_are_parsed_from_mentions() {
        assert_eq!(parse_id("<@!42>"), Some(42));
        assert_eq!(parse_id("<@42>"), Some(42));
        assert_eq!(parse_id("<#7>"), Some(7));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("someone"), None);
    }

    #[test]
    fn equalizer_reply_does_not_claim_the_audio_changed() {
        let reply = equalizer_reply(EqProfile::Metal);

        assert!(reply.contains("metal"));
        assert!(reply.contains("todavía no pasa por el ecualizador"));
        assert!(!reply.contains("aplicado"));
    }

    #[test]
    fn only_actionable_errors_reach_the_user() {
        let full = anyhow::Error::from(PlayerError::QueueFull(QueueFull { limit: 100 }));
        let denied = anyhow::Error::from(PlayerError::NotAllowed(Denied::NotDj));
        let transport = anyhow::Error::from(PlayerError::Transport(TransportError::NotConnected));
        let store = anyhow::Error::from(CacheError::Store(StoreError::Unavailable("down".into())));

        assert!(user_message(&full).unwrap().contains("100"));
        assert!(user_message(&denied).is_some());
        assert!(user_message(&anyhow::Error::from(PlayerError::OtherVoiceChannel))
            .unwrap()
            .contains("canal de voz"));
        assert!(user_message(&transport).is_none());
        assert!(user_message(&store).is_none());
        assert!(user_message(&anyhow::anyhow!("boom")).is_none());
    }
}
