use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod storage;
mod ui;

use crate::audio::{player::PlayerRegistry, songbird_transport::SongbirdTransport};
use crate::bot::{cooldown::{Cooldown, COMMAND_WINDOW}, maintenance, PbBot};
use crate::cache::CacheManager;
use crate::config::Config;
use crate::storage::JsonStore;
use crate::ui::announcer::ChannelAnnouncer;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pb_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando PB Bot v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Almacenamiento y caché; sin caché cargado no se atienden comandos
    let store = Arc::new(JsonStore::new(config.data_dir.clone()).await?);
    let cache = Arc::new(CacheManager::new(store.clone(), store));
    cache.load_all().await?;

    // Audio
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let songbird = Songbird::serenity();
    let http_client = reqwest::Client::new();
    let transport = Arc::new(SongbirdTransport::new(
        songbird.clone(),
        http_client.clone(),
        events_tx,
    ));
    let announcer = Arc::new(ChannelAnnouncer::new(Arc::new(Http::new(&config.discord_token))));
    let player = Arc::new(PlayerRegistry::new(
        transport,
        announcer,
        config.max_queue_size,
        config.default_volume,
    ));

    // Tareas en segundo plano
    let shutdown = CancellationToken::new();
    let event_loop = player.clone().spawn_event_loop(events_rx, shutdown.clone());
    let flush = maintenance::spawn_stats_flush(cache.clone(), config.stats_flush_interval, shutdown.clone());
    let rollover = maintenance::spawn_daily_rollover(cache.clone(), shutdown.clone());
    let cooldown = Arc::new(Cooldown::default());
    let prune = maintenance::spawn_cooldown_prune(cooldown.clone(), COMMAND_WINDOW * 12, shutdown.clone());

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let handler = PbBot::new(config.clone(), cache.clone(), player.clone(), cooldown, http_client);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        signal.cancel();
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    shutdown.cancel();
    let closed = player.destroy_all().await;
    info!("🛑 {} sesiones cerradas", closed);

    for task in [event_loop, flush, rollover, prune] {
        if let Err(e) = task.await {
            warn!("⚠️ Tarea en segundo plano terminó con error: {:?}", e);
        }
    }

    cache.dump_all().await?;
    info!("👋 Apagado completo");
    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = tokio::process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
