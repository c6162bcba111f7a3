use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::queue::{QueuePage, Track};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 PB Bot";

/// Tracks listed per queue page.
pub const QUEUE_PAGE_SIZE: usize = 10;

/// Crea un embed para mostrar la canción actual
pub fn now_playing_embed(track: &Track) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.info.title))
        .url(&track.info.uri)
        .color(colors::MUSIC_PURPLE)
        .field(
            "🎤 Artista",
            track.info.author.as_deref().unwrap_or("Desconocido"),
            true,
        )
        .field("⏱️ Duración", length_label(track.info.length), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}** se ha agregado a la cola", track.info.title))
        .url(&track.info.uri)
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", length_label(track.info.length), true)
        .field("📍 Posición", position.to_string(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Resumen de una playlist agregada; `added` puede ser menor si la cola se llenó
pub fn playlist_added_embed(added: usize, requested: usize) -> CreateEmbed {
    let mut description = format!("**{}** canciones agregadas a la cola", added);
    if added < requested {
        description.push_str(&format!(
            "\n⚠️ {} no entraron porque la cola está llena",
            requested - added
        ));
    }

    CreateEmbed::default()
        .title("📜 Playlist Agregada")
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para la cola, página por página
pub fn queue_embed(page: &QueuePage) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now());

    if page.total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    let mut description = String::new();
    for (position, track) in &page.items {
        let marker = if *position == page.cursor { "▶️ " } else { "" };
        description.push_str(&format!(
            "{}**{}**. {} `[{}]`\n",
            marker,
            position,
            track.info.title,
            length_label(track.info.length)
        ));
    }

    let mut info = format!(
        "**Total:** {} canciones • **Duración:** {}",
        page.total_items,
        format_duration(page.total_duration)
    );
    if page.repeat {
        info.push_str(" • 🔂 **Repetir**");
    }
    if page.looping {
        info.push_str(" • 🔁 **Bucle**");
    }

    embed
        .description(description)
        .field("Información", info, false)
        .footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • PB Bot",
            page.current_page, page.total_pages
        )))
}

/// Numbered list embed, used for prefixes and todo lists.
pub fn list_embed(title: &str, items: &[String], empty: &str) -> CreateEmbed {
    let description = if items.is_empty() {
        empty.to_string()
    } else {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("**{}**. {}", i + 1, item))
            .collect::<Vec<_>>()
            .join("\n")
    };

    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn length_label(length: Option<Duration>) -> String {
    match length {
        Some(length) => format_duration(length),
        None => "🔴 En vivo".to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_drop_empty_hours() {
        assert_eq!(format_duration(Duration::from_secs(75)), "1:15");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1:02:05");
        assert_eq!(length_label(None), "🔴 En vivo");
    }
}
