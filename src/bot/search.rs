use anyhow::{Context, Result};
use serenity::model::id::UserId;
use songbird::input::{AuxMetadata, Compose, YoutubeDl};
use tracing::info;

use crate::audio::queue::{Track, TrackInfo};

pub fn is_url(query: &str) -> bool {
    query.starts_with("https://") || query.starts_with("http://")
}

/// Playlist links from YouTube (`list=`, `/playlist`) and SoundCloud (`/sets/`).
pub fn is_playlist(query: &str) -> bool {
    is_url(query)
        && (query.contains("list=") || query.contains("/playlist") || query.contains("/sets/"))
}

fn clean(query: &str) -> &str {
    query.trim().trim_start_matches('<').trim_end_matches('>')
}

/// Resolves a URL or a search query into a playable track through yt-dlp.
pub async fn resolve_track(http: &reqwest::Client, query: &str, requester: UserId) -> Result<Track> {
    let query = clean(query);

    let mut source = if is_url(query) {
        YoutubeDl::new(http.clone(), query.to_string())
    } else {
        YoutubeDl::new_search(http.clone(), query.to_string())
    };

    let metadata = source
        .aux_metadata()
        .await
        .with_context(|| format!("Sin resultados para `{}`", query))?;

    let fallback = is_url(query).then_some(query);
    let track = track_from_metadata(metadata, fallback, requester)
        .with_context(|| format!("Sin resultados para `{}`", query))?;
    info!("🔍 '{}' resuelto como: {}", query, track);
    Ok(track)
}

/// Like [`resolve_track`], but a playlist link expands into all of its entries.
pub async fn resolve_tracks(http: &reqwest::Client, query: &str, requester: UserId) -> Result<Vec<Track>> {
    let query = clean(query);
    if !is_playlist(query) {
        return Ok(vec![resolve_track(http, query, requester).await?]);
    }

    let mut source = YoutubeDl::new(http.clone(), query.to_string());
    let entries: Vec<AuxMetadata> = source
        .search(None)
        .await
        .with_context(|| format!("No se pudo leer la playlist `{}`", query))?
        .collect();

    let tracks = tracks_from_entries(entries, requester);
    if tracks.is_empty() {
        anyhow::bail!("La playlist `{}` está vacía", query);
    }
    info!("📜 Playlist '{}' expandida en {} tracks", query, tracks.len());
    Ok(tracks)
}

/// Playlist entries without their own URL can't be streamed and are skipped.
fn tracks_from_entries(entries: Vec<AuxMetadata>, requester: UserId) -> Vec<Track> {
    entries
        .into_iter()
        .filter_map(|metadata| track_from_metadata(metadata, None, requester))
        .collect()
}

fn track_from_metadata(metadata: AuxMetadata, fallback_uri: Option<&str>, requester: UserId) -> Option<Track> {
    let uri = metadata
        .source_url
        .or_else(|| fallback_uri.map(str::to_string))?;

    let info = TrackInfo {
        title: metadata.title.or(metadata.track).unwrap_or_else(|| uri.clone()),
        author: metadata.artist.or(metadata.channel),
        uri: uri.clone(),
        length: metadata.duration,
    };
    Some(Track::new(uri, info, requester))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(url: Option<&str>, title: &str) -> AuxMetadata {
        AuxMetadata {
            source_url: url.map(str::to_string),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    #[test]
    fn search_results_need_a_source_url() {
        assert!(track_from_metadata(entry(None, "Song"), None, UserId::new(1)).is_none());
    }

    #[test]
    fn urls_fall_back_to_the_query() {
        let metadata = AuxMetadata {
            channel: Some("Uploader".into()),
            duration: Some(Duration::from_secs(200)),
            ..Default::default()
        };

        let track = track_from_metadata(metadata, Some("https://example.com/a"), UserId::new(1)).unwrap();

        assert_eq!(track.id, "https://example.com/a");
        assert_eq!(track.info.title, "https://example.com/a");
        assert_eq!(track.info.author.as_deref(), Some("Uploader"));
        assert_eq!(track.info.length, Some(Duration::from_secs(200)));
    }

    #[test]
    fn playlist_links_are_recognised() {
        assert!(is_playlist("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist("https://www.youtube.com/watch?v=abc&list=PL123"));
        assert!(is_playlist("https://soundcloud.com/artist/sets/mix"));
        assert!(!is_playlist("https://www.youtube.com/watch?v=abc"));
        assert!(!is_playlist("lofi playlist"));
    }

    #[test]
    fn playlist_entries_keep_their_order_and_skip_unplayable_ones() {
        let entries = vec![
            entry(Some("https://youtu.be/1"), "one"),
            entry(None, "private video"),
            entry(Some("https://youtu.be/2"), "two"),
            entry(Some("https://youtu.be/3"), "three"),
        ];

        let tracks = tracks_from_entries(entries, UserId::new(4));

        let titles: Vec<&str> = tracks.iter().map(|t| t.info.title.as_str()).collect();
        assert_eq!(titles, vec!["one", "two", "three"]);
        assert!(tracks.iter().all(|t| t.requester == UserId::new(4)));
    }
}
