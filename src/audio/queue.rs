use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{fmt, time::Duration};
use tracing::{debug, info};

/// Metadata resolved for a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub author: Option<String>,
    pub uri: String,
    pub length: Option<Duration>,
}

/// Queue entry. Immutable once built.
#[derive(Debug, Clone)]
pub struct Track {
    /// Identifier handed to the voice transport (a playable URL).
    pub id: String,
    pub info: TrackInfo,
    pub requester: UserId,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(id: impl Into<String>, info: TrackInfo, requester: UserId) -> Self {
        Self {
            id: id.into(),
            info,
            requester,
            added_at: Utc::now(),
        }
    }

    /// Same underlying track, whoever requested it.
    pub fn same_track(&self, other: &Track) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info.title)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Solo puede haber `{limit}` canciones en la cola a la vez.")]
pub struct QueueFull {
    pub limit: usize,
}

/// Ordered track list with a cursor.
///
/// `cursor` is the index of the next track to play, so the track currently
/// playing is `tracks[cursor - 1]`. Every operation keeps
/// `0 <= cursor <= tracks.len()`. Played tracks stay in the list, which is
/// what makes `previous` and queue looping possible.
#[derive(Debug)]
pub struct TrackQueue {
    tracks: Vec<Track>,
    cursor: usize,
    repeat: bool,
    looping: bool,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            tracks: Vec::new(),
            cursor: 0,
            repeat: false,
            looping: false,
            max_size,
        }
    }

    /// Agrega un track al final de la cola
    pub fn push(&mut self, track: Track) -> Result<(), QueueFull> {
        if self.tracks.len() >= self.max_size {
            return Err(QueueFull {
                limit: self.max_size,
            });
        }

        info!("➕ Agregado a la cola: {}", track);
        self.tracks.push(track);
        Ok(())
    }

    /// Agrega múltiples tracks (playlist) hasta llenar la cola.
    ///
    /// Rejected outright only when the queue is already full; otherwise the
    /// tracks that don't fit are dropped and the added count is returned.
    pub fn extend(&mut self, tracks: Vec<Track>) -> Result<usize, QueueFull> {
        let available_space = self.max_size.saturating_sub(self.tracks.len());
        if available_space == 0 {
            return Err(QueueFull {
                limit: self.max_size,
            });
        }

        let to_add = tracks.len().min(available_space);
        self.tracks.extend(tracks.into_iter().take(to_add));

        info!("➕ Agregadas {} canciones a la cola", to_add);
        Ok(to_add)
    }

    /// Moves the cursor to the next track to play and returns it.
    ///
    /// With repeat on, the cursor first steps back so the current track plays
    /// again. Past the end, looping wraps to the first track; without looping
    /// `None` is returned and the cursor stays at the end.
    pub fn next_track(&mut self) -> Option<Track> {
        if self.repeat {
            self.cursor = self.cursor.saturating_sub(1);
        }

        if self.cursor >= self.tracks.len() {
            if !self.looping || self.tracks.is_empty() {
                info!("📭 Cola terminada, no hay siguiente track");
                return None;
            }
            info!("🔁 Fin de la cola, volviendo al inicio");
            self.cursor = 0;
        }

        let track = self.tracks[self.cursor].clone();
        self.cursor += 1;
        debug!("➡️ Siguiente en cola ({}): {}", self.cursor, track);
        Some(track)
    }

    /// Steps the cursor back two places, clamped at the start.
    ///
    /// Meant to be followed by stopping the current track: the resulting
    /// [`next_track`](Self::next_track) moves one forward again, so the net
    /// effect is playing the previous track.
    pub fn rewind(&mut self) {
        self.cursor = self.cursor.saturating_sub(2);
    }

    /// Removes every entry that is the same track as `track`.
    ///
    /// Entries removed before the cursor pull it back by one each, so it keeps
    /// pointing at the same upcoming track.
    pub fn remove_matching(&mut self, track: &Track) -> usize {
        let cursor = self.cursor;
        let mut index = 0;
        let mut removed = 0;
        let mut before_cursor = 0;

        self.tracks.retain(|candidate| {
            let keep = !candidate.same_track(track);
            if !keep {
                removed += 1;
                if index < cursor {
                    before_cursor += 1;
                }
            }
            index += 1;
            keep
        });
        self.cursor -= before_cursor;

        if removed > 0 {
            info!("🗑️ Eliminadas {} entradas de '{}'", removed, track);
        }
        removed
    }

    /// Mezcla la cola.
    ///
    /// The cursor is left as is, so it may now point at a different track:
    /// shuffling changes what plays next, not the position.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.tracks.shuffle(&mut rng);
        info!("🔀 Cola mezclada");
    }

    /// Limpia la cola
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.cursor = 0;
        info!("🗑️ Cola limpiada");
    }

    pub fn toggle_repeat(&mut self) -> bool {
        self.repeat = !self.repeat;
        self.repeat
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        self.looping
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn is_loop(&self) -> bool {
        self.looping
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Track most recently handed out by [`next_track`](Self::next_track).
    pub fn current(&self) -> Option<&Track> {
        self.cursor.checked_sub(1).and_then(|i| self.tracks.get(i))
    }

    /// Obtiene una página específica de la cola (1-based)
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.tracks.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };
        let safe_page = page.clamp(1, total_pages);
        let start = (safe_page - 1) * items_per_page;
        let end = (start + items_per_page).min(total_items);

        QueuePage {
            items: self.tracks[start..end]
                .iter()
                .cloned()
                .enumerate()
                .map(|(offset, track)| (start + offset + 1, track))
                .collect(),
            current_page: safe_page,
            total_pages,
            total_items,
            cursor: self.cursor,
            total_duration: self.tracks.iter().filter_map(|t| t.info.length).sum(),
            repeat: self.repeat,
            looping: self.looping,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    /// `(1-based position, track)`
    pub items: Vec<(usize, Track)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub cursor: usize,
    pub total_duration: Duration,
    pub repeat: bool,
    pub looping: bool,
}

#[cfg(test)]
pub(crate) fn test_track(id: &str) -> Track {
    Track::new(
        id,
        TrackInfo {
            title: id.to_uppercase(),
            author: None,
            uri: format!("https://example.com/{id}"),
            length: Some(Duration::from_secs(180)),
        },
        UserId::new(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(ids: &[&str]) -> TrackQueue {
        let mut queue = TrackQueue::new(100);
        queue
            .extend(ids.iter().map(|id| test_track(id)).collect())
            .unwrap();
        queue
    }

    fn ids(queue: &TrackQueue) -> Vec<&str> {
        queue.tracks().iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn plays_in_order_then_runs_out() {
        let mut queue = queue_of(&["a", "b", "c"]);

        let played: Vec<String> = std::iter::from_fn(|| queue.next_track())
            .map(|t| t.id)
            .collect();

        assert_eq!(played, vec!["a", "b", "c"]);
        assert_eq!(queue.cursor(), 3);
        assert!(queue.next_track().is_none());
        assert_eq!(queue.cursor(), 3);
    }

    #[test]
    fn repeat_replays_the_current_track() {
        let mut queue = queue_of(&["a", "b"]);
        queue.next_track();
        queue.next_track();
        queue.toggle_repeat();

        let again = queue.next_track().unwrap();

        assert_eq!(again.id, "b");
        assert_eq!(queue.cursor(), 2);
    }

    #[test]
    fn loop_wraps_to_the_first_track() {
        let mut queue = queue_of(&["a", "b"]);
        queue.next_track();
        queue.next_track();
        queue.toggle_loop();

        assert_eq!(queue.next_track().unwrap().id, "a");
        assert_eq!(queue.cursor(), 1);
    }

    #[test]
    fn rewind_then_next_plays_the_previous_track() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.next_track();
        queue.next_track();
        assert_eq!(queue.cursor(), 2);

        queue.rewind();
        assert_eq!(queue.next_track().unwrap().id, "a");
    }

    #[test]
    fn rewind_clamps_at_the_start() {
        let mut queue = queue_of(&["a"]);
        queue.next_track();

        queue.rewind();
        queue.rewind();

        assert_eq!(queue.cursor(), 0);
        assert_eq!(queue.next_track().unwrap().id, "a");
    }

    #[test]
    fn removing_played_entries_keeps_the_upcoming_track() {
        let mut queue = queue_of(&["a", "b", "a", "c"]);
        queue.next_track();
        queue.next_track();
        queue.next_track();
        assert_eq!(queue.cursor(), 3);

        let removed = queue.remove_matching(&test_track("a"));

        assert_eq!(removed, 2);
        assert_eq!(ids(&queue), vec!["b", "c"]);
        assert_eq!(queue.cursor(), 1);
        assert_eq!(queue.next_track().unwrap().id, "c");
    }

    #[test]
    fn removing_upcoming_entries_leaves_the_cursor() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.next_track();

        queue.remove_matching(&test_track("c"));

        assert_eq!(queue.cursor(), 1);
        assert!(queue.cursor() <= queue.len());
    }

    #[test]
    fn full_queue_rejects_more_tracks() {
        let mut queue = TrackQueue::new(100);
        for i in 0..100 {
            queue.push(test_track(&i.to_string())).unwrap();
        }

        assert_eq!(
            queue.push(test_track("overflow")),
            Err(QueueFull { limit: 100 })
        );
        assert_eq!(
            queue.extend(vec![test_track("x")]),
            Err(QueueFull { limit: 100 })
        );
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn playlist_is_truncated_to_the_free_space() {
        let mut queue = TrackQueue::new(3);
        queue.push(test_track("a")).unwrap();

        let added = queue
            .extend(vec![test_track("b"), test_track("c"), test_track("d")])
            .unwrap();

        assert_eq!(added, 2);
        assert_eq!(ids(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn shuffle_keeps_tracks_and_cursor() {
        let mut queue = queue_of(&["a", "b", "c", "d", "e"]);
        queue.next_track();
        queue.next_track();

        queue.shuffle();

        let mut sorted = ids(&queue);
        sorted.sort_unstable();
        assert_eq!(sorted, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(queue.cursor(), 2);
    }

    #[test]
    fn pages_are_one_based_and_clamped() {
        let queue = queue_of(&["a", "b", "c", "d", "e"]);

        let page = queue.page(2, 2);
        assert_eq!(page.total_pages, 3);
        assert_eq!(
            page.items.iter().map(|(n, t)| (*n, t.id.as_str())).collect::<Vec<_>>(),
            vec![(3, "c"), (4, "d")]
        );
        assert_eq!(queue.page(10, 2).current_page, 3);
        assert_eq!(page.total_duration, Duration::from_secs(900));
    }
}
