use chrono::{DateTime, Days, NaiveTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bot::cooldown::Cooldown;
use crate::cache::CacheManager;

/// Pushes the in-memory counters to the fast store every `every`.
pub fn spawn_stats_flush(
    cache: Arc<CacheManager>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; nothing to flush yet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = cache.stats.flush().await {
                        error!("❌ Error guardando estadísticas: {:?}", e);
                    }
                }
            }
        }
        info!("🧹 Volcado periódico de estadísticas detenido");
    })
}

/// Forgets users whose command window has expired.
pub fn spawn_cooldown_prune(
    cooldown: Arc<Cooldown>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => cooldown.prune(std::time::Instant::now()),
            }
        }
    })
}

/// Archives the day's counters at every UTC midnight.
pub fn spawn_daily_rollover(cache: Arc<CacheManager>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let day = now.date_naive();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(until_next_midnight(now)) => {
                    match cache.stats.rollover(day).await {
                        Ok(archive) => info!(
                            "📦 Estadísticas del {} archivadas ({} comandos)",
                            archive.date,
                            archive.commands.values().sum::<u64>()
                        ),
                        Err(e) => error!("❌ Error archivando estadísticas del {}: {:?}", day, e),
                    }
                }
            }
        }
        info!("🧹 Archivado diario de estadísticas detenido");
    })
}

pub fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .map(|day| day.and_time(NaiveTime::MIN).and_utc());

    match next {
        Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(24 * 60 * 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn midnight_is_counted_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        assert_eq!(until_next_midnight(now), Duration::from_secs(30 * 60));

        let midnight = Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap();
        assert_eq!(until_next_midnight(midnight), Duration::from_secs(24 * 60 * 60));
    }
}
