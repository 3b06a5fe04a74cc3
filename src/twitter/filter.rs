use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use super::{MonitoredHandle, NormalizedMention};

/// `Wed Feb 19 19:48:22 +0000 2025`
pub const TWEET_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, TWEET_TIME_FORMAT)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Keep mentions created within `window_seconds` of `now` (inclusive) that
/// actually mention `handle`.
///
/// The window equals the poll interval, so a mention older than one
/// interval at the time its cycle runs is never seen. There is no cursor
/// of already-answered ids.
pub fn filter_mentions(
    mentions: Vec<NormalizedMention>,
    handle: &MonitoredHandle,
    now: DateTime<Utc>,
    window_seconds: u64,
) -> Vec<NormalizedMention> {
    let window = Duration::seconds(window_seconds.min(i32::MAX as u64) as i64);
    let oldest = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

    mentions
        .into_iter()
        .filter(|m| {
            if m.id.is_empty() || m.created_at.is_empty() {
                return false;
            }

            let Some(created) = parse_created_at(&m.created_at) else {
                warn!(tweet_id = %m.id, created_at = %m.created_at, "Error parsing tweet timestamp");
                return false;
            };
            if created < oldest {
                return false;
            }

            let mentioned = m
                .mentioned_users
                .iter()
                .any(|u| handle.matches_screen_name(&u.screen_name));
            if mentioned {
                info!(
                    tweet_id = %m.id,
                    handle = %handle,
                    "Found recent mention (within last {} sec)",
                    window_seconds
                );
            }
            mentioned
        })
        .collect()
}
