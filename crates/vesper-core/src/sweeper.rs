//! Expiry sweeper.
//!
//! Periodic background task that drives expired messages and chats through
//! the same lifecycle managers user actions go through, so every transition
//! emits the same events. The loop is sequential: a run that outlasts the
//! interval delays the next run instead of overlapping it (single-flight).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use vesper_db::Database;

use crate::chats::ChatService;
use crate::error::CoreError;
use crate::messages::MessageService;
use crate::{Actor, now_ms, parse_id};

/// Default schedule: the top of every hour.
const HOUR_SECS: i64 = 3600;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub messages_purged: usize,
    pub chats_deleted: usize,
    pub failures: usize,
}

pub struct Sweeper {
    db: Arc<Database>,
    messages: MessageService,
    chats: ChatService,
}

impl Sweeper {
    pub fn new(db: Arc<Database>, messages: MessageService, chats: ChatService) -> Self {
        Self {
            db,
            messages,
            chats,
        }
    }

    /// Run forever. With no override, runs at the top of every hour;
    /// `interval_override` replaces the schedule with a fixed period
    /// (used in development and tests).
    pub async fn run(self, interval_override: Option<Duration>) {
        info!(
            "Sweeper started ({})",
            match interval_override {
                Some(d) => format!("every {:?}", d),
                None => "hourly, at the top of the hour".to_string(),
            }
        );

        loop {
            let delay = interval_override
                .unwrap_or_else(|| delay_to_next_hour(chrono::Utc::now().timestamp()));
            tokio::time::sleep(delay).await;

            let stats = self.sweep_once(now_ms());
            if stats != SweepStats::default() {
                info!(
                    "Sweep complete: {} messages purged, {} chats deleted, {} failures",
                    stats.messages_purged, stats.chats_deleted, stats.failures
                );
            }
        }
    }

    /// One full sweep at the given instant. Public so tests can inject time.
    ///
    /// Per-item failures are logged and skipped; they never abort the rest
    /// of the batch. `NotFound` from a lifecycle manager means another
    /// writer (a user action or a cascade) got there first — for the
    /// sweeper that is success, not an error.
    pub fn sweep_once(&self, now: i64) -> SweepStats {
        let mut stats = SweepStats::default();

        // Pass 1: messages past their scheduled deletion
        match self.db.expired_messages(now) {
            Ok(rows) => {
                for row in rows {
                    match self.messages.delete_remote(&row.message_id, Actor::System) {
                        Ok(()) => stats.messages_purged += 1,
                        Err(CoreError::NotFound) => {}
                        Err(e) => {
                            stats.failures += 1;
                            warn!("Failed to purge expired message {}: {}", row.message_id, e);
                        }
                    }
                }
            }
            Err(e) => {
                stats.failures += 1;
                warn!("Expired-message scan failed: {}", e);
            }
        }

        // Pass 2: chats whose auto-delete window elapsed. Eligibility is
        // re-derived from the store every run, so a cascade interrupted by a
        // crash resumes cleanly here.
        match self.db.expired_chats(now) {
            Ok(chats) => {
                for chat in chats {
                    match self.chats.delete_full(parse_id(&chat.id), Actor::System) {
                        Ok(()) => stats.chats_deleted += 1,
                        Err(CoreError::NotFound) => {}
                        Err(e) => {
                            stats.failures += 1;
                            warn!("Failed to delete expired chat {}: {}", chat.id, e);
                        }
                    }
                }
            }
            Err(e) => {
                stats.failures += 1;
                warn!("Expired-chat scan failed: {}", e);
            }
        }

        stats
    }
}

fn delay_to_next_hour(unix_secs: i64) -> Duration {
    let next = (unix_secs / HOUR_SECS + 1) * HOUR_SECS;
    Duration::from_secs((next - unix_secs) as u64)
}
