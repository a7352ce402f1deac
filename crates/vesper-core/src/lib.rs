pub mod chats;
pub mod deletion;
pub mod error;
pub mod messages;
pub mod sweeper;

pub use chats::ChatService;
pub use error::{CoreError, CoreResult};
pub use messages::{ChatPage, MessageService};
pub use sweeper::Sweeper;

use tracing::warn;
use uuid::Uuid;

/// Who is driving a lifecycle transition: a user, or the expiry sweeper.
/// The distinction matters for authorization (System bypasses role checks)
/// and for NotFound semantics (already-purged is success-adjacent for the
/// sweeper, an error for an explicit user call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(Uuid),
    System,
}

/// Current unix time in milliseconds — the storage resolution for every
/// timestamp in the record store.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a stored id back into a Uuid. Rows are only ever written from
/// Uuids, so a failure means a corrupt record; log and fall back to nil
/// rather than poisoning the whole read path.
pub(crate) fn parse_id(raw: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}' in record store: {}", raw, e);
        Uuid::nil()
    })
}
