pub mod auth;
pub mod chats;
pub mod messages;
pub mod middleware;
pub mod users;

use axum::http::StatusCode;
use tracing::error;

use vesper_core::CoreError;

/// Map core failures to HTTP status codes. Store failures are logged here;
/// everything else is a well-understood client outcome.
pub(crate) fn status_for(err: CoreError) -> StatusCode {
    match err {
        CoreError::NotFound | CoreError::RecipientNotFound => StatusCode::NOT_FOUND,
        CoreError::NotAuthorized | CoreError::ChatAccessDenied => StatusCode::FORBIDDEN,
        CoreError::InvalidParticipants => StatusCode::BAD_REQUEST,
        CoreError::Store(e) => {
            error!("Record store failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
