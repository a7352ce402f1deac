use thiserror::Error;

/// Failure taxonomy for the lifecycle managers. Every operation returns a
/// typed result so HTTP-layer collaborators can map variants to status
/// codes; nothing here is ever thrown as an uncontrolled fault.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity absent or already purged.
    #[error("not found")]
    NotFound,

    /// Actor lacks the required role (sender-only or participant-only).
    #[error("not authorized")]
    NotAuthorized,

    /// An explicit chat reference was given but the actor is not a participant.
    #[error("no access to this chat")]
    ChatAccessDenied,

    #[error("recipient not found")]
    RecipientNotFound,

    /// A chat needs at least two distinct participants.
    #[error("invalid participant set")]
    InvalidParticipants,

    /// Record store failure — surfaced as-is, retry policy belongs to the caller.
    #[error("record store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
