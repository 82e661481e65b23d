use thiserror::Error;

use relay_types::settings::{MAX_DESTINATIONS, MAX_DISPLAY_NAME_CHARS};
use relay_types::{ChatId, UserId};

pub type RelayResult<T> = Result<T, RelayError>;

/// Broad classes of failure, used for logging and for deciding how to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Capacity,
    Invariant,
    NotFound,
    Conflict,
    Persistence,
    Transport,
}

/// Every expected failure of a relay operation. None of these are fatal and
/// none leave state changed.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("only the person who posted the message can use these buttons")]
    NotOwner,

    #[error("you are not allowed to use this command")]
    NotAdmin,

    #[error("the destination list is full ({} groups)", MAX_DESTINATIONS)]
    RegistryFull,

    #[error("the last administrator cannot be removed")]
    LastAdminProtected,

    #[error("this repost prompt has expired")]
    SessionExpired,

    #[error("group {0} is not in the destination list")]
    DestinationNotFound(ChatId),

    #[error("user {0} is not an administrator")]
    AdminNotFound(UserId),

    #[error("group {0} is already in the destination list")]
    DuplicateDestination(ChatId),

    #[error("user {0} is already an administrator")]
    DuplicateAdmin(UserId),

    #[error("select at least one group first")]
    NoDestinationsSelected,

    #[error("could not save settings: {0}")]
    Persistence(String),

    #[error("could not reach the chat: {0}")]
    Transport(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotOwner | Self::NotAdmin => ErrorKind::Authorization,
            Self::RegistryFull => ErrorKind::Capacity,
            Self::LastAdminProtected => ErrorKind::Invariant,
            Self::SessionExpired | Self::DestinationNotFound(_) | Self::AdminNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::DuplicateDestination(_) | Self::DuplicateAdmin(_) | Self::NoDestinationsSelected => {
                ErrorKind::Conflict
            }
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    pub(crate) fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", err))
    }

    pub(crate) fn name_too_long() -> Self {
        Self::Validation(format!(
            "display names are limited to {} characters",
            MAX_DISPLAY_NAME_CHARS
        ))
    }
}
