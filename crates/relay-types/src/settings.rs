use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, Destination, UserId};

/// Maximum number of destinations the registry accepts.
pub const MAX_DESTINATIONS: usize = 100;

/// Maximum length of a destination display name, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

/// Durable relay configuration: everything admins can change at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// `None` until an admin configures the origin chat.
    pub origin: Option<ChatId>,
    /// Insertion-ordered, unique by id.
    pub destinations: Vec<Destination>,
    /// Insertion-ordered, unique.
    pub admins: Vec<UserId>,
}

impl RelaySettings {
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    pub fn destination(&self, id: ChatId) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.id == id)
    }

    pub fn has_destination(&self, id: ChatId) -> bool {
        self.destination(id).is_some()
    }
}
