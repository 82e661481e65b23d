use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use relay_db::SettingsStore;
use relay_types::settings::{MAX_DESTINATIONS, MAX_DISPLAY_NAME_CHARS, RelaySettings};
use relay_types::{ChatId, Destination, UserId};

use crate::error::{RelayError, RelayResult};

/// Destinations, origin chat and admins, mirrored in durable storage.
///
/// Mutations are serialized by the write lock, which is held across the
/// save. Each mutation runs on a copy of the settings; the copy replaces the
/// live state only after it has been persisted, so a failed save changes
/// nothing. Admin checks are the caller's job.
pub struct DestinationRegistry {
    store: Arc<dyn SettingsStore>,
    state: RwLock<RelaySettings>,
}

impl DestinationRegistry {
    pub fn load(store: Arc<dyn SettingsStore>) -> anyhow::Result<Self> {
        let settings = store.load_settings()?;

        info!(
            "Loaded {} destinations, {} admins, origin {}",
            settings.destinations.len(),
            settings.admins.len(),
            settings.origin.map_or("unset".to_string(), |id| id.to_string())
        );
        if settings.admins.is_empty() {
            warn!("No administrators configured; admin commands are unavailable until ADMIN_IDS seeds one");
        }

        Ok(Self {
            store,
            state: RwLock::new(settings),
        })
    }

    // -- Reads --

    pub fn snapshot(&self) -> RelaySettings {
        self.read().clone()
    }

    pub fn origin(&self) -> Option<ChatId> {
        self.read().origin
    }

    pub fn destinations(&self) -> Vec<Destination> {
        self.read().destinations.clone()
    }

    pub fn destination_ids(&self) -> Vec<ChatId> {
        self.read().destinations.iter().map(|d| d.id).collect()
    }

    pub fn destination(&self, id: ChatId) -> Option<Destination> {
        self.read().destination(id).cloned()
    }

    pub fn admins(&self) -> Vec<UserId> {
        self.read().admins.clone()
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        self.read().is_admin(user)
    }

    // -- Mutations --

    pub fn add_destination(&self, id: ChatId, name: &str) -> RelayResult<Destination> {
        if id.0 == 0 {
            return Err(RelayError::Validation("0 is not a valid group id".into()));
        }
        let name = name.trim();
        if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(RelayError::name_too_long());
        }
        let destination = Destination::new(
            id,
            if name.is_empty() { id.to_string() } else { name.to_string() },
        );

        self.commit(|settings| {
            if settings.has_destination(id) {
                return Err(RelayError::DuplicateDestination(id));
            }
            if settings.destinations.len() >= MAX_DESTINATIONS {
                return Err(RelayError::RegistryFull);
            }
            settings.destinations.push(destination.clone());
            Ok(())
        })?;

        info!("Destination added: {} ({})", destination.display_name, id);
        Ok(destination)
    }

    pub fn remove_destination(&self, id: ChatId) -> RelayResult<Destination> {
        let removed = self.commit(|settings| {
            let index = settings
                .destinations
                .iter()
                .position(|d| d.id == id)
                .ok_or(RelayError::DestinationNotFound(id))?;
            Ok(settings.destinations.remove(index))
        })?;

        info!("Destination removed: {} ({})", removed.display_name, id);
        Ok(removed)
    }

    /// Overwrite the origin chat. Returns the previous one.
    pub fn set_origin(&self, id: ChatId) -> RelayResult<Option<ChatId>> {
        if id.0 == 0 {
            return Err(RelayError::Validation("0 is not a valid group id".into()));
        }
        let previous = self.commit(|settings| Ok(settings.origin.replace(id)))?;

        info!("Origin chat set to {} (was {:?})", id, previous);
        Ok(previous)
    }

    pub fn add_admin(&self, id: UserId) -> RelayResult<()> {
        if id.0 == 0 {
            return Err(RelayError::Validation("0 is not a valid user id".into()));
        }
        self.commit(|settings| {
            if settings.is_admin(id) {
                return Err(RelayError::DuplicateAdmin(id));
            }
            settings.admins.push(id);
            Ok(())
        })?;

        info!("Admin added: {}", id);
        Ok(())
    }

    pub fn remove_admin(&self, id: UserId) -> RelayResult<()> {
        self.commit(|settings| {
            let index = settings
                .admins
                .iter()
                .position(|a| *a == id)
                .ok_or(RelayError::AdminNotFound(id))?;
            if settings.admins.len() == 1 {
                return Err(RelayError::LastAdminProtected);
            }
            settings.admins.remove(index);
            Ok(())
        })?;

        info!("Admin removed: {}", id);
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RelaySettings> {
        // Live state is only ever replaced wholesale, so a poisoned lock still guards consistent data
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit<T>(&self, mutate: impl FnOnce(&mut RelaySettings) -> RelayResult<T>) -> RelayResult<T> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let mut next = state.clone();
        let out = mutate(&mut next)?;

        if let Err(e) = self.store.save_settings(&next) {
            warn!("Settings save failed, change discarded: {:#}", e);
            return Err(RelayError::persistence(e));
        }

        *state = next;
        Ok(out)
    }
}
