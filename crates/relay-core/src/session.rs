use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use relay_types::{ChatId, MessageRef, PromptHandle, UserId};

use crate::error::{RelayError, RelayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting toggle / select-all / clear / send.
    Open,
    /// Send accepted; copies in progress.
    Dispatching,
    /// Terminal. The session is gone from the store.
    Closed,
}

/// One pending repost: which destinations its owner has picked so far.
#[derive(Debug, Clone)]
pub struct PendingRepost {
    pub handle: PromptHandle,
    pub source: MessageRef,
    pub owner: UserId,
    selected: BTreeSet<ChatId>,
    state: SessionState,
    created_at: Instant,
}

impl PendingRepost {
    pub fn new(handle: PromptHandle, source: MessageRef, owner: UserId) -> Self {
        Self {
            handle,
            source,
            owner,
            selected: BTreeSet::new(),
            state: SessionState::Open,
            created_at: Instant::now(),
        }
    }

    pub fn selected(&self) -> &BTreeSet<ChatId> {
        &self.selected
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Ownership is checked before anything else, so a stranger learns nothing
    /// about the session's state.
    fn authorize(&self, actor: UserId) -> RelayResult<()> {
        if actor != self.owner {
            return Err(RelayError::NotOwner);
        }
        if self.state != SessionState::Open {
            return Err(RelayError::SessionExpired);
        }
        Ok(())
    }

    /// Flip `destination`. `registered` is checked only when adding. Returns
    /// whether the destination is now selected.
    pub fn toggle(&mut self, actor: UserId, destination: ChatId, registered: bool) -> RelayResult<bool> {
        self.authorize(actor)?;
        if self.selected.remove(&destination) {
            return Ok(false);
        }
        if !registered {
            return Err(RelayError::DestinationNotFound(destination));
        }
        self.selected.insert(destination);
        Ok(true)
    }

    /// Replace the selection with a snapshot of the registry.
    pub fn select_all(&mut self, actor: UserId, all: impl IntoIterator<Item = ChatId>) -> RelayResult<()> {
        self.authorize(actor)?;
        self.selected = all.into_iter().collect();
        Ok(())
    }

    pub fn clear(&mut self, actor: UserId) -> RelayResult<()> {
        self.authorize(actor)?;
        self.selected.clear();
        Ok(())
    }

    /// `Open → Dispatching`. Returns the frozen selection. An empty selection
    /// is refused and the session stays open.
    pub fn begin_dispatch(&mut self, actor: UserId) -> RelayResult<BTreeSet<ChatId>> {
        self.authorize(actor)?;
        if self.selected.is_empty() {
            return Err(RelayError::NoDestinationsSelected);
        }
        self.state = SessionState::Dispatching;
        Ok(self.selected.clone())
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// Live selection sessions keyed by prompt handle.
///
/// The map lock is only held for lookups and inserts. Each session has its
/// own async lock; a send keeps it through dispatch, so actions queued behind
/// a send find the session closed.
#[derive(Default)]
pub struct SessionStore {
    sessions: StdMutex<HashMap<PromptHandle, Arc<Mutex<PendingRepost>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: PendingRepost) {
        let handle = session.handle;
        self.map().insert(handle, Arc::new(Mutex::new(session)));
        debug!("Session {} opened", handle);
    }

    pub fn contains(&self, handle: PromptHandle) -> bool {
        self.map().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Run a selection edit on the session, then `render` the resulting
    /// selection. The session stays locked until the render finishes, so
    /// renders land in the order the edits were applied.
    pub async fn edit<F, R, Fut, T>(&self, handle: PromptHandle, edit: F, render: R) -> RelayResult<T>
    where
        F: FnOnce(&mut PendingRepost) -> RelayResult<()>,
        R: FnOnce(BTreeSet<ChatId>) -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = self.get(handle)?;
        let mut session = entry.lock().await;
        edit(&mut session)?;
        Ok(render(session.selected.clone()).await)
    }

    /// Send: freeze the selection, run `dispatch` with it while holding the
    /// session lock, then close the session and drop it from the store.
    pub async fn send<F, Fut, T>(&self, handle: PromptHandle, actor: UserId, dispatch: F) -> RelayResult<T>
    where
        F: FnOnce(MessageRef, BTreeSet<ChatId>) -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = self.get(handle)?;
        let mut session = entry.lock().await;
        let selection = session.begin_dispatch(actor)?;

        info!(
            "Session {} dispatching to {} destinations",
            handle,
            selection.len()
        );
        let out = dispatch(session.source, selection).await;

        session.close();
        self.map().remove(&handle);
        debug!("Session {} closed", handle);
        Ok(out)
    }

    /// Drop open sessions older than `max_age`. Returns how many were dropped.
    /// Sessions whose lock is busy are mid-action and are left alone.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut sessions = self.map();
        let before = sessions.len();
        sessions.retain(|_, entry| match entry.try_lock() {
            Ok(session) => session.age() <= max_age,
            Err(_) => true,
        });
        before - sessions.len()
    }

    fn get(&self, handle: PromptHandle) -> RelayResult<Arc<Mutex<PendingRepost>>> {
        self.map().get(&handle).cloned().ok_or(RelayError::SessionExpired)
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<PromptHandle, Arc<Mutex<PendingRepost>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
