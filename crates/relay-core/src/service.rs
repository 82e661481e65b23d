use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use relay_types::actions::SessionAction;
use relay_types::settings::MAX_DISPLAY_NAME_CHARS;
use relay_types::{ChatId, Destination, MessageRef, PromptHandle, UserId};

use crate::dispatch::{DEFAULT_CONCURRENCY, DispatchPlan, DispatchReport};
use crate::error::{RelayError, RelayResult};
use crate::prompt::Prompt;
use crate::rate_limit::{DEFAULT_CAPACITY, DEFAULT_WINDOW, RateLimiter};
use crate::registry::DestinationRegistry;
use crate::session::{PendingRepost, SessionStore};
use crate::transport::ChatTransport;

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub rate_window: Duration,
    pub rate_capacity: u32,
    pub dispatch_concurrency: usize,
    /// Warn every other admin when a repost has failed destinations.
    pub notify_admins_on_failure: bool,
    /// Used to point people at the bot's private chat.
    pub bot_username: Option<String>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            rate_window: DEFAULT_WINDOW,
            rate_capacity: DEFAULT_CAPACITY,
            dispatch_concurrency: DEFAULT_CONCURRENCY,
            notify_admins_on_failure: false,
            bot_username: None,
        }
    }
}

/// What happened to a message posted in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginOutcome {
    /// Not posted in the origin chat (or no origin configured).
    NotOrigin,
    RateLimited,
    NoDestinations,
    /// A selection prompt was sent to the author.
    Offered(PromptHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Selection changed; `selected` destinations are now ticked.
    Updated { selected: usize },
    Sent(DispatchReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub open_sessions: usize,
    pub sessions_opened: u64,
    pub reposts_sent: u64,
    pub copies_delivered: u64,
    pub copies_failed: u64,
    pub rate_limited: u64,
}

#[derive(Default)]
struct Counters {
    sessions_opened: AtomicU64,
    reposts_sent: AtomicU64,
    copies_delivered: AtomicU64,
    copies_failed: AtomicU64,
    rate_limited: AtomicU64,
}

/// The repost coordinator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    registry: DestinationRegistry,
    sessions: SessionStore,
    limiter: RateLimiter,
    transport: Arc<dyn ChatTransport>,
    options: RelayOptions,
    started_at: DateTime<Utc>,
    counters: Counters,
}

impl Relay {
    pub fn new(
        registry: DestinationRegistry,
        transport: Arc<dyn ChatTransport>,
        options: RelayOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                registry,
                sessions: SessionStore::new(),
                limiter: RateLimiter::new(options.rate_window, options.rate_capacity),
                transport,
                options,
                started_at: Utc::now(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.inner.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn transport(&self) -> &dyn ChatTransport {
        self.inner.transport.as_ref()
    }

    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    /// Count one rate-limited operation for `actor`.
    pub fn admit(&self, actor: UserId) -> bool {
        let allowed = self.inner.limiter.admit(actor);
        if !allowed {
            self.inner.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    pub fn stats(&self) -> StatsSnapshot {
        let c = &self.inner.counters;
        StatsSnapshot {
            started_at: self.inner.started_at,
            open_sessions: self.inner.sessions.len(),
            sessions_opened: c.sessions_opened.load(Ordering::Relaxed),
            reposts_sent: c.reposts_sent.load(Ordering::Relaxed),
            copies_delivered: c.copies_delivered.load(Ordering::Relaxed),
            copies_failed: c.copies_failed.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
        }
    }

    // -- Selection sessions --

    /// A message was posted somewhere. When it is the origin chat, offer its
    /// author a private selection prompt and open a session for it.
    pub async fn handle_origin_message(
        &self,
        source: MessageRef,
        author: UserId,
        author_label: &str,
    ) -> RelayResult<OriginOutcome> {
        if self.inner.registry.origin() != Some(source.chat_id) {
            return Ok(OriginOutcome::NotOrigin);
        }

        if !self.admit(author) {
            info!("Rate limited repost request from {}", author);
            self.notify(
                author.private_chat(),
                "⏳ You are sending messages too quickly. Wait a minute before the next repost.",
            )
            .await;
            return Ok(OriginOutcome::RateLimited);
        }

        let destinations = self.inner.registry.destinations();
        if destinations.is_empty() {
            debug!("No destinations configured; ignoring message {}", source.message_id);
            return Ok(OriginOutcome::NoDestinations);
        }

        let prompt = Prompt::selection(&destinations, &Default::default());
        let handle = match self.inner.transport.send_prompt(author, &prompt).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Could not send selection prompt to {}: {:#}", author, e);
                let notice = self.private_chat_notice(author_label);
                self.notify(source.chat_id, &notice).await;
                return Err(RelayError::Transport(format!("{:#}", e)));
            }
        };

        self.inner
            .sessions
            .insert(PendingRepost::new(handle, source, author));
        self.inner.counters.sessions_opened.fetch_add(1, Ordering::Relaxed);
        info!(
            "Offered repost of message {} to {} (session {})",
            source.message_id, author, handle
        );
        Ok(OriginOutcome::Offered(handle))
    }

    /// Apply one button press to a session.
    pub async fn handle_session_action(
        &self,
        handle: PromptHandle,
        actor: UserId,
        action: SessionAction,
    ) -> RelayResult<ActionOutcome> {
        let registry = &self.inner.registry;
        let sessions = &self.inner.sessions;
        let render = |selection: BTreeSet<ChatId>| {
            let relay = self.clone();
            async move {
                relay.render_selection(handle, &selection).await;
                selection.len()
            }
        };

        let selected = match action {
            SessionAction::Toggle(destination) => {
                let registered = registry.destination(destination).is_some();
                sessions
                    .edit(
                        handle,
                        move |s| s.toggle(actor, destination, registered).map(|_| ()),
                        render,
                    )
                    .await?
            }
            SessionAction::SelectAll => {
                let all = registry.destination_ids();
                sessions
                    .edit(handle, move |s| s.select_all(actor, all), render)
                    .await?
            }
            SessionAction::Clear => sessions.edit(handle, move |s| s.clear(actor), render).await?,
            SessionAction::Send => {
                let report = self.send(handle, actor).await?;
                return Ok(ActionOutcome::Sent(report));
            }
        };

        Ok(ActionOutcome::Updated { selected })
    }

    async fn render_selection(&self, handle: PromptHandle, selection: &BTreeSet<ChatId>) {
        let prompt = Prompt::selection(&self.inner.registry.destinations(), selection);
        if let Err(e) = self.inner.transport.update_prompt(handle, &prompt).await {
            // Telegram refuses edits that change nothing; the selection itself is already applied
            debug!("Prompt {} not re-rendered: {:#}", handle, e);
        }
    }

    async fn send(&self, handle: PromptHandle, actor: UserId) -> RelayResult<DispatchReport> {
        let relay = self.clone();
        let report = self
            .inner
            .sessions
            .send(handle, actor, move |source, selection| async move {
                let inner = &relay.inner;
                let plan = DispatchPlan::new(&inner.registry.destinations(), &selection);
                plan.run(inner.transport.clone(), source, inner.options.dispatch_concurrency)
                    .await
            })
            .await?;

        let c = &self.inner.counters;
        c.reposts_sent.fetch_add(1, Ordering::Relaxed);
        c.copies_delivered.fetch_add(report.success_count as u64, Ordering::Relaxed);
        c.copies_failed.fetch_add(report.failure_count() as u64, Ordering::Relaxed);
        info!(
            "Session {} done: {} delivered, {} failed",
            handle,
            report.success_count,
            report.failure_count()
        );

        let transport = &self.inner.transport;
        if let Err(e) = transport.update_prompt(handle, &Prompt::report(&report)).await {
            warn!("Could not show repost summary in {}: {:#}", handle, e);
            self.notify(handle.chat_id, &report.summary()).await;
        }

        if self.inner.options.notify_admins_on_failure && !report.failures.is_empty() {
            self.alert_admins(actor, &report).await;
        }

        Ok(report)
    }

    async fn alert_admins(&self, owner: UserId, report: &DispatchReport) {
        let mut text = format!(
            "⚠️ A repost by {} failed for {} destination(s):",
            owner,
            report.failure_count()
        );
        for failure in &report.failures {
            text.push_str(&format!(
                "\n• {} ({}): {}",
                failure.display_name, failure.destination, failure.reason
            ));
        }

        for admin in self.inner.registry.admins() {
            if admin != owner {
                self.notify(admin.private_chat(), &text).await;
            }
        }
    }

    // -- Administration --

    pub fn require_admin(&self, actor: UserId) -> RelayResult<()> {
        if self.inner.registry.is_admin(actor) {
            Ok(())
        } else {
            Err(RelayError::NotAdmin)
        }
    }

    /// Register a destination. Without a name, the chat's own title is used
    /// when the bot can see it.
    pub async fn add_destination(
        &self,
        actor: UserId,
        id: ChatId,
        name: Option<&str>,
    ) -> RelayResult<Destination> {
        self.require_admin(actor)?;
        let name = match name {
            Some(name) => name.to_string(),
            None => match self.inner.transport.chat_title(id).await {
                Ok(title) => title
                    .map(|t| t.trim().chars().take(MAX_DISPLAY_NAME_CHARS).collect())
                    .unwrap_or_default(),
                Err(e) => {
                    debug!("No title for {}: {:#}", id, e);
                    String::new()
                }
            },
        };
        self.inner.registry.add_destination(id, &name)
    }

    pub fn remove_destination(&self, actor: UserId, id: ChatId) -> RelayResult<Destination> {
        self.require_admin(actor)?;
        self.inner.registry.remove_destination(id)
    }

    pub fn set_origin(&self, actor: UserId, id: ChatId) -> RelayResult<Option<ChatId>> {
        self.require_admin(actor)?;
        self.inner.registry.set_origin(id)
    }

    pub fn add_admin(&self, actor: UserId, id: UserId) -> RelayResult<()> {
        self.require_admin(actor)?;
        self.inner.registry.add_admin(id)
    }

    pub fn remove_admin(&self, actor: UserId, id: UserId) -> RelayResult<()> {
        self.require_admin(actor)?;
        self.inner.registry.remove_admin(id)
    }

    // -- Helpers --

    fn private_chat_notice(&self, author_label: &str) -> String {
        match &self.inner.options.bot_username {
            Some(bot) => format!(
                "{}, I can't message you privately yet. Open https://t.me/{} and press Start, then post your message again.",
                author_label, bot
            ),
            None => format!(
                "{}, I can't message you privately yet. Open a private chat with me and press Start, then post your message again.",
                author_label
            ),
        }
    }

    /// Best-effort text message; failures are only logged.
    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.inner.transport.send_text(chat, text).await {
            warn!("Could not notify {}: {:#}", chat, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_db::Database;
    use relay_types::MessageId;
    use relay_types::settings::RelaySettings;

    use super::*;
    use crate::testing::RecordingTransport;

    const ADMIN: UserId = UserId(1);
    const AUTHOR: UserId = UserId(9);

    fn relay_with(options: RelayOptions) -> (Relay, Arc<RecordingTransport>) {
        let db = Database::open_in_memory().unwrap();
        db.save(&RelaySettings {
            origin: Some(ChatId(555)),
            destinations: vec![
                Destination::new(ChatId(100), "Alpha"),
                Destination::new(ChatId(200), "Beta"),
            ],
            admins: vec![ADMIN, UserId(2)],
        })
        .unwrap();
        let registry = DestinationRegistry::load(Arc::new(db)).unwrap();
        let transport = Arc::new(RecordingTransport::new());
        (Relay::new(registry, transport.clone(), options), transport)
    }

    fn relay() -> (Relay, Arc<RecordingTransport>) {
        relay_with(RelayOptions::default())
    }

    fn origin_message(n: i64) -> MessageRef {
        MessageRef::new(ChatId(555), MessageId(n))
    }

    async fn open_session(relay: &Relay) -> PromptHandle {
        match relay.handle_origin_message(origin_message(1), AUTHOR, "@ana").await.unwrap() {
            OriginOutcome::Offered(handle) => handle,
            other => panic!("expected a session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn messages_outside_origin_are_ignored() {
        let (relay, transport) = relay();
        let outcome = relay
            .handle_origin_message(MessageRef::new(ChatId(100), MessageId(1)), AUTHOR, "@ana")
            .await
            .unwrap();
        assert_eq!(outcome, OriginOutcome::NotOrigin);
        assert!(transport.prompts().is_empty());
        assert!(relay.sessions().is_empty());
    }

    #[tokio::test]
    async fn origin_message_offers_empty_selection() {
        let (relay, transport) = relay();
        let handle = open_session(&relay).await;

        assert!(relay.sessions().contains(handle));
        assert_eq!(handle.chat_id, AUTHOR.private_chat());
        let (_, prompt) = transport.prompts().pop().unwrap();
        assert!(prompt.text.contains("Selected: 0 of 2"));
        assert_eq!(relay.stats().sessions_opened, 1);
    }

    #[tokio::test]
    async fn no_destinations_means_no_session() {
        let (relay, transport) = relay();
        relay.remove_destination(ADMIN, ChatId(100)).unwrap();
        relay.remove_destination(ADMIN, ChatId(200)).unwrap();

        let outcome = relay.handle_origin_message(origin_message(1), AUTHOR, "@ana").await.unwrap();
        assert_eq!(outcome, OriginOutcome::NoDestinations);
        assert!(transport.prompts().is_empty());
    }

    #[tokio::test]
    async fn undeliverable_prompt_is_reported_in_origin() {
        let (relay, transport) = relay_with(RelayOptions {
            bot_username: Some("relay_bot".into()),
            ..Default::default()
        });
        transport.fail_prompts(true);

        let err = relay
            .handle_origin_message(origin_message(1), AUTHOR, "@ana")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
        assert!(relay.sessions().is_empty());

        let notices = transport.texts_to(ChatId(555));
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with("@ana,"));
        assert!(notices[0].contains("https://t.me/relay_bot"));
    }

    #[tokio::test]
    async fn rate_limited_author_is_told_privately() {
        let (relay, transport) = relay_with(RelayOptions {
            rate_capacity: 1,
            ..Default::default()
        });
        open_session(&relay).await;

        let outcome = relay.handle_origin_message(origin_message(2), AUTHOR, "@ana").await.unwrap();
        assert_eq!(outcome, OriginOutcome::RateLimited);
        assert_eq!(relay.sessions().len(), 1);
        assert_eq!(transport.texts_to(AUTHOR.private_chat()).len(), 1);
        assert_eq!(relay.stats().rate_limited, 1);
    }

    #[tokio::test]
    async fn toggles_rerender_the_prompt() {
        let (relay, transport) = relay();
        let handle = open_session(&relay).await;

        let outcome = relay
            .handle_session_action(handle, AUTHOR, SessionAction::Toggle(ChatId(200)))
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Updated { selected: 1 });
        let prompt = transport.last_update().unwrap();
        assert!(prompt.text.contains("Selected: 1 of 2"));
        assert_eq!(prompt.buttons[1][0].label, "✅ Beta");

        let outcome = relay
            .handle_session_action(handle, AUTHOR, SessionAction::SelectAll)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Updated { selected: 2 });

        let outcome = relay
            .handle_session_action(handle, AUTHOR, SessionAction::Clear)
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Updated { selected: 0 });
    }

    #[tokio::test]
    async fn toggling_unknown_destination_fails() {
        let (relay, _) = relay();
        let handle = open_session(&relay).await;
        let err = relay
            .handle_session_action(handle, AUTHOR, SessionAction::Toggle(ChatId(999)))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DestinationNotFound(ChatId(999))));
    }

    #[tokio::test]
    async fn select_all_is_a_snapshot() {
        let (relay, transport) = relay();
        let handle = open_session(&relay).await;
        relay
            .handle_session_action(handle, AUTHOR, SessionAction::SelectAll)
            .await
            .unwrap();

        // Registered after the snapshot: not selected
        relay.add_destination(ADMIN, ChatId(300), Some("Gamma")).await.unwrap();

        let outcome = relay
            .handle_session_action(handle, AUTHOR, SessionAction::Send)
            .await
            .unwrap();
        let ActionOutcome::Sent(report) = outcome else {
            panic!("expected a dispatch report");
        };
        assert_eq!(report.success_count, 2);
        assert_eq!(transport.copy_targets(), vec![ChatId(100), ChatId(200)]);
    }

    #[tokio::test]
    async fn empty_send_is_rejected_and_session_survives() {
        let (relay, transport) = relay();
        let handle = open_session(&relay).await;

        let err = relay
            .handle_session_action(handle, AUTHOR, SessionAction::Send)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NoDestinationsSelected));
        assert!(relay.sessions().contains(handle));
        assert!(transport.copies().is_empty());
    }

    #[tokio::test]
    async fn only_owner_may_act() {
        let (relay, _) = relay();
        let handle = open_session(&relay).await;
        for action in [
            SessionAction::Toggle(ChatId(100)),
            SessionAction::SelectAll,
            SessionAction::Clear,
            SessionAction::Send,
        ] {
            let err = relay.handle_session_action(handle, ADMIN, action).await.unwrap_err();
            assert!(matches!(err, RelayError::NotOwner));
        }
        assert!(relay.sessions().contains(handle));
    }

    #[tokio::test]
    async fn partial_failure_is_summarised_and_admins_alerted() {
        let (relay, transport) = relay_with(RelayOptions {
            notify_admins_on_failure: true,
            ..Default::default()
        });
        transport.fail_copies_to(ChatId(100), "Forbidden: bot was kicked");
        let handle = open_session(&relay).await;
        relay
            .handle_session_action(handle, AUTHOR, SessionAction::SelectAll)
            .await
            .unwrap();

        let ActionOutcome::Sent(report) = relay
            .handle_session_action(handle, AUTHOR, SessionAction::Send)
            .await
            .unwrap()
        else {
            panic!("expected a dispatch report");
        };

        assert_eq!(report.success_count, 1);
        assert_eq!(report.failures[0].destination, ChatId(100));
        let summary = transport.last_update().unwrap();
        assert!(summary.buttons.is_empty());
        assert!(summary.text.contains("• Alpha (100): Forbidden: bot was kicked"));

        // Both admins are alerted, neither is the owner
        assert_eq!(transport.texts_to(ADMIN.private_chat()).len(), 1);
        assert_eq!(transport.texts_to(UserId(2).private_chat()).len(), 1);

        let stats = relay.stats();
        assert_eq!((stats.reposts_sent, stats.copies_delivered, stats.copies_failed), (1, 1, 1));
        assert_eq!(stats.open_sessions, 0);
    }

    #[tokio::test]
    async fn admin_actions_require_admin() {
        let (relay, _) = relay();
        assert!(matches!(
            relay.add_destination(AUTHOR, ChatId(300), None).await,
            Err(RelayError::NotAdmin)
        ));
        assert!(matches!(relay.remove_destination(AUTHOR, ChatId(100)), Err(RelayError::NotAdmin)));
        assert!(matches!(relay.set_origin(AUTHOR, ChatId(1)), Err(RelayError::NotAdmin)));
        assert!(matches!(relay.add_admin(AUTHOR, AUTHOR), Err(RelayError::NotAdmin)));
        assert!(matches!(relay.remove_admin(AUTHOR, ADMIN), Err(RelayError::NotAdmin)));
        assert_eq!(relay.registry().destinations().len(), 2);
    }

    #[tokio::test]
    async fn unnamed_destination_takes_chat_title() {
        let (relay, transport) = relay();
        transport.set_title(ChatId(300), "Gamma Group");
        let added = relay.add_destination(ADMIN, ChatId(300), None).await.unwrap();
        assert_eq!(added.display_name, "Gamma Group");

        let added = relay.add_destination(ADMIN, ChatId(400), None).await.unwrap();
        assert_eq!(added.display_name, "400");
    }
}
