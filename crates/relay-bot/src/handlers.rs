use chrono::Utc;
use tracing::{debug, info, warn};

use relay_core::{ActionOutcome, ErrorKind, OriginOutcome, Relay};
use relay_types::actions::SessionAction;
use relay_types::telegram::{CallbackQuery, Message, Update, User};
use relay_types::PromptHandle;

use crate::commands::Command;
use crate::format;

const STALE_BUTTON: &str = "This button is no longer valid.";

/// Routes Telegram updates into the relay.
#[derive(Clone)]
pub struct Bot {
    relay: Relay,
    username: Option<String>,
}

impl Bot {
    pub fn new(relay: Relay, username: Option<String>) -> Self {
        Self { relay, username }
    }

    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    pub async fn handle_update(&self, update: Update) {
        debug!("Update {}", update.update_id);
        if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
        } else if let Some(message) = update.message.or(update.channel_post) {
            self.handle_message(message).await;
        }
    }

    async fn handle_message(&self, message: Message) {
        // Channel posts carry no author, so nobody could own the session
        let Some(author) = message.from.as_ref() else {
            debug!("Ignoring anonymous message in {}", message.chat.id);
            return;
        };
        if author.is_bot {
            return;
        }

        if let Some(text) = message.command_text() {
            let reply = match Command::parse(text, self.username.as_deref()) {
                Some(Ok(command)) => self.execute(author, command).await,
                Some(Err(e)) => e.to_string(),
                None => return,
            };
            if let Err(e) = self.relay.transport().send_text(message.chat.id, &reply).await {
                warn!("Could not reply in {}: {:#}", message.chat.id, e);
            }
            return;
        }

        match self
            .relay
            .handle_origin_message(message.reference(), author.id, &author.mention())
            .await
        {
            Ok(OriginOutcome::NotOrigin) => {}
            Ok(outcome) => debug!("Message {} from {}: {:?}", message.message_id, author.id, outcome),
            Err(e) => warn!("Repost offer for {} failed: {}", author.id, e),
        }
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let target = query.message.as_ref().map(|m| PromptHandle {
            chat_id: m.chat.id,
            message_id: m.message_id,
        });
        let action = query.data.as_deref().and_then(SessionAction::from_callback_data);

        let (Some(handle), Some(action)) = (target, action) else {
            self.acknowledge(&query.id, Some(STALE_BUTTON)).await;
            return;
        };

        // Dispatch can outlast the callback's answer window
        if action == SessionAction::Send {
            self.acknowledge(&query.id, Some("📤 Sending…")).await;
        }

        let notice = match self.relay.handle_session_action(handle, query.from.id, action).await {
            Ok(ActionOutcome::Updated { .. }) => None,
            Ok(ActionOutcome::Sent(report)) => {
                info!(
                    "{} reposted to {} of {} groups",
                    query.from.id,
                    report.success_count,
                    report.attempted()
                );
                None
            }
            Err(e) => {
                debug!("Button {:?} from {} rejected: {}", action, query.from.id, e);
                Some(format::error_reply(&e))
            }
        };

        if action == SessionAction::Send {
            if let Some(notice) = notice {
                if let Err(e) = self.relay.transport().send_text(handle.chat_id, &notice).await {
                    warn!("Could not report send failure in {}: {:#}", handle.chat_id, e);
                }
            }
        } else {
            self.acknowledge(&query.id, notice.as_deref()).await;
        }
    }

    async fn acknowledge(&self, id: &str, notice: Option<&str>) {
        if let Err(e) = self.relay.transport().acknowledge(id, notice).await {
            debug!("Callback {} not acknowledged: {:#}", id, e);
        }
    }

    /// Run a command on behalf of `actor` and return the reply text.
    pub async fn execute(&self, actor: &User, command: Command) -> String {
        let relay = &self.relay;
        if command.requires_admin() && !relay.admit(actor.id) {
            return format::rate_limited();
        }

        let result = match command {
            Command::Start => return format::greeting(&actor.first_name),
            Command::Help => return format::help(relay.registry().is_admin(actor.id)),
            Command::Groups => relay
                .require_admin(actor.id)
                .map(|_| format::groups(&relay.registry().snapshot())),
            Command::Status => relay.require_admin(actor.id).map(|_| {
                format::status(&relay.stats(), &relay.registry().snapshot(), Utc::now())
            }),
            Command::AddGroup { id, name } => relay
                .add_destination(actor.id, id, name.as_deref())
                .await
                .map(|d| format!("✅ Group {} ({}) added to the destination list.", d.display_name, d.id)),
            Command::RemoveGroup(id) => relay
                .remove_destination(actor.id, id)
                .map(|d| format!("🗑 Group {} ({}) removed from the destination list.", d.display_name, d.id)),
            Command::SetOrigin(id) => relay.set_origin(actor.id, id).map(|previous| match previous {
                Some(previous) if previous != id => {
                    format!("✅ Origin group changed from {} to {}.", previous, id)
                }
                _ => format!("✅ Origin group set to {}.", id),
            }),
            Command::AddAdmin(id) => relay
                .add_admin(actor.id, id)
                .map(|_| format!("✅ User {} is now an administrator.", id)),
            Command::RemoveAdmin(id) => relay
                .remove_admin(actor.id, id)
                .map(|_| format!("🗑 User {} is no longer an administrator.", id)),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                if e.kind() == ErrorKind::Persistence {
                    warn!("Command from {} failed: {}", actor.id, e);
                }
                format::error_reply(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_core::RelayOptions;
    use relay_core::registry::DestinationRegistry;
    use relay_core::testing::RecordingTransport;
    use relay_db::Database;
    use relay_types::settings::RelaySettings;
    use relay_types::telegram::Chat;
    use relay_types::{ChatId, Destination, MessageId, UserId};

    use super::*;

    const ADMIN: UserId = UserId(1);
    const MEMBER: UserId = UserId(9);
    const ORIGIN: ChatId = ChatId(-100555);

    fn bot_with(options: RelayOptions) -> (Bot, Arc<RecordingTransport>) {
        let db = Database::open_in_memory().unwrap();
        db.save(&RelaySettings {
            origin: Some(ORIGIN),
            destinations: vec![
                Destination::new(ChatId(-100), "Alpha"),
                Destination::new(ChatId(-200), "Beta"),
            ],
            admins: vec![ADMIN],
        })
        .unwrap();
        let registry = DestinationRegistry::load(Arc::new(db)).unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let relay = Relay::new(registry, transport.clone(), options);
        (Bot::new(relay, Some("relay_bot".into())), transport)
    }

    fn bot() -> (Bot, Arc<RecordingTransport>) {
        bot_with(RelayOptions::default())
    }

    fn user(id: UserId) -> User {
        User {
            id,
            is_bot: false,
            first_name: "Ana".into(),
            username: Some("ana".into()),
        }
    }

    fn message(chat: ChatId, kind: &str, from: Option<User>, text: &str) -> Message {
        Message {
            message_id: MessageId(77),
            chat: Chat {
                id: chat,
                kind: kind.into(),
                title: None,
                username: None,
                first_name: None,
            },
            from,
            date: 0,
            text: Some(text.into()),
            caption: None,
        }
    }

    fn update(message: Message) -> Update {
        Update {
            update_id: 1,
            message: Some(message),
            channel_post: None,
            callback_query: None,
        }
    }

    fn press(handle: PromptHandle, from: UserId, data: &str) -> Update {
        Update {
            update_id: 2,
            message: None,
            channel_post: None,
            callback_query: Some(CallbackQuery {
                id: format!("cb-{}", data),
                from: user(from),
                message: Some(Message {
                    message_id: handle.message_id,
                    ..message(handle.chat_id, "private", None, "prompt")
                }),
                data: Some(data.into()),
            }),
        }
    }

    #[tokio::test]
    async fn origin_post_opens_a_prompt() {
        let (bot, transport) = bot();
        bot.handle_update(update(message(ORIGIN, "supergroup", Some(user(MEMBER)), "news")))
            .await;

        let (handle, prompt) = transport.prompts().pop().unwrap();
        assert_eq!(handle.chat_id, MEMBER.private_chat());
        assert!(prompt.text.contains("Selected: 0 of 2"));
    }

    #[tokio::test]
    async fn anonymous_and_bot_posts_are_ignored() {
        let (bot, transport) = bot();
        bot.handle_update(Update {
            update_id: 1,
            message: None,
            channel_post: Some(message(ORIGIN, "channel", None, "news")),
            callback_query: None,
        })
        .await;
        let mut robot = user(UserId(50));
        robot.is_bot = true;
        bot.handle_update(update(message(ORIGIN, "supergroup", Some(robot), "beep")))
            .await;

        assert!(transport.prompts().is_empty());
    }

    #[tokio::test]
    async fn buttons_drive_the_session() {
        let (bot, transport) = bot();
        bot.handle_update(update(message(ORIGIN, "supergroup", Some(user(MEMBER)), "news")))
            .await;
        let handle = transport.last_prompt_handle().unwrap();

        bot.handle_update(press(handle, MEMBER, "t:-200")).await;
        bot.handle_update(press(handle, MEMBER, "send")).await;

        assert_eq!(transport.copy_targets(), vec![ChatId(-200)]);
        let acks = transport.acks();
        assert_eq!(acks[0], ("cb-t:-200".into(), None));
        assert_eq!(acks[1], ("cb-send".into(), Some("📤 Sending…".into())));
        assert!(transport.last_update().unwrap().text.contains("1 delivered, 0 failed"));

        // The session is gone now
        bot.handle_update(press(handle, MEMBER, "all")).await;
        let (_, notice) = transport.acks().pop().unwrap();
        assert_eq!(notice.as_deref(), Some("⚠️ This repost prompt has expired"));
    }

    #[tokio::test]
    async fn strangers_are_told_off_via_toast() {
        let (bot, transport) = bot();
        bot.handle_update(update(message(ORIGIN, "supergroup", Some(user(MEMBER)), "news")))
            .await;
        let handle = transport.last_prompt_handle().unwrap();

        bot.handle_update(press(handle, ADMIN, "t:-100")).await;
        let (_, notice) = transport.acks().pop().unwrap();
        assert!(notice.unwrap().contains("Only the person who posted"));
    }

    #[tokio::test]
    async fn empty_send_is_reported_in_the_private_chat() {
        let (bot, transport) = bot();
        bot.handle_update(update(message(ORIGIN, "supergroup", Some(user(MEMBER)), "news")))
            .await;
        let handle = transport.last_prompt_handle().unwrap();

        bot.handle_update(press(handle, MEMBER, "send")).await;
        assert_eq!(
            transport.texts_to(handle.chat_id),
            vec!["⚠️ Select at least one group first".to_string()]
        );
        assert!(bot.relay().sessions().contains(handle));
    }

    #[tokio::test]
    async fn garbage_callback_data_is_acknowledged() {
        let (bot, transport) = bot();
        let handle = PromptHandle {
            chat_id: MEMBER.private_chat(),
            message_id: MessageId(1),
        };
        bot.handle_update(press(handle, MEMBER, "t:nope")).await;
        assert_eq!(transport.acks()[0].1.as_deref(), Some(STALE_BUTTON));
    }

    #[tokio::test]
    async fn admin_commands_reply_in_the_same_chat() {
        let (bot, transport) = bot();
        let chat = ADMIN.private_chat();
        bot.handle_update(update(message(chat, "private", Some(user(ADMIN)), "/addgroup -300 Gamma")))
            .await;
        bot.handle_update(update(message(chat, "private", Some(user(ADMIN)), "/grupos@relay_bot")))
            .await;

        let replies = transport.texts_to(chat);
        assert_eq!(replies[0], "✅ Group Gamma (-300) added to the destination list.");
        assert!(replies[1].ends_with("3. Gamma (-300)"));
        assert_eq!(bot.relay().registry().destinations().len(), 3);
    }

    #[tokio::test]
    async fn members_cannot_administer() {
        let (bot, _) = bot();
        let reply = bot.execute(&user(MEMBER), Command::RemoveGroup(ChatId(-100))).await;
        assert_eq!(reply, "⚠️ You are not allowed to use this command");
        assert_eq!(bot.relay().registry().destinations().len(), 2);

        let help = bot.execute(&user(MEMBER), Command::Help).await;
        assert!(!help.contains("/addgroup"));
    }

    #[tokio::test]
    async fn last_admin_survives() {
        let (bot, _) = bot();
        let reply = bot.execute(&user(ADMIN), Command::RemoveAdmin(ADMIN)).await;
        assert_eq!(reply, "⚠️ The last administrator cannot be removed");

        bot.execute(&user(ADMIN), Command::AddAdmin(UserId(2))).await;
        let reply = bot.execute(&user(ADMIN), Command::RemoveAdmin(ADMIN)).await;
        assert_eq!(reply, "🗑 User 1 is no longer an administrator.");
    }

    #[tokio::test]
    async fn set_origin_mentions_the_previous_one() {
        let (bot, _) = bot();
        let reply = bot.execute(&user(ADMIN), Command::SetOrigin(ChatId(-1))).await;
        assert_eq!(reply, "✅ Origin group changed from -100555 to -1.");
        assert_eq!(bot.relay().registry().origin(), Some(ChatId(-1)));
    }

    #[tokio::test]
    async fn command_spam_is_rate_limited() {
        let (bot, _) = bot_with(RelayOptions {
            rate_capacity: 1,
            ..Default::default()
        });
        let first = bot.execute(&user(ADMIN), Command::Groups).await;
        assert!(first.starts_with("📋"));
        let second = bot.execute(&user(ADMIN), Command::Groups).await;
        assert_eq!(second, format::rate_limited());
    }

    #[tokio::test]
    async fn bad_arguments_reply_with_usage() {
        let (bot, transport) = bot();
        let chat = ADMIN.private_chat();
        bot.handle_update(update(message(chat, "private", Some(user(ADMIN)), "/addadmin")))
            .await;
        assert_eq!(transport.texts_to(chat), vec!["Usage: /addadmin <user id>".to_string()]);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn update_future_is_send() {
        let (bot, _) = bot();
        let handle = PromptHandle {
            chat_id: ChatId(9),
            message_id: MessageId(1),
        };
        assert_send(&bot.handle_update(press(handle, MEMBER, "send")));
        assert_send(&bot.handle_update(update(message(ORIGIN, "supergroup", Some(user(MEMBER)), "hi"))));
    }
}
