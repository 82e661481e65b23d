//! Reply texts for bot commands.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use relay_core::RelayError;
use relay_core::service::StatsSnapshot;
use relay_types::settings::{MAX_DESTINATIONS, RelaySettings};

pub fn greeting(first_name: &str) -> String {
    format!(
        "👋 Hi {}! Post a message in the origin group and I will send you a private prompt to choose which groups it should be reposted to.\n\nSend /help to see every command.",
        first_name
    )
}

pub fn help(is_admin: bool) -> String {
    let mut text = String::from(
        "ℹ️ How it works\n\
         1. Post a message in the origin group.\n\
         2. I send you a private prompt listing the destination groups.\n\
         3. Tap the groups you want, then press Send.\n\n\
         /start - introduction\n\
         /help (/ajuda) - this message",
    );
    if is_admin {
        text.push_str(
            "\n\n🔧 Administration\n\
             /groups (/grupos) - list destination groups\n\
             /status - bot status\n\
             /addgroup (/adicionargrupo) <group id> [name] - add a destination\n\
             /removegroup (/removergrupo) <group id> - remove a destination\n\
             /setorigin (/definirgrupoprincipal) <group id> - set the origin group\n\
             /addadmin (/adicionaradmin) <user id> - add an administrator\n\
             /removeadmin (/removeradmin) <user id> - remove an administrator",
        );
    }
    text
}

pub fn groups(settings: &RelaySettings) -> String {
    if settings.destinations.is_empty() {
        return "No destination groups yet. Add one with /addgroup <group id> [name].".into();
    }
    let mut text = format!(
        "📋 Destination groups ({} of {}):",
        settings.destinations.len(),
        MAX_DESTINATIONS
    );
    for (i, destination) in settings.destinations.iter().enumerate() {
        let _ = write!(text, "\n{}. {} ({})", i + 1, destination.display_name, destination.id);
    }
    text
}

pub fn status(stats: &StatsSnapshot, settings: &RelaySettings, now: DateTime<Utc>) -> String {
    let origin = match settings.origin {
        Some(id) => id.to_string(),
        None => "not set".into(),
    };
    format!(
        "📊 Status\n\
         Uptime: {}\n\
         Origin group: {}\n\
         Destination groups: {}\n\
         Administrators: {}\n\
         Open prompts: {}\n\
         Prompts offered: {}\n\
         Reposts sent: {} ({} delivered, {} failed)\n\
         Rate-limited requests: {}",
        uptime(now - stats.started_at),
        origin,
        settings.destinations.len(),
        settings.admins.len(),
        stats.open_sessions,
        stats.sessions_opened,
        stats.reposts_sent,
        stats.copies_delivered,
        stats.copies_failed,
        stats.rate_limited,
    )
}

fn uptime(elapsed: chrono::Duration) -> String {
    let days = elapsed.num_days();
    let hours = elapsed.num_hours() % 24;
    let minutes = elapsed.num_minutes() % 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes.max(0))
    }
}

/// User-facing text for a failed operation.
pub fn error_reply(err: &RelayError) -> String {
    format!("⚠️ {}", capitalize(&err.to_string()))
}

pub fn rate_limited() -> String {
    "⏳ Too many requests. Wait a minute and try again.".into()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
