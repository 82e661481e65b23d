use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use relay_core::RelayOptions;
use relay_types::settings::{MAX_DESTINATIONS, RelaySettings};
use relay_types::{ChatId, Destination, UserId};

pub struct WebhookConfig {
    pub url: String,
    pub secret: Option<String>,
}

/// Process configuration, read from the environment.
pub struct Config {
    pub bot_token: String,
    pub db_path: PathBuf,
    pub api_url: String,
    /// Written to the database on first start only.
    pub seed: RelaySettings,
    pub rate_capacity: u32,
    pub rate_window: Duration,
    pub dispatch_concurrency: usize,
    pub notify_admins: bool,
    pub session_ttl: Option<Duration>,
    /// Long polling when unset.
    pub webhook: Option<WebhookConfig>,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let Some(bot_token) = get("BOT_TOKEN") else {
            bail!("BOT_TOKEN is not set");
        };

        let origin = get("ORIGIN_CHAT_ID")
            .map(|v| parse_one::<i64>("ORIGIN_CHAT_ID", &v))
            .transpose()?
            .filter(|id| *id != 0)
            .map(ChatId);

        let mut destinations: Vec<Destination> = Vec::new();
        for id in parse_list::<i64>("DESTINATION_IDS", get("DESTINATION_IDS"))? {
            let id = ChatId(id);
            if id.0 != 0 && !destinations.iter().any(|d| d.id == id) {
                destinations.push(Destination::new(id, id.to_string()));
            }
        }
        if destinations.len() > MAX_DESTINATIONS {
            bail!("DESTINATION_IDS lists more than {} groups", MAX_DESTINATIONS);
        }

        let mut admins: Vec<UserId> = Vec::new();
        for id in parse_list::<i64>("ADMIN_IDS", get("ADMIN_IDS"))? {
            if id != 0 && !admins.contains(&UserId(id)) {
                admins.push(UserId(id));
            }
        }

        let rate_capacity = parse_or("RELAY_RATE_CAPACITY", get("RELAY_RATE_CAPACITY"), 20u32)?;
        let rate_window = parse_or("RELAY_RATE_WINDOW_SECS", get("RELAY_RATE_WINDOW_SECS"), 60u64)?;
        let dispatch_concurrency =
            parse_or("RELAY_DISPATCH_CONCURRENCY", get("RELAY_DISPATCH_CONCURRENCY"), 4usize)?;
        if rate_capacity == 0 || rate_window == 0 || dispatch_concurrency == 0 {
            bail!("rate limit and dispatch settings must be greater than zero");
        }

        let notify_admins = match get("RELAY_NOTIFY_ADMINS") {
            Some(v) => parse_bool("RELAY_NOTIFY_ADMINS", &v)?,
            None => false,
        };

        let session_ttl = get("RELAY_SESSION_TTL_SECS")
            .map(|v| parse_one::<u64>("RELAY_SESSION_TTL_SECS", &v))
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let webhook = get("RELAY_WEBHOOK_URL").map(|url| WebhookConfig {
            url,
            secret: get("RELAY_WEBHOOK_SECRET"),
        });

        Ok(Self {
            bot_token,
            db_path: get("RELAY_DB_PATH").unwrap_or_else(|| "relay.db".into()).into(),
            api_url: get("RELAY_API_URL").unwrap_or_else(|| "https://api.telegram.org".into()),
            seed: RelaySettings {
                origin,
                destinations,
                admins,
            },
            rate_capacity,
            rate_window: Duration::from_secs(rate_window),
            dispatch_concurrency,
            notify_admins,
            session_ttl,
            webhook,
            host: get("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("RELAY_PORT", get("RELAY_PORT"), 8080u16)?,
        })
    }

    pub fn relay_options(&self, bot_username: Option<String>) -> RelayOptions {
        RelayOptions {
            rate_window: self.rate_window,
            rate_capacity: self.rate_capacity,
            dispatch_concurrency: self.dispatch_concurrency,
            notify_admins_on_failure: self.notify_admins,
            bot_username,
        }
    }
}

fn parse_one<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .ok()
        .with_context(|| format!("{} has an invalid value: {:?}", key, value))
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(v) => parse_one(key, &v),
        None => Ok(default),
    }
}

fn parse_list<T: FromStr>(key: &str, value: Option<String>) -> Result<Vec<T>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse_one(key, v))
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{} must be true or false, got {:?}", key, value),
    }
}
