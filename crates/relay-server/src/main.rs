mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use relay_bot::polling::run_polling;
use relay_bot::{Bot, TelegramClient, webhook};
use relay_core::Relay;
use relay_core::registry::DestinationRegistry;
use relay_core::sweeper::run_sweep_loop;
use relay_db::Database;
use relay_types::settings::RelaySettings;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,relay_core=debug,relay_bot=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database, seeding it from the environment on first start
    let db = Database::open(&config.db_path)
        .with_context(|| format!("could not open {}", config.db_path.display()))?;
    if !db.has_settings()? && config.seed != RelaySettings::default() {
        info!(
            "Seeding settings: {} destinations, {} admins",
            config.seed.destinations.len(),
            config.seed.admins.len()
        );
        db.save(&config.seed)?;
    }
    let registry = DestinationRegistry::load(Arc::new(db))?;

    let client = Arc::new(TelegramClient::new(&config.api_url, &config.bot_token)?);
    let me = client
        .get_me()
        .await
        .context("could not reach the Bot API; check BOT_TOKEN")?;
    info!("Running as @{}", me.username.as_deref().unwrap_or(&me.first_name));

    let relay = Relay::new(registry, client.clone(), config.relay_options(me.username.clone()));
    if relay.registry().origin().is_none() {
        warn!("No origin group set; use /setorigin <group id>");
    }

    if let Some(ttl) = config.session_ttl {
        let every = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
        info!("Evicting selection sessions older than {:?}", ttl);
        tokio::spawn(run_sweep_loop(relay.clone(), ttl, every));
    }

    let bot = Bot::new(relay, me.username);

    match &config.webhook {
        Some(hook) => {
            client
                .set_webhook(&hook.url, hook.secret.as_deref())
                .await
                .context("setWebhook failed")?;
            if hook.secret.is_none() {
                warn!("RELAY_WEBHOOK_SECRET is not set; anyone can post updates to /webhook");
            }

            let app = webhook::router(bot, hook.secret.clone()).layer(TraceLayer::new_for_http());
            let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
            info!("Webhook listener on {} for {}", addr, hook.url);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => {
            // getUpdates is refused while a webhook is registered
            client.delete_webhook().await.context("deleteWebhook failed")?;
            run_polling(bot, client, shutdown_signal()).await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("No SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
