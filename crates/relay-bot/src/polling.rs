use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use relay_types::telegram::Update;

use crate::handlers::Bot;
use crate::telegram::{ApiError, TelegramClient};

/// Pause after a failed `getUpdates` call.
const BACKOFF: Duration = Duration::from_secs(5);

/// Long-poll Telegram for updates until `shutdown` resolves.
///
/// Every update is handled on its own task so a slow dispatch never holds
/// back button presses from other users.
pub async fn run_polling(bot: Bot, client: Arc<TelegramClient>, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    let mut offset = 0i64;
    info!("Polling for updates");

    loop {
        let batch = tokio::select! {
            _ = &mut shutdown => break,
            batch = client.get_updates(offset) => batch,
        };

        match batch {
            Ok(updates) => {
                if !updates.is_empty() {
                    debug!("Received {} updates", updates.len());
                }
                offset = next_offset(offset, &updates);
                for update in updates {
                    let bot = bot.clone();
                    tokio::spawn(async move { bot.handle_update(update).await });
                }
            }
            Err(e) => {
                let pause = backoff(&e);
                warn!("getUpdates failed: {}; retrying in {:?}", e, pause);
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
    }

    info!("Polling stopped");
}

/// Offset that confirms every update in `batch`. Never moves backwards.
fn next_offset(offset: i64, batch: &[Update]) -> i64 {
    batch
        .iter()
        .map(|update| update.update_id + 1)
        .fold(offset, i64::max)
}

fn backoff(err: &ApiError) -> Duration {
    err.retry_after().map(Duration::from_secs).unwrap_or(BACKOFF)
}
