use std::time::Duration;
use tracing::info;

use crate::service::Relay;

/// Background task that evicts selection sessions nobody acted on.
///
/// Only started when a session TTL is configured; otherwise abandoned
/// sessions stay in memory until the process restarts.
pub async fn run_sweep_loop(relay: Relay, ttl: Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let evicted = relay.sessions().evict_older_than(ttl);
        if evicted > 0 {
            info!("Sweep: evicted {} stale selection sessions", evicted);
        }
    }
}
