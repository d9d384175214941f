//! Idle session eviction.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::context::Shared;
use super::events::RemovalReason;
use crate::domain::SessionStatus;

/// Evict every session older than the TTL that has not connected,
/// stopping its handshake. Returns the number of sessions evicted.
///
/// Connected sessions are left to their own cleanup deadline.
pub(crate) async fn evict_idle(shared: &Shared) -> usize {
    let ttl = shared.timings.session_ttl;
    let expired: Vec<(String, String, u64)> = shared
        .sessions
        .read()
        .await
        .values()
        .filter(|s| s.status != SessionStatus::Connected && s.created_at.elapsed() >= ttl)
        .map(|s| (s.session_id.clone(), s.unique_id.clone(), s.generation))
        .collect();

    let mut evicted = 0;
    for (session_id, unique_id, generation) in expired {
        if let Some(entry) = shared.registry.release(&unique_id, generation).await {
            entry.stop();
        }
        if shared
            .remove_session(&session_id, generation, RemovalReason::Expired)
            .await
        {
            evicted += 1;
        }
    }

    if evicted > 0 {
        info!("Evicted {} idle session(s)", evicted);
    }
    evicted
}

pub(crate) async fn run(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.timings.reap_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;
        debug!("Reaping idle sessions");
        evict_idle(&shared).await;
    }
}
