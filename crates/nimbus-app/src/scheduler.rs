//! Global periodic jobs.
//!
//! One scheduler per process, next to the per-cache refresh tasks the
//! caches spawn themselves: available-slot polling every thirty seconds
//! and stalled-import sweeping every minute. Job errors are logged; the
//! scheduler keeps running.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::Engine;

/// Cadence of the available-slot poll.
const SLOT_POLL: Duration = Duration::from_secs(30);
/// Cadence of the stalled-import sweep.
const STALL_SWEEP: Duration = Duration::from_secs(60);

/// Spawn the global scheduler tasks.
pub fn spawn(engine: &Arc<Engine>) -> Vec<JoinHandle<()>> {
    let slots_engine = Arc::clone(engine);
    let slots = tokio::spawn(async move {
        let mut tick = tokio::time::interval(SLOT_POLL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tick.tick().await;
            for cache in &slots_engine.debrid_caches {
                match cache.available_slots().await {
                    Ok(slots) => {
                        debug!(provider = %cache.provider(), slots, "slot poll");
                    }
                    Err(err) => {
                        warn!(provider = %cache.provider(), error = %err, "slot poll failed");
                    }
                }
            }
        }
    });

    let sweep_engine = Arc::clone(engine);
    let sweep = tokio::spawn(async move {
        let mut tick = tokio::time::interval(STALL_SWEEP);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tick.tick().await;
            sweep_engine.imports.sweep_stalled().await;
        }
    });

    vec![slots, sweep]
}
