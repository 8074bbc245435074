//! Background keepalive loop.

use super::Router;
use crate::error::Error;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

impl Router {
    /// Spawn a task probing both pools every `keepalive_interval`.
    ///
    /// The task ends on its own once the router is closed. Must be called from
    /// within a tokio runtime.
    pub fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let period = router.config().keepalive_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match router.keep_alive() {
                    Ok(()) => {}
                    Err(Error::ClosedRouter) => break,
                    Err(e) => tracing::warn!(error = %e, "Keepalive round failed"),
                }
            }
            tracing::debug!("Keepalive loop stopped");
        })
    }
}
