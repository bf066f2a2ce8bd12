//! Background compaction loop.
//!
//! Every `frequency` the loop asks the engine for a compaction pass. A pass
//! that reclaimed space is followed immediately by another one, so a single
//! tick keeps going until the engine reports there is nothing left, returns
//! an error, or the loop is cancelled. Errors only end the current tick.
//!
//! Passes do blocking engine I/O, so each one runs on the blocking pool.

use crate::config::GcPolicy;
use std::sync::Arc;
use storage_engine::{Compaction, Compactor};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How a compaction cycle ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CycleEnd {
    #[default]
    Exhausted,
    Failed,
    Cancelled,
}

/// Summary of the passes run during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcCycle {
    pub passes: u32,
    pub reclaimed_entries: u64,
    pub reclaimed_bytes: u64,
    pub end: CycleEnd,
}

/// Handle to a running GC loop. Dropping it cancels the loop.
#[derive(Debug)]
pub(crate) struct GcTask {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl GcTask {
    pub(crate) fn spawn<C: Compactor>(compactor: Arc<C>, policy: GcPolicy) -> Self {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_gc_loop(compactor, policy, shutdown.clone()));

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Cancels the loop and waits for it to exit, including any pass in flight.
    pub(crate) async fn stop(mut self) {
        self.shutdown.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("GC loop terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for GcTask {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_gc_loop<C: Compactor>(
    compactor: Arc<C>,
    policy: GcPolicy,
    shutdown: CancellationToken,
) {
    // The first tick fires one period after open, not immediately.
    let mut ticker = time::interval_at(Instant::now() + policy.frequency, policy.frequency);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        frequency = ?policy.frequency,
        discard_ratio = policy.discard_ratio,
        "GC loop started"
    );

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cycle = run_gc_cycle(&compactor, policy.discard_ratio, &shutdown).await;
        if cycle.reclaimed_entries > 0 {
            debug!(
                passes = cycle.passes,
                reclaimed = cycle.reclaimed_entries,
                bytes = cycle.reclaimed_bytes,
                "GC cycle reclaimed expired entries"
            );
        }
        if cycle.end == CycleEnd::Cancelled {
            break;
        }
    }

    debug!("GC loop stopped");
}

/// Runs compaction passes until the engine has nothing left to reclaim.
///
/// The token is checked before every pass, so no pass starts once
/// cancellation has been requested. A pass already running is awaited.
pub async fn run_gc_cycle<C: Compactor>(
    compactor: &Arc<C>,
    discard_ratio: f64,
    shutdown: &CancellationToken,
) -> GcCycle {
    let mut cycle = GcCycle::default();

    loop {
        if shutdown.is_cancelled() {
            cycle.end = CycleEnd::Cancelled;
            return cycle;
        }

        cycle.passes += 1;
        let pass = {
            let compactor = Arc::clone(compactor);
            task::spawn_blocking(move || compactor.run_compaction(discard_ratio)).await
        };

        match pass {
            Ok(Ok(Compaction::Reclaimed { entries, bytes })) => {
                cycle.reclaimed_entries += entries;
                cycle.reclaimed_bytes += bytes;
            }
            Ok(Ok(Compaction::NothingToReclaim)) => {
                cycle.end = CycleEnd::Exhausted;
                return cycle;
            }
            Ok(Err(e)) => {
                warn!(error = %e, passes = cycle.passes, "Compaction stopped for this cycle");
                cycle.end = CycleEnd::Failed;
                return cycle;
            }
            Err(e) => {
                error!(error = %e, passes = cycle.passes, "Compaction pass panicked");
                cycle.end = CycleEnd::Failed;
                return cycle;
            }
        }
    }
}
